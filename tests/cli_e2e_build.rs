//! End-to-end tests for `quire build`, `quire plan` and `quire completions`.
//!
//! Exit codes: 0 on success, 1 when loading or running the project fails,
//! 2 for invalid command-line usage (reported by clap).

mod common;
use common::prelude::*;

#[test]
fn test_help_and_version() {
    let fixture = TestFixture::new();
    fixture
        .command()
        .arg("--help")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("plan"));
    fixture.command().arg("--version").assert().code(0);
}

#[test]
fn test_build_copies_inputs() {
    let fixture = TestFixture::new()
        .with_config(configs::COPY_TEXT)
        .with_input("notes/a.txt", "alpha")
        .with_input("notes/skip.md", "not text");

    fixture
        .command()
        .args(["--color", "never", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("copy: 1 documents"))
        .stdout(predicate::str::contains("[OK] Built in"));

    fixture.output("notes/a.txt").assert("alpha");
    fixture.output("notes/skip.md").assert(predicate::path::missing());
}

#[test]
fn test_build_runs_blog_project() {
    let fixture = TestFixture::new()
        .with_config(configs::BLOG)
        .with_input("posts/hello.md", "TODO: write more");

    fixture
        .command()
        .args(["--color", "never", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("posts: 1 documents"))
        .stdout(predicate::str::contains("index: 1 documents"))
        .stderr(predicate::str::contains(
            "[warning] posts/Process posts/hello.md: missing metadata 'title'",
        ));

    fixture.output("posts/hello.html").assert("DONE: write more");
}

#[test]
fn test_build_cleans_output_unless_asked_not_to() {
    let fixture = TestFixture::new()
        .with_config(configs::COPY_TEXT)
        .with_input("a.txt", "a")
        .with_file("output/stale.txt", "old");

    fixture
        .command()
        .args(["build", "--no-clean", "--quiet"])
        .assert()
        .success();
    fixture.output("stale.txt").assert(predicate::path::exists());

    fixture.command().args(["build", "--quiet"]).assert().success();
    fixture.output("stale.txt").assert(predicate::path::missing());
    fixture.output("a.txt").assert("a");
}

#[test]
fn test_build_with_explicit_roots() {
    let fixture = TestFixture::new()
        .with_config(configs::COPY_TEXT)
        .with_file("src/b.txt", "bravo");

    fixture
        .command_with_config("build")
        .args(["--input", "src", "--output", "site", "--quiet", "-j", "1"])
        .assert()
        .success();
    fixture.child("site/b.txt").assert("bravo");
}

#[test]
fn test_quiet_build_prints_nothing_on_success() {
    let fixture = TestFixture::new()
        .with_config(configs::COPY_TEXT)
        .with_input("a.txt", "a");

    fixture
        .command()
        .args(["build", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_missing_project_file() {
    TestFixture::new()
        .command()
        .arg("build")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Project file not found"))
        .stderr(predicate::str::contains("QUIRE_CONFIG"));
}

#[test]
fn test_invalid_yaml() {
    TestFixture::new()
        .with_config(configs::INVALID_YAML)
        .command()
        .args(["build", "--quiet"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to load project file"));
}

#[test]
fn test_cycle_fails_before_running() {
    TestFixture::new()
        .with_config(configs::CYCLE)
        .command()
        .args(["build", "--quiet"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Cycle detected"));
}

#[test]
fn test_unknown_step_suggests_name() {
    TestFixture::new()
        .with_config(configs::UNKNOWN_STEP)
        .command()
        .args(["build", "--quiet"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Did you mean 'write_files'?"));
}

#[test]
fn test_failing_pipeline_exits_with_error() {
    let fixture = TestFixture::new()
        .with_config(
            r#"
pipelines:
  - name: broken
    process:
      - from_dependencies: { pipelines: [elsewhere] }
"#,
        )
        .with_input("a.txt", "a");

    fixture
        .command()
        .args(["build", "--quiet"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot read outputs of 'elsewhere'"));
}

#[test]
fn test_invalid_usage_exits_with_two() {
    TestFixture::new()
        .command()
        .args(["build", "--no-such-flag"])
        .assert()
        .code(2);
    TestFixture::new()
        .command()
        .args(["--log-level", "loud", "plan"])
        .assert()
        .code(2);
}

#[test]
fn test_plan_prints_groups_and_tree() {
    TestFixture::new()
        .with_config(configs::BLOG)
        .command()
        .args(["--color", "never", "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wave 1: posts"))
        .stdout(predicate::str::contains("wave 2: index"))
        .stdout(predicate::str::contains("pipelines"));
}

#[test]
fn test_plan_does_not_write_output() {
    let fixture = TestFixture::new()
        .with_config(configs::COPY_TEXT)
        .with_input("a.txt", "a");
    fixture.command().args(["plan", "--groups-only"]).assert().success();
    fixture.output("a.txt").assert(predicate::path::missing());
}

#[test]
fn test_completions() {
    TestFixture::new()
        .command()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("quire"));
}
