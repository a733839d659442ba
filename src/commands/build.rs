//! Build command implementation
//!
//! Loads the project file, cleans the output directory, runs every pipeline
//! and prints a summary: documents per pipeline, files written and skipped,
//! validation findings and timing.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use quire::filesystem::PhysicalFileSystem;
use quire::output::{emoji, severity_label, OutputConfig};
use quire::{EngineResult, ModuleRegistry, Phase, Severity};

use super::{load_project, resolve_config_path};

/// Arguments for the build command
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Path to the project file (defaults to ./quire.yaml)
    #[arg(short, long, value_name = "PATH", env = "QUIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input directory, overriding the project setting
    #[arg(short, long, value_name = "DIR")]
    pub input: Option<PathBuf>,

    /// Output directory, overriding the project setting
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Disable the run-scoped artifact cache
    #[arg(long)]
    pub no_cache: bool,

    /// Keep existing files in the output directory
    #[arg(long)]
    pub no_clean: bool,

    /// Maximum number of pipelines running at once
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Keep running independent pipelines after a failure
    #[arg(long)]
    pub continue_on_error: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Execute the build command
pub fn execute(args: BuildArgs, output: &OutputConfig) -> Result<()> {
    let config_path = resolve_config_path(args.config);
    let mut project = load_project(&config_path)?;

    let input_root = args.input.unwrap_or_else(|| project.input_root());
    let output_root = args.output.unwrap_or_else(|| project.output_root());
    let settings = &mut project.settings;
    settings.no_cache |= args.no_cache;
    settings.continue_on_error |= args.continue_on_error;
    if args.no_clean {
        settings.clean_output = false;
    }
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = Some(concurrency);
    }

    if !args.quiet {
        println!(
            "{} Building {} ({} pipelines)",
            emoji(output, "📚", "[BUILD]"),
            config_path.display(),
            project.pipelines.len()
        );
    }

    let fs = PhysicalFileSystem::new(&input_root, &output_root);
    let engine = project.build_engine(&ModuleRegistry::builtin(), Arc::new(fs))?;
    if project.settings.clean_output {
        log::info!("Cleaning {}", output_root.display());
        engine.clean_output()?;
    }
    let result = match engine.run() {
        Ok(result) => result,
        Err(e) => {
            if !args.quiet {
                println!("{} Build failed", emoji(output, "❌", "[FAIL]"));
            }
            return Err(e.into());
        }
    };

    if !args.quiet {
        print_summary(&result, output, &output_root);
    } else {
        print_findings(&result, Severity::Error);
    }

    if !result.failures.is_empty() {
        anyhow::bail!("{} pipeline(s) failed", result.failures.len());
    }
    Ok(())
}

fn print_summary(result: &EngineResult, output: &OutputConfig, output_root: &std::path::Path) {
    for pipeline in result.outputs.pipelines() {
        let count = result
            .outputs
            .get(pipeline, Phase::Output)
            .map_or(0, <[_]>::len);
        println!("   {}: {} documents", pipeline, count);
    }
    for failure in &result.failures {
        println!(
            "   {} {}: {}",
            emoji(output, "❌", "[FAIL]"),
            failure.pipeline,
            failure.error
        );
    }
    if !result.skipped.is_empty() {
        println!("   Skipped after failures: {}", result.skipped.join(", "));
    }

    print_findings(result, Severity::Info);

    println!(
        "   {} files written, {} unchanged, to {}",
        result.writes.written,
        result.writes.skipped,
        output_root.display()
    );

    let elapsed = result.elapsed.as_secs_f64();
    if result.is_cancelled() {
        println!("{} Cancelled after {:.2}s", emoji(output, "⏹️", "[STOP]"), elapsed);
    } else if result.is_success() {
        println!("{} Built in {:.2}s", emoji(output, "✅", "[OK]"), elapsed);
    } else {
        println!("{} Finished with failures in {:.2}s", emoji(output, "⚠️", "[WARN]"), elapsed);
    }
}

fn print_findings(result: &EngineResult, at_least: Severity) {
    for finding in result.findings.iter().filter(|f| f.severity >= at_least) {
        let location = finding
            .source
            .as_ref()
            .map(|s| format!(" {}", s))
            .unwrap_or_default();
        eprintln!(
            "   [{}] {}/{}{}: {}",
            severity_label(finding.severity),
            finding.pipeline,
            finding.phase,
            location,
            finding.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn plain() -> OutputConfig {
        OutputConfig { use_color: false }
    }

    fn args(config: PathBuf) -> BuildArgs {
        BuildArgs {
            config: Some(config),
            input: None,
            output: None,
            no_cache: false,
            no_clean: false,
            concurrency: None,
            continue_on_error: false,
            quiet: true,
        }
    }

    #[test]
    fn test_execute_missing_config() {
        let result = execute(
            args(PathBuf::from("/nonexistent/quire.yaml")),
            &plain(),
        );
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Project file not found"));
    }

    #[test]
    fn test_execute_copies_inputs() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("input/notes")).unwrap();
        fs::write(temp_dir.path().join("input/notes/build-command.txt"), "alpha").unwrap();
        let config_path = temp_dir.path().join("quire.yaml");
        fs::write(
            &config_path,
            "pipelines:\n  - name: copy\n    input:\n      - read_files: ['**/*.txt']\n    output:\n      - write_files\n",
        )
        .unwrap();

        execute(args(config_path), &plain()).unwrap();
        let written = fs::read_to_string(temp_dir.path().join("output/notes/build-command.txt")).unwrap();
        assert_eq!(written, "alpha");
    }

    #[test]
    fn test_execute_twice_restores_cleaned_output() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("input")).unwrap();
        fs::write(temp_dir.path().join("input/rebuild-command.txt"), "beta").unwrap();
        let config_path = temp_dir.path().join("quire.yaml");
        fs::write(
            &config_path,
            "pipelines:\n  - name: copy\n    input:\n      - read_files: ['*.txt']\n    output:\n      - write_files\n",
        )
        .unwrap();

        let written = temp_dir.path().join("output/rebuild-command.txt");
        execute(args(config_path.clone()), &plain()).unwrap();
        assert!(written.exists());
        execute(args(config_path), &plain()).unwrap();
        assert_eq!(fs::read_to_string(written).unwrap(), "beta");
    }

    #[test]
    fn test_execute_reports_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("quire.yaml");
        fs::write(
            &config_path,
            "pipelines:\n  - name: a\n    dependencies: [b]\n  - name: b\n    dependencies: [a]\n",
        )
        .unwrap();

        let message = execute(args(config_path), &plain())
            .unwrap_err()
            .to_string();
        assert!(message.contains("Cycle detected"));
    }
}
