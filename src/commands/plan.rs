//! # Plan Command Implementation
//!
//! Shows how a build would be scheduled without running anything: the
//! execution groups (isolated pipelines, then dependency waves, then
//! deployment waves) and a dependency tree rendered with `ptree`.
//!
//! This command is read-only. It still builds every pipeline so unknown
//! steps, bad arguments and dependency cycles are reported as they would be
//! by `quire build`.

use anyhow::Result;
use clap::Args;
use ptree::{print_tree, TreeItem};
use std::borrow::Cow;
use std::path::PathBuf;

use quire::execution::ExecutionPlan;
use quire::output::{emoji, OutputConfig};
use quire::ModuleRegistry;

use super::{load_project, resolve_config_path};

/// Show the execution plan
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the project file (defaults to ./quire.yaml)
    #[arg(short, long, value_name = "PATH", env = "QUIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Only print the execution groups
    #[arg(long)]
    pub groups_only: bool,
}

/// Execute the `plan` command.
pub fn execute(args: PlanArgs, output: &OutputConfig) -> Result<()> {
    let config_path = resolve_config_path(args.config);
    let project = load_project(&config_path)?;
    let pipelines = project.build_pipelines(&ModuleRegistry::builtin())?;
    let plan = quire::execution::ordering::plan(&pipelines)?;

    println!(
        "{} Execution plan for: {}",
        emoji(output, "🗺️", "[PLAN]"),
        config_path.display()
    );
    for group in plan.groups() {
        println!("   {}: {}", group.label, group.pipelines.join(", "));
    }

    if !args.groups_only && !plan.is_empty() {
        println!();
        print_tree(&dependency_tree(&plan))
            .map_err(|e| anyhow::anyhow!("Failed to display tree: {}", e))?;
    }
    Ok(())
}

/// Pipelines in execution order, each with its dependencies below it.
fn dependency_tree(plan: &ExecutionPlan) -> TreeNode {
    TreeNode {
        label: "pipelines".to_string(),
        children: plan.order().iter().map(|&i| pipeline_node(plan, i)).collect(),
    }
}

fn pipeline_node(plan: &ExecutionPlan, index: usize) -> TreeNode {
    let mut label = plan.name(index).to_string();
    if plan.is_isolated(index) {
        label.push_str(" (isolated)");
    }
    if plan.is_deployment(index) {
        label.push_str(" (deployment)");
    }
    // The plan is acyclic, so this recursion terminates.
    let children = plan
        .dependencies(index)
        .iter()
        .map(|&d| pipeline_node(plan, d))
        .collect();
    TreeNode { label, children }
}

/// Tree node structure for ptree visualization
#[derive(Clone)]
struct TreeNode {
    label: String,
    children: Vec<TreeNode>,
}

impl TreeItem for TreeNode {
    type Child = TreeNode;

    fn write_self<W: std::io::Write>(
        &self,
        f: &mut W,
        _style: &ptree::Style,
    ) -> std::io::Result<()> {
        write!(f, "{}", self.label)
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        Cow::Borrowed(&self.children)
    }
}
