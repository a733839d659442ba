//! Determining Pipeline Order
//!
//! Validates the pipeline set and computes the order pipelines are considered
//! for dispatch.
//!
//! ## Process
//!
//! 1.  **Names**: every name must be valid and unique, ignoring case.
//!
//! 2.  **Dependencies**: every declared dependency must name a pipeline
//!     (matched case-insensitively). A cycle, including a pipeline depending
//!     on itself, fails with the cycle spelled out.
//!
//! 3.  **Flags**: isolated pipelines neither declare nor receive
//!     dependencies, and no regular pipeline may depend on a deployment
//!     pipeline since those always run last.
//!
//! 4.  **Order**: a topological sort where ties go to the pipeline declared
//!     first, and every regular pipeline precedes every deployment pipeline.
//!
//! Everything here runs before any phase executes, so all errors are
//! configuration errors.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use crate::error::{Error, Result};
use crate::pipeline::{validate_name, Pipeline};
use crate::suggestions;

/// Validated execution order and resolved dependency graph.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    names: Vec<String>,
    isolated: Vec<bool>,
    deployment: Vec<bool>,
    dependencies: Vec<Vec<usize>>,
    visible: Vec<BTreeSet<usize>>,
    order: Vec<usize>,
}

/// A set of pipelines that can be in flight at the same time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionGroup {
    pub label: String,
    pub pipelines: Vec<String>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    /// Pipeline indices in dispatch order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn ordered_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Direct dependencies of a pipeline, in declaration order.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    /// Transitive dependencies of a pipeline.
    pub fn visible(&self, index: usize) -> &BTreeSet<usize> {
        &self.visible[index]
    }

    pub fn is_isolated(&self, index: usize) -> bool {
        self.isolated[index]
    }

    pub fn is_deployment(&self, index: usize) -> bool {
        self.deployment[index]
    }

    pub fn has_deployment(&self) -> bool {
        self.deployment.iter().any(|&d| d)
    }

    /// Pipelines a dependent may rely on, by name.
    pub(crate) fn dependency_names(&self) -> HashMap<String, Vec<String>> {
        (0..self.len())
            .map(|i| {
                let deps = self.dependencies[i]
                    .iter()
                    .map(|&d| self.names[d].clone())
                    .collect();
                (self.names[i].clone(), deps)
            })
            .collect()
    }

    pub(crate) fn visible_names(&self) -> HashMap<String, BTreeSet<String>> {
        (0..self.len())
            .map(|i| {
                let deps = self.visible[i]
                    .iter()
                    .map(|&d| self.names[d].clone())
                    .collect();
                (self.names[i].clone(), deps)
            })
            .collect()
    }

    /// Isolated pipelines first, then dependency waves of regular pipelines,
    /// then dependency waves of deployment pipelines. Pipelines in one wave
    /// have no dependency on each other.
    pub fn groups(&self) -> Vec<ExecutionGroup> {
        let mut level = vec![0usize; self.len()];
        for &i in &self.order {
            level[i] = self.dependencies[i]
                .iter()
                .filter(|&&d| self.deployment[d] == self.deployment[i])
                .map(|&d| level[d] + 1)
                .max()
                .unwrap_or(0);
        }

        let mut groups = Vec::new();
        let isolated: Vec<String> = self
            .order
            .iter()
            .filter(|&&i| self.isolated[i] && !self.deployment[i])
            .map(|&i| self.names[i].clone())
            .collect();
        if !isolated.is_empty() {
            groups.push(ExecutionGroup {
                label: "isolated".to_string(),
                pipelines: isolated,
            });
        }

        for deployment in [false, true] {
            let members: Vec<usize> = self
                .order
                .iter()
                .copied()
                .filter(|&i| self.deployment[i] == deployment)
                .filter(|&i| deployment || !self.isolated[i])
                .collect();
            let depth = members.iter().map(|&i| level[i]).max();
            for wave in 0..depth.map_or(0, |d| d + 1) {
                let label = if deployment {
                    format!("deployment wave {}", wave + 1)
                } else {
                    format!("wave {}", wave + 1)
                };
                groups.push(ExecutionGroup {
                    label,
                    pipelines: members
                        .iter()
                        .filter(|&&i| level[i] == wave)
                        .map(|&i| self.names[i].clone())
                        .collect(),
                });
            }
        }
        groups
    }
}

/// Validate `pipelines` and compute their execution plan.
pub fn plan(pipelines: &[Pipeline]) -> Result<ExecutionPlan> {
    let names: Vec<String> = pipelines.iter().map(|p| p.name().to_string()).collect();
    check_names(&names)?;

    let by_name: HashMap<String, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_ascii_lowercase(), i))
        .collect();

    let mut dependencies = Vec::with_capacity(pipelines.len());
    for pipeline in pipelines {
        let mut resolved = Vec::new();
        for dependency in pipeline.dependencies() {
            let index = by_name
                .get(&dependency.to_ascii_lowercase())
                .copied()
                .ok_or_else(|| unknown_dependency(pipeline.name(), dependency, &names))?;
            if !resolved.contains(&index) {
                resolved.push(index);
            }
        }
        dependencies.push(resolved);
    }

    detect_cycles(&names, &dependencies)?;

    let isolated: Vec<bool> = pipelines.iter().map(Pipeline::is_isolated).collect();
    let deployment: Vec<bool> = pipelines.iter().map(Pipeline::is_deployment).collect();
    check_flags(&names, &dependencies, &isolated, &deployment)?;

    let order = topological_order(&dependencies, &deployment);
    let mut visible = vec![BTreeSet::new(); names.len()];
    for &i in &order {
        let mut reachable = BTreeSet::new();
        for &d in &dependencies[i] {
            reachable.insert(d);
            reachable.extend(visible[d].iter().copied());
        }
        visible[i] = reachable;
    }

    Ok(ExecutionPlan {
        names,
        isolated,
        deployment,
        dependencies,
        visible,
        order,
    })
}

fn check_names(names: &[String]) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for name in names {
        validate_name(name)?;
        if let Some(previous) = seen.insert(name.to_ascii_lowercase(), name) {
            return Err(Error::InvalidPipelineName {
                name: name.clone(),
                message: format!("another pipeline is already named '{}'", previous),
            });
        }
    }
    Ok(())
}

fn unknown_dependency(pipeline: &str, dependency: &str, names: &[String]) -> Error {
    let candidates: Vec<&str> = names.iter().map(String::as_str).collect();
    Error::UnknownPipeline {
        pipeline: pipeline.to_string(),
        dependency: dependency.to_string(),
        hint: suggestions::unknown_pipeline_hint(dependency, &candidates),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

fn detect_cycles(names: &[String], dependencies: &[Vec<usize>]) -> Result<()> {
    let mut marks = vec![Mark::Unvisited; names.len()];
    let mut stack = Vec::new();
    for start in 0..names.len() {
        visit(start, dependencies, &mut marks, &mut stack).map_err(|cycle| {
            let path: Vec<&str> = cycle.iter().map(|&i| names[i].as_str()).collect();
            Error::CycleDetected {
                cycle: path.join(" -> "),
            }
        })?;
    }
    Ok(())
}

/// Depth-first search; on a back edge returns the cycle as a closed path.
fn visit(
    node: usize,
    dependencies: &[Vec<usize>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
) -> std::result::Result<(), Vec<usize>> {
    match marks[node] {
        Mark::Done => return Ok(()),
        Mark::InProgress => {
            let start = stack.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(node);
            return Err(cycle);
        }
        Mark::Unvisited => {}
    }
    marks[node] = Mark::InProgress;
    stack.push(node);
    for &dependency in &dependencies[node] {
        visit(dependency, dependencies, marks, stack)?;
    }
    stack.pop();
    marks[node] = Mark::Done;
    Ok(())
}

fn check_flags(
    names: &[String],
    dependencies: &[Vec<usize>],
    isolated: &[bool],
    deployment: &[bool],
) -> Result<()> {
    for (i, deps) in dependencies.iter().enumerate() {
        if isolated[i] && !deps.is_empty() {
            return Err(Error::InvalidPipeline {
                pipeline: names[i].clone(),
                message: "isolated pipelines cannot declare dependencies".to_string(),
            });
        }
        for &d in deps {
            if isolated[d] {
                return Err(Error::InvalidPipeline {
                    pipeline: names[i].clone(),
                    message: format!("cannot depend on isolated pipeline '{}'", names[d]),
                });
            }
            if deployment[d] && !deployment[i] {
                return Err(Error::InvalidPipeline {
                    pipeline: names[i].clone(),
                    message: format!(
                        "cannot depend on deployment pipeline '{}'; deployment pipelines run after all others",
                        names[d]
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm keyed by (deployment, declaration index).
fn topological_order(dependencies: &[Vec<usize>], deployment: &[bool]) -> Vec<usize> {
    let count = dependencies.len();
    let mut remaining: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut dependents = vec![Vec::new(); count];
    for (i, deps) in dependencies.iter().enumerate() {
        for &d in deps {
            dependents[d].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<(bool, usize)>> = (0..count)
        .filter(|&i| remaining[i] == 0)
        .map(|i| Reverse((deployment[i], i)))
        .collect();
    let mut order = Vec::with_capacity(count);
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for &dependent in &dependents[i] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.push(Reverse((deployment[dependent], dependent)));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(name: &str, deps: &[&str]) -> Pipeline {
        Pipeline::builder(name)
            .dependencies(deps.iter().copied())
            .build()
            .unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let pipelines = vec![
            pipeline("site", &["content", "assets"]),
            pipeline("content", &["data"]),
            pipeline("assets", &[]),
            pipeline("data", &[]),
        ];
        let plan = plan(&pipelines).unwrap();
        assert_eq!(plan.ordered_names(), vec!["assets", "data", "content", "site"]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let pipelines = vec![pipeline("c", &[]), pipeline("a", &[]), pipeline("b", &[])];
        assert_eq!(plan(&pipelines).unwrap().ordered_names(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cycle_is_named() {
        let pipelines = vec![pipeline("a", &["b"]), pipeline("b", &["a"])];
        match plan(&pipelines) {
            Err(Error::CycleDetected { cycle }) => assert_eq!(cycle, "a -> b -> a"),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let pipelines = vec![pipeline("a", &["a"])];
        assert!(matches!(plan(&pipelines), Err(Error::CycleDetected { .. })));
    }

    #[test]
    fn test_longer_cycle_path() {
        let pipelines = vec![
            pipeline("entry", &["a"]),
            pipeline("a", &["b"]),
            pipeline("b", &["c"]),
            pipeline("c", &["a"]),
        ];
        match plan(&pipelines) {
            Err(Error::CycleDetected { cycle }) => assert_eq!(cycle, "a -> b -> c -> a"),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_names_ignore_case() {
        let pipelines = vec![pipeline("Content", &[]), pipeline("content", &[])];
        assert!(matches!(
            plan(&pipelines),
            Err(Error::InvalidPipelineName { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency_with_hint() {
        let pipelines = vec![pipeline("site", &["contnet"]), pipeline("content", &[])];
        let err = plan(&pipelines).unwrap_err();
        assert!(matches!(err, Error::UnknownPipeline { .. }));
        assert!(err.to_string().contains("Did you mean 'content'"));
    }

    #[test]
    fn test_dependency_names_match_case_insensitively() {
        let pipelines = vec![pipeline("site", &["CONTENT"]), pipeline("content", &[])];
        let plan = plan(&pipelines).unwrap();
        assert_eq!(plan.dependency_names()["site"], vec!["content".to_string()]);
    }

    #[test]
    fn test_isolated_rules() {
        let isolated = Pipeline::builder("lonely").isolated(true).build().unwrap();
        let dependent = pipeline("needy", &["lonely"]);
        assert!(matches!(
            plan(&[isolated, dependent]),
            Err(Error::InvalidPipeline { .. })
        ));

        let declaring = Pipeline::builder("lonely")
            .isolated(true)
            .dependency("other")
            .build()
            .unwrap();
        assert!(matches!(
            plan(&[declaring, pipeline("other", &[])]),
            Err(Error::InvalidPipeline { .. })
        ));
    }

    #[test]
    fn test_regular_cannot_depend_on_deployment() {
        let deploy = Pipeline::builder("deploy").deployment(true).build().unwrap();
        let site = pipeline("site", &["deploy"]);
        assert!(matches!(plan(&[deploy, site]), Err(Error::InvalidPipeline { .. })));
    }

    #[test]
    fn test_deployment_pipelines_order_last() {
        let deploy = Pipeline::builder("deploy").deployment(true).build().unwrap();
        let pipelines = vec![deploy, pipeline("content", &[]), pipeline("site", &["content"])];
        let plan = plan(&pipelines).unwrap();
        assert_eq!(plan.ordered_names(), vec!["content", "site", "deploy"]);
    }

    #[test]
    fn test_visible_is_transitive() {
        let pipelines = vec![
            pipeline("a", &[]),
            pipeline("b", &["a"]),
            pipeline("c", &["b"]),
        ];
        let plan = plan(&pipelines).unwrap();
        let visible = &plan.visible_names()["c"];
        assert!(visible.contains("a") && visible.contains("b"));
        assert!(plan.visible_names()["a"].is_empty());
    }

    #[test]
    fn test_groups() {
        let pipelines = vec![
            pipeline("data", &[]),
            pipeline("content", &["data"]),
            pipeline("assets", &[]),
            Pipeline::builder("search").isolated(true).build().unwrap(),
            Pipeline::builder("deploy")
                .deployment(true)
                .dependency("content")
                .build()
                .unwrap(),
        ];
        let groups = plan(&pipelines).unwrap().groups();
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["isolated", "wave 1", "wave 2", "deployment wave 1"]);
        assert_eq!(groups[1].pipelines, vec!["data", "assets"]);
        assert_eq!(groups[2].pipelines, vec!["content"]);
        assert_eq!(groups[3].pipelines, vec!["deploy"]);
    }

    #[test]
    fn test_empty_plan() {
        let plan = plan(&[]).unwrap();
        assert!(plan.is_empty());
        assert!(plan.groups().is_empty());
    }
}
