//! # Error Suggestions
//!
//! Helpers that turn a bare failure into a message that also says how to fix
//! it: a "did you mean" for misspelled step or pipeline names, and hints for
//! the project-file errors users hit most.

use std::path::Path;

/// Error for a missing project file.
pub fn config_not_found(path: &Path) -> anyhow::Error {
    anyhow::anyhow!(
        "Project file not found: {path}\n\n\
         hint: Create a quire.yaml file in your project root\n\
         hint: Use -c/--config to specify a different path\n\
         hint: Set QUIRE_CONFIG environment variable",
        path = path.display()
    )
}

/// Hint for a step name the registry does not know.
pub fn unknown_module_hint(name: &str, known: &[&str]) -> String {
    let did_you_mean = find_similar(name, known)
        .map(|s| format!("Did you mean '{s}'? "))
        .unwrap_or_default();
    format!("{did_you_mean}Known steps are: {}", known.join(", "))
}

/// Hint for a dependency naming a pipeline that does not exist.
pub fn unknown_pipeline_hint(name: &str, pipelines: &[&str]) -> Option<String> {
    find_similar(name, pipelines).map(|s| format!("Did you mean '{s}'?"))
}

/// Hint attached to dependency cycle errors.
pub fn cycle_hint() -> &'static str {
    "Remove one of the 'dependencies' entries along the cycle, or move the \
     shared steps into a pipeline both can depend on"
}

/// Closest candidate within an edit distance of two.
fn find_similar<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let input = input.to_ascii_lowercase();
    candidates
        .iter()
        .map(|&candidate| (candidate, edit_distance(&input, &candidate.to_ascii_lowercase())))
        .filter(|&(_, distance)| distance <= 2 && distance < input.len())
        .min_by_key(|&(_, distance)| distance)
        .map(|(candidate, _)| candidate)
}

/// Levenshtein distance, two rows at a time.
fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0usize; b_chars.len() + 1];

    for (i, a_char) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let substitution = previous[j] + usize::from(a_char != *b_char);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}
