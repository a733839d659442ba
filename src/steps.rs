//! Built-in step implementations
//!
//! These are the general-purpose steps every project file can use. Each
//! submodule holds the step's arguments (as written under the step name in
//! `quire.yaml`), the step itself and a `create` constructor registered in
//! [`ModuleRegistry::builtin`](crate::registry::ModuleRegistry::builtin).

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::context::ExecutionContext;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::module::{InputOrder, Module};
use crate::registry::ModuleRegistry;

/// Deserialize step arguments, treating a missing argument block as `{}`.
fn parse_args<T: DeserializeOwned>(step: &str, args: &Value) -> Result<T> {
    let args = if args.is_null() {
        Value::Mapping(Mapping::new())
    } else {
        args.clone()
    };
    serde_yaml::from_value(args).map_err(|e| Error::ConfigParse {
        message: format!("Invalid arguments for step '{}': {}", step, e),
        hint: Some(format!(
            "Check the arguments listed under '{}' in the project file",
            step
        )),
    })
}

fn yaml_to_json(value: &Value) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Read input files - one document per file matching the glob patterns
pub mod read_files {
    use super::*;
    use crate::retry::retry;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ReadFilesArgs {
        pub patterns: Vec<String>,
    }

    pub struct ReadFiles {
        patterns: Vec<String>,
    }

    impl ReadFiles {
        pub fn new<I, S>(patterns: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                patterns: patterns.into_iter().map(Into::into).collect(),
            }
        }
    }

    impl Module for ReadFiles {
        fn name(&self) -> &str {
            "read_files"
        }

        /// Replaces the inputs with the matched files. Content is read lazily.
        fn execute(&self, _inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
            let fs = context.file_system();
            let policy = context.retry_policy();
            let cancel = context.cancellation();
            let paths = retry(policy, cancel, "resolve input patterns", || {
                fs.resolve_patterns(&self.patterns)
            })?;
            log::debug!(
                "{}: {} files match {:?}",
                context.pipeline(),
                paths.len(),
                self.patterns
            );

            paths
                .into_iter()
                .map(|path| -> Result<Document> {
                    context.check_cancelled()?;
                    let content = retry(policy, cancel, &format!("open {}", path), || {
                        fs.content_provider(&path)
                    })?;
                    Ok(Document::builder()
                        .source(path.clone())
                        .destination(path)
                        .content(content)
                        .build())
                })
                .collect()
        }
    }

    /// Accepts `{ patterns: [...] }`, a single pattern or a list of patterns.
    pub fn create(args: &Value, _registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let patterns = match args {
            Value::String(pattern) => vec![pattern.clone()],
            Value::Sequence(_) => parse_args::<Vec<String>>("read_files", args)?,
            _ => parse_args::<ReadFilesArgs>("read_files", args)?.patterns,
        };
        if patterns.is_empty() {
            return Err(Error::ConfigParse {
                message: "Step 'read_files' needs at least one pattern".to_string(),
                hint: Some("Example: read_files: { patterns: [\"**/*.md\"] }".to_string()),
            });
        }
        Ok(Box::new(ReadFiles::new(patterns)))
    }
}

/// Set metadata - overlay fixed key/value pairs on every document
pub mod set_metadata {
    use super::*;

    pub struct SetMetadata {
        values: Vec<(String, serde_json::Value)>,
    }

    impl SetMetadata {
        pub fn new(values: Vec<(String, serde_json::Value)>) -> Self {
            Self { values }
        }
    }

    impl Module for SetMetadata {
        fn name(&self) -> &str {
            "set_metadata"
        }

        fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
            context.for_each_document(inputs, InputOrder::Parallel, |document| {
                let builder = self
                    .values
                    .iter()
                    .fold(document.derive(), |builder, (key, value)| {
                        builder.metadata(key.clone(), value.clone())
                    });
                Ok(builder.build())
            })
        }
    }

    pub fn create(args: &Value, _registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let mapping: Mapping = parse_args("set_metadata", args)?;
        let mut values = Vec::with_capacity(mapping.len());
        for (key, value) in &mapping {
            let key = key.as_str().ok_or_else(|| Error::ConfigParse {
                message: format!("Metadata keys must be strings, got {:?}", key),
                hint: None,
            })?;
            values.push((key.to_string(), yaml_to_json(value)?));
        }
        Ok(Box::new(SetMetadata::new(values)))
    }
}

/// Set destination - change the output path or its extension
pub mod set_destination {
    use super::*;
    use crate::path::NormalizedPath;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct SetDestinationArgs {
        pub extension: Option<String>,
        pub path: Option<String>,
    }

    pub enum SetDestination {
        Extension(String),
        Path(NormalizedPath),
    }

    impl Module for SetDestination {
        fn name(&self) -> &str {
            "set_destination"
        }

        fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
            context.for_each_document(inputs, InputOrder::Parallel, |document| {
                let destination = match self {
                    SetDestination::Path(path) => Some(path.clone()),
                    SetDestination::Extension(extension) => document
                        .destination()
                        .or(document.source())
                        .map(|current| current.with_extension(extension)),
                };
                Ok(match destination {
                    Some(destination) => document.derive().destination(destination).build(),
                    None => {
                        log::trace!(
                            "{} has neither source nor destination; leaving it alone",
                            document.display_name()
                        );
                        document
                    }
                })
            })
        }
    }

    pub fn create(args: &Value, _registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let parsed: SetDestinationArgs = parse_args("set_destination", args)?;
        match (parsed.extension, parsed.path) {
            (Some(extension), None) => Ok(Box::new(SetDestination::Extension(
                extension.trim_start_matches('.').to_string(),
            ))),
            (None, Some(path)) => Ok(Box::new(SetDestination::Path(NormalizedPath::new(path)))),
            _ => Err(Error::ConfigParse {
                message: "Step 'set_destination' needs exactly one of 'extension' or 'path'"
                    .to_string(),
                hint: Some("Example: set_destination: { extension: html }".to_string()),
            }),
        }
    }
}

/// Replace text - regex rewrite of document content
pub mod replace_text {
    use super::*;
    use crate::content::ContentProvider;
    use regex::Regex;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct ReplaceTextArgs {
        pub pattern: String,
        pub replacement: String,
    }

    /// Rewrites every match of `pattern`. Results are cached per content
    /// fingerprint for the duration of a run.
    pub struct ReplaceText {
        regex: Regex,
        replacement: String,
        namespace: String,
    }

    impl ReplaceText {
        pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
            let replacement = replacement.into();
            Ok(Self {
                regex: Regex::new(pattern)?,
                namespace: format!("replace_text:{}:{}", pattern, replacement),
                replacement,
            })
        }
    }

    impl Module for ReplaceText {
        fn name(&self) -> &str {
            "replace_text"
        }

        fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
            context.for_each_document(inputs, InputOrder::Parallel, |document| {
                let key = document.content().fingerprint()?;
                let rewritten = context.cached(&self.namespace, key, || {
                    let text = document.content().read_string()?;
                    Ok(self
                        .regex
                        .replace_all(&text, self.replacement.as_str())
                        .into_owned())
                })?;
                Ok(document.with_content(ContentProvider::from_string(rewritten.as_str())))
            })
        }
    }

    pub fn create(args: &Value, _registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let parsed: ReplaceTextArgs = parse_args("replace_text", args)?;
        Ok(Box::new(ReplaceText::new(&parsed.pattern, parsed.replacement)?))
    }
}

/// Filter - keep documents carrying a metadata key, optionally with a value
pub mod filter {
    use super::*;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FilterArgs {
        pub key: String,
        pub equals: Option<Value>,
    }

    pub struct Filter {
        key: String,
        equals: Option<serde_json::Value>,
    }

    impl Filter {
        pub fn new(key: impl Into<String>, equals: Option<serde_json::Value>) -> Self {
            Self {
                key: key.into(),
                equals,
            }
        }

        fn keeps(&self, document: &Document) -> bool {
            let Some(actual) = document.get(&self.key) else {
                return false;
            };
            match &self.equals {
                None => true,
                Some(expected) if actual == expected => true,
                // Scalars also match on their text form: "3" equals 3.
                Some(serde_json::Value::String(expected)) => {
                    document.get_str(&self.key).as_deref() == Some(expected.as_str())
                }
                Some(expected) => Some(expected.to_string()) == document.get_str(&self.key),
            }
        }
    }

    impl Module for Filter {
        fn name(&self) -> &str {
            "filter"
        }

        fn execute(&self, inputs: Vec<Document>, _context: &ExecutionContext) -> Result<Vec<Document>> {
            Ok(inputs.into_iter().filter(|d| self.keeps(d)).collect())
        }
    }

    pub fn create(args: &Value, _registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let parsed: FilterArgs = parse_args("filter", args)?;
        let equals = parsed.equals.as_ref().map(yaml_to_json).transpose()?;
        Ok(Box::new(Filter::new(parsed.key, equals)))
    }
}

/// Order by - sort documents by a metadata key
pub mod order_by {
    use super::*;
    use std::cmp::Ordering;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct OrderByArgs {
        pub key: String,
        #[serde(default)]
        pub descending: bool,
    }

    /// Stable sort; numbers compare numerically, everything else as text.
    /// Documents without the key always sort last.
    pub struct OrderBy {
        key: String,
        descending: bool,
    }

    impl OrderBy {
        pub fn new(key: impl Into<String>, descending: bool) -> Self {
            Self {
                key: key.into(),
                descending,
            }
        }

        fn compare(&self, a: &Document, b: &Document) -> Ordering {
            let ordering = match (a.get(&self.key), b.get(&self.key)) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Greater,
                (Some(_), None) => return Ordering::Less,
                (Some(_), Some(_)) => {
                    let metadata = (a.metadata(), b.metadata());
                    match (metadata.0.get_f64(&self.key), metadata.1.get_f64(&self.key)) {
                        (Some(x), Some(y)) => x.total_cmp(&y),
                        _ => a.get_str(&self.key).cmp(&b.get_str(&self.key)),
                    }
                }
            };
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }

    impl Module for OrderBy {
        fn name(&self) -> &str {
            "order_by"
        }

        fn execute(&self, mut inputs: Vec<Document>, _context: &ExecutionContext) -> Result<Vec<Document>> {
            inputs.sort_by(|a, b| self.compare(a, b));
            Ok(inputs)
        }
    }

    pub fn create(args: &Value, _registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let parsed: OrderByArgs = parse_args("order_by", args)?;
        Ok(Box::new(OrderBy::new(parsed.key, parsed.descending)))
    }
}

/// From dependencies - append outputs of dependency pipelines
pub mod from_dependencies {
    use super::*;
    use crate::phase::Phase;

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FromDependenciesArgs {
        pub pipelines: Option<Vec<String>>,
        pub phase: Option<Phase>,
    }

    /// Appends, after the inputs, the given phase's outputs of the named
    /// pipelines (all declared dependencies by default).
    pub struct FromDependencies {
        pipelines: Option<Vec<String>>,
        phase: Phase,
    }

    impl FromDependencies {
        pub fn new(pipelines: Option<Vec<String>>, phase: Phase) -> Self {
            Self { pipelines, phase }
        }
    }

    impl Module for FromDependencies {
        fn name(&self) -> &str {
            "from_dependencies"
        }

        fn execute(&self, mut inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
            let names = match &self.pipelines {
                Some(names) => names.clone(),
                None => context.dependencies().to_vec(),
            };
            for name in names {
                let outputs = context.outputs_of_phase(&name, self.phase)?;
                inputs.extend(outputs.iter().cloned());
            }
            Ok(inputs)
        }
    }

    pub fn create(args: &Value, _registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let parsed: FromDependenciesArgs = parse_args("from_dependencies", args)?;
        Ok(Box::new(FromDependencies::new(
            parsed.pipelines,
            parsed.phase.unwrap_or(Phase::Output),
        )))
    }
}

/// Require metadata - record findings for documents missing keys
pub mod require_metadata {
    use super::*;
    use crate::validation::Severity;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct RequireMetadataArgs {
        pub keys: Vec<String>,
        #[serde(default = "default_severity")]
        pub severity: Severity,
    }

    fn default_severity() -> Severity {
        Severity::Warning
    }

    pub struct RequireMetadata {
        keys: Vec<String>,
        severity: Severity,
    }

    impl RequireMetadata {
        pub fn new(keys: Vec<String>, severity: Severity) -> Self {
            Self { keys, severity }
        }
    }

    impl Module for RequireMetadata {
        fn name(&self) -> &str {
            "require_metadata"
        }

        fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
            for document in &inputs {
                for key in &self.keys {
                    if !document.metadata().contains_key(key) {
                        context.add_finding(
                            self.severity,
                            document.source(),
                            format!("missing metadata '{}'", key),
                        );
                    }
                }
            }
            Ok(inputs)
        }
    }

    pub fn create(args: &Value, _registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let parsed: RequireMetadataArgs = parse_args("require_metadata", args)?;
        Ok(Box::new(RequireMetadata::new(parsed.keys, parsed.severity)))
    }
}

/// Write files - emit documents to the output root, skipping unchanged ones
pub mod write_files {
    use super::*;
    use crate::retry::retry;
    use crate::write_tracker::WriteOutcome;

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct WriteFilesArgs {}

    /// Writes every document that has a destination. A document whose
    /// fingerprint matches the last one written to the same path is skipped.
    /// Documents pass through unchanged.
    #[derive(Default)]
    pub struct WriteFiles;

    impl Module for WriteFiles {
        fn name(&self) -> &str {
            "write_files"
        }

        fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
            context.for_each_document(inputs, InputOrder::Parallel, |document| {
                let Some(destination) = document.destination() else {
                    log::trace!("{} has no destination; not written", document.display_name());
                    return Ok(document);
                };
                let fingerprint = context.fingerprint(&document)?;
                let outcome = context.write_tracker().write_if_changed(destination, fingerprint, || {
                    let what = format!("write {}", destination);
                    retry(context.retry_policy(), context.cancellation(), &what, || {
                        let mut reader = document.content().open()?;
                        context.file_system().write_file(destination, &mut reader)?;
                        Ok(())
                    })
                })?;
                if outcome == WriteOutcome::Skipped {
                    log::debug!("{} unchanged; skipped", destination);
                }
                Ok(document)
            })
        }
    }

    pub fn create(args: &Value, _registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let _: WriteFilesArgs = parse_args("write_files", args)?;
        Ok(Box::new(WriteFiles))
    }
}

/// Group - a nested list of steps run as one
pub mod group {
    use super::*;
    use crate::module::ModuleGroup;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct GroupArgs {
        pub name: Option<String>,
        pub steps: Vec<Value>,
    }

    /// Accepts `{ name?, steps: [...] }` or a bare list of steps.
    pub fn create(args: &Value, registry: &ModuleRegistry) -> Result<Box<dyn Module>> {
        let parsed = match args {
            Value::Sequence(steps) => GroupArgs {
                name: None,
                steps: steps.clone(),
            },
            _ => parse_args::<GroupArgs>("group", args)?,
        };
        let modules = registry.create_steps(&parsed.steps)?;
        Ok(Box::new(ModuleGroup::new(
            parsed.name.unwrap_or_else(|| "group".to_string()),
            modules,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{FileSystem, MemoryFileSystem};
    use crate::path::NormalizedPath;
    use crate::phase::Phase;
    use crate::validation::Severity;
    use std::sync::Arc;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn create(name: &str, args: &str) -> Box<dyn Module> {
        ModuleRegistry::builtin().create(name, &yaml(args)).unwrap()
    }

    fn context_with(fs: Arc<MemoryFileSystem>) -> ExecutionContext {
        ExecutionContext::detached_with(fs, "test", Phase::Process)
    }

    fn context() -> ExecutionContext {
        ExecutionContext::detached("test", Phase::Process)
    }

    fn doc(source: &str, meta: &[(&str, serde_json::Value)]) -> Document {
        let builder = Document::builder()
            .source(source)
            .destination(source)
            .text(source);
        meta.iter()
            .fold(builder, |b, (k, v)| b.metadata(*k, v.clone()))
            .build()
    }

    fn sources(documents: &[Document]) -> Vec<String> {
        documents
            .iter()
            .map(|d| d.source().map(ToString::to_string).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_read_files_creates_documents() {
        let fs = Arc::new(
            MemoryFileSystem::new()
                .with_input("posts/b.md", "B")
                .with_input("posts/a.md", "A")
                .with_input("style.css", "css"),
        );
        let step = create("read_files", "patterns: ['**/*.md']");
        let outputs = step.execute(Vec::new(), &context_with(fs)).unwrap();
        assert_eq!(sources(&outputs), vec!["posts/a.md", "posts/b.md"]);
        assert_eq!(outputs[0].content().read_string().unwrap(), "A");
        assert_eq!(outputs[0].destination(), outputs[0].source());
    }

    #[test]
    fn test_read_files_shorthand_and_empty_patterns() {
        let registry = ModuleRegistry::builtin();
        assert!(registry.create("read_files", &yaml("'*.md'")).is_ok());
        assert!(registry.create("read_files", &yaml("['*.md', '*.txt']")).is_ok());
        assert!(matches!(
            registry.create("read_files", &yaml("patterns: []")),
            Err(Error::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_set_metadata_overlays_values() {
        let step = create("set_metadata", "layout: post\nweight: 3\ntags: [a, b]");
        let outputs = step
            .execute(vec![doc("a.md", &[("layout", "page".into())])], &context())
            .unwrap();
        assert_eq!(outputs[0].get_str("layout").unwrap(), "post");
        assert_eq!(outputs[0].metadata().get_i64("weight"), Some(3));
        assert_eq!(outputs[0].get("tags").unwrap(), &serde_json::json!(["a", "b"]));
        assert_eq!(outputs[0].version(), 1);
    }

    #[test]
    fn test_set_destination_extension_and_path() {
        let step = create("set_destination", "extension: .html");
        let outputs = step.execute(vec![doc("posts/a.md", &[])], &context()).unwrap();
        assert_eq!(outputs[0].destination().unwrap().as_str(), "posts/a.html");

        let step = create("set_destination", "path: feed.xml");
        let outputs = step.execute(vec![doc("posts/a.md", &[])], &context()).unwrap();
        assert_eq!(outputs[0].destination().unwrap().as_str(), "feed.xml");

        let registry = ModuleRegistry::builtin();
        assert!(registry
            .create("set_destination", &yaml("{ extension: html, path: x }"))
            .is_err());
        assert!(registry.create("set_destination", &Value::Null).is_err());
    }

    #[test]
    fn test_replace_text_rewrites_and_caches() {
        let step = create("replace_text", "pattern: 'colou?r'\nreplacement: hue");
        let ctx = context();
        let first = Document::from_text("a.txt", "color and colour");
        let twin = Document::from_text("b.txt", "color and colour");
        let outputs = step.execute(vec![first, twin], &ctx).unwrap();
        assert_eq!(outputs[0].content().read_string().unwrap(), "hue and hue");
        assert_eq!(outputs[1].content().read_string().unwrap(), "hue and hue");
    }

    #[test]
    fn test_replace_text_rejects_bad_regex() {
        let result = ModuleRegistry::builtin()
            .create("replace_text", &yaml("pattern: '(unclosed'\nreplacement: x"));
        assert!(matches!(result, Err(Error::Regex(_))));
    }

    #[test]
    fn test_filter_by_presence_and_value() {
        let inputs = vec![
            doc("a", &[("draft", true.into())]),
            doc("b", &[("draft", false.into())]),
            doc("c", &[]),
            doc("d", &[("draft", "true".into())]),
        ];
        let present = create("filter", "key: draft")
            .execute(inputs.clone(), &context())
            .unwrap();
        assert_eq!(sources(&present), vec!["a", "b", "d"]);

        let drafts = create("filter", "key: draft\nequals: true")
            .execute(inputs, &context())
            .unwrap();
        assert_eq!(sources(&drafts), vec!["a", "d"]);
    }

    #[test]
    fn test_order_by_numbers_text_and_missing() {
        let inputs = vec![
            doc("ten", &[("order", 10.into())]),
            doc("none", &[]),
            doc("two", &[("order", 2.into())]),
            doc("three", &[("order", "3".into())]),
        ];
        let ascending = create("order_by", "key: order")
            .execute(inputs.clone(), &context())
            .unwrap();
        assert_eq!(sources(&ascending), vec!["two", "three", "ten", "none"]);

        let descending = create("order_by", "key: order\ndescending: true")
            .execute(inputs, &context())
            .unwrap();
        assert_eq!(sources(&descending), vec!["ten", "three", "two", "none"]);
    }

    #[test]
    fn test_require_metadata_records_findings_only() {
        let ctx = context();
        let inputs = vec![doc("a.md", &[("title", "A".into())]), doc("b.md", &[])];
        let outputs = create("require_metadata", "keys: [title, date]\nseverity: error")
            .execute(inputs, &ctx)
            .unwrap();
        assert_eq!(outputs.len(), 2);
        let findings = ctx.findings();
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().all(|f| f.severity == Severity::Error));
        assert_eq!(
            findings
                .iter()
                .filter(|f| f.source.as_ref().map(NormalizedPath::as_str) == Some("b.md"))
                .count(),
            2
        );
    }

    #[test]
    fn test_write_files_skips_unchanged() {
        let fs = Arc::new(MemoryFileSystem::new());
        let ctx = context_with(Arc::clone(&fs));
        let step = create("write_files", "{}");

        let page = Document::from_text("index.html", "<h1>Hi</h1>");
        step.execute(vec![page.clone()], &ctx).unwrap();
        step.execute(vec![page], &ctx).unwrap();
        assert_eq!(fs.write_count(), 1);
        assert_eq!(fs.output_string("index.html").unwrap(), "<h1>Hi</h1>");

        let changed = Document::from_text("index.html", "<h1>Hello</h1>");
        step.execute(vec![changed], &ctx).unwrap();
        assert_eq!(fs.write_count(), 2);
        assert_eq!(fs.output_string("index.html").unwrap(), "<h1>Hello</h1>");
    }

    /// Output side that times out on the first write, then delegates.
    struct FlakyOutput {
        inner: MemoryFileSystem,
        failures_left: std::sync::atomic::AtomicUsize,
    }

    impl FileSystem for FlakyOutput {
        fn get_file(&self, path: &NormalizedPath) -> Result<Option<crate::filesystem::FileEntry>> {
            self.inner.get_file(path)
        }

        fn get_directory(&self, path: &NormalizedPath) -> Result<Vec<NormalizedPath>> {
            self.inner.get_directory(path)
        }

        fn content_provider(&self, path: &NormalizedPath) -> Result<crate::content::ContentProvider> {
            self.inner.content_provider(path)
        }

        fn resolve_patterns(&self, patterns: &[String]) -> Result<Vec<NormalizedPath>> {
            self.inner.resolve_patterns(patterns)
        }

        fn write_file(&self, path: &NormalizedPath, content: &mut dyn std::io::Read) -> Result<u64> {
            use std::sync::atomic::Ordering;
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::io_context(
                    std::io::Error::from(std::io::ErrorKind::TimedOut),
                    format!("Failed to write file '{}'", path),
                ));
            }
            self.inner.write_file(path, content)
        }

        fn clean_output(&self) -> Result<()> {
            self.inner.clean_output()
        }
    }

    #[test]
    fn test_write_files_retries_transient_failure() {
        let fs = Arc::new(FlakyOutput {
            inner: MemoryFileSystem::new(),
            failures_left: std::sync::atomic::AtomicUsize::new(1),
        });
        let ctx = ExecutionContext::detached_with(fs.clone(), "test", Phase::Output);
        create("write_files", "{}")
            .execute(vec![Document::from_text("retry.html", "<p>ok</p>")], &ctx)
            .unwrap();
        assert_eq!(fs.inner.write_count(), 1);
        assert_eq!(fs.inner.output_string("retry.html").unwrap(), "<p>ok</p>");
        assert_eq!(ctx.write_tracker().len().unwrap(), 1);
    }

    #[test]
    fn test_write_files_ignores_documents_without_destination() {
        let fs = Arc::new(MemoryFileSystem::new());
        let ctx = context_with(Arc::clone(&fs));
        let orphan = Document::builder().text("no home").build();
        let outputs = create("write_files", "")
            .execute(vec![orphan], &ctx)
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(fs.output_paths().is_empty());
        assert!(fs.resolve_patterns(&["**".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn test_group_accepts_list_or_mapping() {
        let listed = create("group", "- set_metadata: { a: 1 }\n- set_metadata: { b: 2 }");
        assert_eq!(listed.name(), "group");
        let outputs = listed.execute(vec![doc("x", &[])], &context()).unwrap();
        assert_eq!(outputs[0].metadata().get_i64("b"), Some(2));
        assert_eq!(outputs[0].version(), 2);

        let named = create("group", "name: tidy\nsteps:\n  - filter: { key: keep }");
        assert_eq!(named.name(), "tidy");
    }

    #[test]
    fn test_unknown_arguments_are_rejected() {
        let result = ModuleRegistry::builtin().create("order_by", &yaml("key: a\nreverse: true"));
        match result {
            Err(Error::ConfigParse { message, .. }) => assert!(message.contains("order_by")),
            other => panic!("expected config error, got {:?}", other.map(|m| m.name().to_string())),
        }
    }
}
