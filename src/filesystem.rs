//! File system collaborators
//!
//! The engine only needs a handful of operations from the file layer: look up
//! a file, list a directory, get a content provider for an input file, resolve
//! glob patterns against the input tree, write an output file and clean the
//! output directory. [`PhysicalFileSystem`] does this on disk;
//! [`MemoryFileSystem`] keeps everything in memory for tests and dry runs.
//!
//! Pattern resolution is delegated to the `glob` crate. A pattern starting with
//! `!` excludes whatever it matches from the result.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use glob::{MatchOptions, Pattern};
use log::{debug, info};
use walkdir::WalkDir;

use crate::content::{ContentProvider, MemoryContent};
use crate::error::{Error, Result};
use crate::path::NormalizedPath;

/// A file found on the input side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: NormalizedPath,
    pub len: u64,
}

/// Operations the engine and built-in steps need from a file layer.
pub trait FileSystem: Send + Sync {
    /// Look up an input file.
    fn get_file(&self, path: &NormalizedPath) -> Result<Option<FileEntry>>;

    /// Direct children (files and directories) of an input directory.
    fn get_directory(&self, path: &NormalizedPath) -> Result<Vec<NormalizedPath>>;

    /// Content provider for an input file.
    fn content_provider(&self, path: &NormalizedPath) -> Result<ContentProvider>;

    /// Input files matching the patterns, sorted.
    fn resolve_patterns(&self, patterns: &[String]) -> Result<Vec<NormalizedPath>>;

    /// Write an output file, returning the number of bytes written.
    fn write_file(&self, path: &NormalizedPath, content: &mut dyn Read) -> Result<u64>;

    /// Remove everything below the output root.
    fn clean_output(&self) -> Result<()>;
}

struct PatternSet {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl PatternSet {
    fn compile(patterns: &[String]) -> Result<Self> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for raw in patterns {
            match raw.strip_prefix('!') {
                Some(negated) => exclude.push(Pattern::new(negated)?),
                None => include.push(Pattern::new(raw)?),
            }
        }
        Ok(Self { include, exclude })
    }

    fn matches(&self, path: &NormalizedPath) -> bool {
        let candidate = path.as_str();
        self.include
            .iter()
            .any(|p| p.matches_with(candidate, MATCH_OPTIONS))
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_with(candidate, MATCH_OPTIONS))
    }
}

/// Input and output directories on the host file system.
#[derive(Debug, Clone)]
pub struct PhysicalFileSystem {
    input_root: PathBuf,
    output_root: PathBuf,
}

impl PhysicalFileSystem {
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
        }
    }

    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }
}

impl FileSystem for PhysicalFileSystem {
    fn get_file(&self, path: &NormalizedPath) -> Result<Option<FileEntry>> {
        let full = path.under(&self.input_root);
        match fs::metadata(&full) {
            Ok(meta) if meta.is_file() => Ok(Some(FileEntry {
                path: path.clone(),
                len: meta.len(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_directory(&self, path: &NormalizedPath) -> Result<Vec<NormalizedPath>> {
        let full = path.under(&self.input_root);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| Error::Filesystem {
            message: format!("Failed to list directory '{}': {}", full.display(), e),
        })? {
            let entry = entry?;
            entries.push(path.join(entry.file_name().to_string_lossy()));
        }
        entries.sort();
        Ok(entries)
    }

    fn content_provider(&self, path: &NormalizedPath) -> Result<ContentProvider> {
        Ok(ContentProvider::from_file(path.under(&self.input_root)))
    }

    fn resolve_patterns(&self, patterns: &[String]) -> Result<Vec<NormalizedPath>> {
        let set = PatternSet::compile(patterns)?;
        if !self.input_root.exists() {
            debug!(
                "Input root {} does not exist; no files match",
                self.input_root.display()
            );
            return Ok(Vec::new());
        }
        let mut matches = Vec::new();
        for entry in WalkDir::new(&self.input_root).follow_links(true) {
            let entry = entry.map_err(|e| Error::Filesystem {
                message: format!("Failed to walk '{}': {}", self.input_root.display(), e),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = NormalizedPath::relative_to(&self.input_root, entry.path())?;
            if set.matches(&relative) {
                matches.push(relative);
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn write_file(&self, path: &NormalizedPath, content: &mut dyn Read) -> Result<u64> {
        let full = path.under(&self.output_root);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::io_context(e, format!("Failed to create directory '{}'", parent.display()))
            })?;
        }
        let mut file = fs::File::create(&full)
            .map_err(|e| Error::io_context(e, format!("Failed to write file '{}'", full.display())))?;
        Ok(io::copy(content, &mut file)?)
    }

    fn clean_output(&self) -> Result<()> {
        if !self.output_root.exists() {
            return Ok(());
        }
        let output = fs::canonicalize(&self.output_root)?;
        if let Ok(input) = fs::canonicalize(&self.input_root) {
            if input.starts_with(&output) {
                return Err(Error::Filesystem {
                    message: format!(
                        "Refusing to clean '{}': it contains the input directory",
                        output.display()
                    ),
                });
            }
        }
        info!("Cleaning output directory {}", output.display());
        for entry in WalkDir::new(&output).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::Filesystem {
                message: format!("Failed to walk '{}': {}", output.display(), e),
            })?;
            if entry.file_type().is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// In-memory input and output trees.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    inputs: Mutex<BTreeMap<NormalizedPath, Vec<u8>>>,
    outputs: Mutex<BTreeMap<NormalizedPath, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an input file.
    pub fn add_input(&self, path: impl Into<NormalizedPath>, content: impl Into<Vec<u8>>) {
        self.inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), content.into());
    }

    /// Builder-style `add_input`.
    pub fn with_input(self, path: impl Into<NormalizedPath>, content: impl Into<Vec<u8>>) -> Self {
        self.add_input(path, content);
        self
    }

    pub fn output(&self, path: &str) -> Option<Vec<u8>> {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&NormalizedPath::new(path))
            .cloned()
    }

    pub fn output_string(&self, path: &str) -> Option<String> {
        self.output(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn output_paths(&self) -> Vec<NormalizedPath> {
        self.outputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Number of physical writes performed so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl FileSystem for MemoryFileSystem {
    fn get_file(&self, path: &NormalizedPath) -> Result<Option<FileEntry>> {
        let inputs = self.inputs.lock().map_err(|_| Error::LockPoisoned {
            context: "memory file system inputs".to_string(),
        })?;
        Ok(inputs.get(path).map(|bytes| FileEntry {
            path: path.clone(),
            len: bytes.len() as u64,
        }))
    }

    fn get_directory(&self, path: &NormalizedPath) -> Result<Vec<NormalizedPath>> {
        let inputs = self.inputs.lock().map_err(|_| Error::LockPoisoned {
            context: "memory file system inputs".to_string(),
        })?;
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let mut children: Vec<NormalizedPath> = inputs
            .keys()
            .filter_map(|key| key.as_str().strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(|child| path.join(child))
            .collect();
        children.dedup();
        Ok(children)
    }

    fn content_provider(&self, path: &NormalizedPath) -> Result<ContentProvider> {
        let inputs = self.inputs.lock().map_err(|_| Error::LockPoisoned {
            context: "memory file system inputs".to_string(),
        })?;
        let bytes = inputs.get(path).ok_or_else(|| Error::Filesystem {
            message: format!("File not found: {}", path),
        })?;
        Ok(ContentProvider::new(MemoryContent::new(bytes.clone())))
    }

    fn resolve_patterns(&self, patterns: &[String]) -> Result<Vec<NormalizedPath>> {
        let set = PatternSet::compile(patterns)?;
        let inputs = self.inputs.lock().map_err(|_| Error::LockPoisoned {
            context: "memory file system inputs".to_string(),
        })?;
        Ok(inputs.keys().filter(|p| set.matches(p)).cloned().collect())
    }

    fn write_file(&self, path: &NormalizedPath, content: &mut dyn Read) -> Result<u64> {
        let mut buffer = Vec::new();
        content.read_to_end(&mut buffer)?;
        let len = buffer.len() as u64;
        self.outputs
            .lock()
            .map_err(|_| Error::LockPoisoned {
                context: "memory file system outputs".to_string(),
            })?
            .insert(path.clone(), buffer);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(len)
    }

    fn clean_output(&self) -> Result<()> {
        self.outputs
            .lock()
            .map_err(|_| Error::LockPoisoned {
                context: "memory file system outputs".to_string(),
            })?
            .clear();
        Ok(())
    }
}
