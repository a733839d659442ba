//! # Content Providers
//!
//! A document's body is reached through a [`ContentProvider`]: a shared handle
//! to a [`ContentSource`] that can hand out a fresh reader and a byte length on
//! demand. Several documents may hold the same provider (a metadata-only
//! revision keeps its predecessor's content), so the provider is reference
//! counted and its source is released exactly once, when the last holder goes
//! away.
//!
//! ## Sources
//!
//! - [`MemoryContent`]: bytes already in memory.
//! - [`FileContent`]: a file on disk, read lazily each time it is opened.
//! - [`TempFileContent`]: a file owned by the provider and deleted on release.
//! - [`EmptyContent`]: no body at all.

use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// Something that can produce a document body.
pub trait ContentSource: Send + Sync {
    /// Open a new reader positioned at the start of the content.
    fn open(&self) -> Result<Box<dyn Read + Send>>;

    /// Length of the content in bytes.
    fn len(&self) -> Result<u64>;

    /// Whether the content has zero length.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Media type hint, when the source knows one.
    fn media_type(&self) -> Option<&str> {
        None
    }

    /// Called once when the last provider handle is dropped.
    fn release(&self) {}
}

/// Content that lives in memory.
#[derive(Debug, Clone)]
pub struct MemoryContent {
    bytes: Arc<[u8]>,
    media_type: Option<String>,
}

impl MemoryContent {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
            media_type: None,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }
}

impl ContentSource for MemoryContent {
    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.bytes))))
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }
}

/// Content read from a file each time it is opened.
#[derive(Debug, Clone)]
pub struct FileContent {
    path: PathBuf,
}

impl FileContent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentSource for FileContent {
    fn open(&self) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(&self.path)
            .map_err(|e| Error::io_context(e, format!("Failed to open '{}'", self.path.display())))?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn len(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }
}

/// A scratch file owned by its provider; deleted when the provider is released.
#[derive(Debug)]
pub struct TempFileContent {
    path: PathBuf,
}

impl TempFileContent {
    /// Write `bytes` to `path` and take ownership of the file.
    pub fn create(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentSource for TempFileContent {
    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::BufReader::new(fs::File::open(&self.path)?)))
    }

    fn len(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn release(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(
                "Failed to remove released content file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// A source with no content.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContent;

impl ContentSource for EmptyContent {
    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::empty()))
    }

    fn len(&self) -> Result<u64> {
        Ok(0)
    }
}

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

struct ProviderInner {
    id: u64,
    source: Box<dyn ContentSource>,
    checksum: OnceLock<Fingerprint>,
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        debug!("Releasing content provider {}", self.id);
        self.source.release();
    }
}

/// Shared, reference-counted handle to a content source.
///
/// Cloning the handle adds a holder; the source's
/// [`release`](ContentSource::release) runs when the last holder is dropped.
#[derive(Clone)]
pub struct ContentProvider {
    inner: Arc<ProviderInner>,
}

impl ContentProvider {
    pub fn new(source: impl ContentSource + 'static) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                id: NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed),
                source: Box::new(source),
                checksum: OnceLock::new(),
            }),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(MemoryContent::new(bytes))
    }

    pub fn from_string(text: impl Into<String>) -> Self {
        Self::new(MemoryContent::new(text.into().into_bytes()))
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(FileContent::new(path))
    }

    pub fn empty() -> Self {
        Self::new(EmptyContent)
    }

    /// Process-unique identity of the underlying source.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Number of live handles to this source.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles share the same source.
    pub fn ptr_eq(&self, other: &ContentProvider) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        self.inner.source.open()
    }

    pub fn len(&self) -> Result<u64> {
        self.inner.source.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.inner.source.is_empty()
    }

    pub fn media_type(&self) -> Option<&str> {
        self.inner.source.media_type()
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.open()?.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    pub fn read_string(&self) -> Result<String> {
        String::from_utf8(self.read_bytes()?).map_err(|e| Error::execution(format!(
            "Content of provider {} is not valid UTF-8: {}",
            self.inner.id, e
        )))
    }

    /// Checksum of the content bytes.
    ///
    /// Content never changes once a provider exists, so the checksum is
    /// computed on first use and remembered.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        if let Some(checksum) = self.inner.checksum.get() {
            return Ok(*checksum);
        }
        let checksum = Fingerprint::of_reader(self.open()?)?;
        Ok(*self.inner.checksum.get_or_init(|| checksum))
    }
}

impl fmt::Debug for ContentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentProvider")
            .field("id", &self.inner.id)
            .field("holders", &self.holders())
            .finish()
    }
}

impl Default for ContentProvider {
    fn default() -> Self {
        Self::empty()
    }
}
