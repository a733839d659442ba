//! # Documents
//!
//! A [`Document`] is an immutable value: a source identity, an optional
//! destination, ordered metadata and a content provider. Steps never change a
//! document in place. They either pass it through or build a new revision with
//! [`Document::derive`], which inherits everything not explicitly replaced,
//! keeps the lineage's identity and source, and bumps the version by one.
//!
//! `Document` itself is a cheap handle; cloning it yields the *same* document
//! (same id and version), which is how collections flow between phases.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::content::ContentProvider;
use crate::metadata::Metadata;
use crate::path::NormalizedPath;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity shared by every revision of one logical document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(u64);

impl DocumentId {
    fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

#[derive(Debug)]
struct DocumentInner {
    id: DocumentId,
    version: u64,
    source: Option<NormalizedPath>,
    destination: Option<NormalizedPath>,
    metadata: Metadata,
    content: ContentProvider,
}

/// Immutable content plus metadata flowing through pipeline phases.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    /// Start a brand-new document lineage.
    pub fn builder() -> DocumentBuilder {
        DocumentBuilder {
            id: None,
            version: 0,
            source: None,
            destination: None,
            metadata: Metadata::new(),
            content: None,
        }
    }

    /// Convenience for an in-memory document with text content.
    pub fn from_text(source: impl Into<NormalizedPath>, text: impl Into<String>) -> Self {
        let source = source.into();
        Self::builder()
            .destination(source.clone())
            .source(source)
            .content(ContentProvider::from_string(text))
            .build()
    }

    /// Start a new revision of this document.
    ///
    /// The revision keeps the id and source, inherits destination, metadata
    /// and content unless replaced, and gets `version + 1`.
    pub fn derive(&self) -> DocumentBuilder {
        DocumentBuilder {
            id: Some(self.inner.id),
            version: self.inner.version + 1,
            source: self.inner.source.clone(),
            destination: self.inner.destination.clone(),
            metadata: self.inner.metadata.clone(),
            content: Some(self.inner.content.clone()),
        }
    }

    /// Revision with extra or overridden metadata.
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<Value>) -> Document {
        self.derive().metadata(key, value).build()
    }

    /// Revision with new content.
    pub fn with_content(&self, content: ContentProvider) -> Document {
        self.derive().content(content).build()
    }

    pub fn id(&self) -> DocumentId {
        self.inner.id
    }

    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn source(&self) -> Option<&NormalizedPath> {
        self.inner.source.as_ref()
    }

    pub fn destination(&self) -> Option<&NormalizedPath> {
        self.inner.destination.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.metadata.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.inner.metadata.get_str(key)
    }

    pub fn content(&self) -> &ContentProvider {
        &self.inner.content
    }

    /// Whether both handles point to the very same document value.
    pub fn same_as(&self, other: &Document) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Label used in logs and findings.
    pub fn display_name(&self) -> String {
        match (&self.inner.source, &self.inner.destination) {
            (Some(source), _) => source.to_string(),
            (None, Some(destination)) => destination.to_string(),
            (None, None) => self.inner.id.to_string(),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.inner.id)
            .field("version", &self.inner.version)
            .field("source", &self.inner.source)
            .field("destination", &self.inner.destination)
            .field("metadata_keys", &self.inner.metadata.len())
            .finish()
    }
}

/// Builder for new documents and new revisions.
#[derive(Debug)]
pub struct DocumentBuilder {
    id: Option<DocumentId>,
    version: u64,
    source: Option<NormalizedPath>,
    destination: Option<NormalizedPath>,
    metadata: Metadata,
    content: Option<ContentProvider>,
}

impl DocumentBuilder {
    /// Set the source. Ignored for revisions, whose source is fixed by lineage.
    pub fn source(mut self, source: impl Into<NormalizedPath>) -> Self {
        if self.id.is_none() {
            self.source = Some(source.into());
        }
        self
    }

    pub fn destination(mut self, destination: impl Into<NormalizedPath>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn clear_destination(mut self) -> Self {
        self.destination = None;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn merge_metadata(mut self, metadata: &Metadata) -> Self {
        self.metadata.merge(metadata);
        self
    }

    pub fn remove_metadata(mut self, key: &str) -> Self {
        self.metadata.remove(key);
        self
    }

    pub fn content(mut self, content: ContentProvider) -> Self {
        self.content = Some(content);
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.content(ContentProvider::from_string(text))
    }

    pub fn build(self) -> Document {
        Document {
            inner: Arc::new(DocumentInner {
                id: self.id.unwrap_or_else(DocumentId::next),
                version: self.version,
                source: self.source,
                destination: self.destination,
                metadata: self.metadata,
                content: self.content.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_documents_get_distinct_ids() {
        let a = Document::from_text("a.md", "a");
        let b = Document::from_text("b.md", "b");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.version(), 0);
    }

    #[test]
    fn test_derive_keeps_lineage_and_bumps_version() {
        let original = Document::builder()
            .source("posts/one.md")
            .destination("posts/one.md")
            .metadata("title", "One")
            .text("body")
            .build();

        let revised = original.derive().metadata("layout", "post").build();
        let again = revised.with_metadata("title", "Uno");

        assert_eq!(revised.id(), original.id());
        assert_eq!(revised.version(), 1);
        assert_eq!(again.version(), 2);
        assert_eq!(again.source().unwrap().as_str(), "posts/one.md");
        assert_eq!(again.get("title"), Some(&json!("Uno")));
        assert_eq!(again.get("layout"), Some(&json!("post")));
        // The original is untouched.
        assert_eq!(original.get("title"), Some(&json!("One")));
        assert!(original.get("layout").is_none());
    }

    #[test]
    fn test_metadata_only_revision_shares_content() {
        let original = Document::from_text("a.txt", "shared");
        let revised = original.with_metadata("k", 1);
        assert!(revised.content().ptr_eq(original.content()));

        let replaced = original.with_content(ContentProvider::from_string("new"));
        assert!(!replaced.content().ptr_eq(original.content()));
        assert_eq!(replaced.content().read_string().unwrap(), "new");
    }

    #[test]
    fn test_revision_cannot_change_source() {
        let original = Document::from_text("a.txt", "x");
        let revised = original.derive().source("b.txt").destination("b.html").build();
        assert_eq!(revised.source().unwrap().as_str(), "a.txt");
        assert_eq!(revised.destination().unwrap().as_str(), "b.html");
    }

    #[test]
    fn test_handle_clone_is_same_document() {
        let doc = Document::from_text("a.txt", "x");
        let handle = doc.clone();
        assert!(doc.same_as(&handle));
        assert!(!doc.same_as(&doc.with_metadata("k", "v")));
    }
}
