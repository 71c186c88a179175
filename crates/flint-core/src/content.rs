//! Content acquisition traits.
//!
//! Flint never reads files, databases or remote APIs itself. A
//! `ContentFetcher` turns a job's content identity into a `Content` value
//! that the worker can inspect, translate and apply to an index.
//!
//! ## Implementing a Fetcher
//!
//! 1. Implement `Content` for whatever your source yields
//! 2. Implement `ContentFetcher` to build it from an `IndexJob`
//! 3. Pass the fetcher to `IndexManager::new`

use crate::job::IndexJob;
use std::fmt;
use std::io::Read;

/// Rule identifying the documents a content item replaces or removes.
///
/// A term rule matches documents whose `field` equals `value`. A query rule
/// is an opaque query string interpreted by the index implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeleteRule {
    /// Match documents by exact field value
    Term { field: String, value: String },
    /// Match documents with an index-specific query
    Query(String),
}

impl DeleteRule {
    /// Create a term rule
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        DeleteRule::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a query rule
    pub fn query(query: impl Into<String>) -> Self {
        DeleteRule::Query(query.into())
    }

    /// True if this rule matches by term
    pub fn uses_term(&self) -> bool {
        matches!(self, DeleteRule::Term { .. })
    }
}

impl fmt::Display for DeleteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteRule::Term { field, value } => write!(f, "{}={}", field, value),
            DeleteRule::Query(query) => write!(f, "query({})", query),
        }
    }
}

/// A piece of content fetched for a job.
///
/// ## Thread Safety
///
/// Content is created and consumed by a single worker, but it must be `Send`
/// so fetchers can build it on any pool thread.
pub trait Content: Send {
    /// Whether the content no longer exists and its documents must be deleted
    fn is_deleted(&self) -> anyhow::Result<bool>;

    /// The media type used to select a translator (e.g. "application/xml")
    fn media_type(&self) -> anyhow::Result<String>;

    /// Open the raw content bytes
    fn source(&self) -> anyhow::Result<Box<dyn Read + Send>>;

    /// The rule selecting documents this content replaces (or removes when deleted)
    fn delete_rule(&self) -> Option<DeleteRule>;
}

/// Retrieves content for indexing jobs.
///
/// Implementations must be `Send + Sync`: the same fetcher is shared by every
/// worker thread of a manager.
pub trait ContentFetcher: Send + Sync {
    /// Fetch the content a job refers to.
    fn get_content(&self, job: &IndexJob) -> anyhow::Result<Box<dyn Content>>;
}

/// Content held in memory, mostly useful for tests and for callers that
/// already have the bytes at hand.
#[derive(Debug, Clone)]
pub struct InMemoryContent {
    media_type: String,
    bytes: Vec<u8>,
    deleted: bool,
    delete_rule: Option<DeleteRule>,
}

impl InMemoryContent {
    /// Create content from bytes and a media type
    pub fn new(media_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        InMemoryContent {
            media_type: media_type.into(),
            bytes: bytes.into(),
            deleted: false,
            delete_rule: None,
        }
    }

    /// Create a deleted content marker
    pub fn deleted(media_type: impl Into<String>, rule: DeleteRule) -> Self {
        InMemoryContent {
            media_type: media_type.into(),
            bytes: Vec::new(),
            deleted: true,
            delete_rule: Some(rule),
        }
    }

    /// Set the delete rule
    pub fn with_delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = Some(rule);
        self
    }
}

impl Content for InMemoryContent {
    fn is_deleted(&self) -> anyhow::Result<bool> {
        Ok(self.deleted)
    }

    fn media_type(&self) -> anyhow::Result<String> {
        Ok(self.media_type.clone())
    }

    fn source(&self) -> anyhow::Result<Box<dyn Read + Send>> {
        Ok(Box::new(std::io::Cursor::new(self.bytes.clone())))
    }

    fn delete_rule(&self) -> Option<DeleteRule> {
        self.delete_rule.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_rule_display() {
        assert_eq!(DeleteRule::term("_path", "/a.xml").to_string(), "_path=/a.xml");
        assert_eq!(DeleteRule::query("type:doc").to_string(), "query(type:doc)");
        assert!(DeleteRule::term("id", "1").uses_term());
        assert!(!DeleteRule::query("id:1").uses_term());
    }

    #[test]
    fn test_in_memory_content() {
        let content = InMemoryContent::new("text/plain", "hello")
            .with_delete_rule(DeleteRule::term("id", "1"));
        assert!(!content.is_deleted().unwrap());
        assert_eq!(content.media_type().unwrap(), "text/plain");

        let mut text = String::new();
        content.source().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello");
        assert_eq!(content.delete_rule(), Some(DeleteRule::term("id", "1")));
    }
}
