//! Core data types for Flint.
//!
//! Small value types shared by jobs, queues and the manager. None of them
//! carry scheduling state; they only identify and classify work.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority of an indexing job.
///
/// `High` always sorts before `Low`, so a high priority job is dequeued
/// before any low priority job of the same lane, whenever it was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Processed before every `Low` job
    High,
    /// Processed after every `High` job
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Low
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "low" => Ok(Priority::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// The queue lane a job is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Drained by the multi-worker pool
    Multi,
    /// Drained by the dedicated single worker, in strict order
    Single,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Multi => write!(f, "multi"),
            Lane::Single => write!(f, "single"),
        }
    }
}

/// Attribution identity for a submission.
///
/// Only used to filter status queries and for logging; the scheduler never
/// depends on it for correctness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester(pub String);

impl Requester {
    /// Create a new requester
    pub fn new(id: impl Into<String>) -> Self {
        Requester(id.into())
    }

    /// Get the requester ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Requester {
    fn from(s: &str) -> Self {
        Requester(s.to_string())
    }
}

/// Opaque tag describing what kind of content a job refers to.
///
/// The tag is interpreted by the content fetcher only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentType(pub String);

impl ContentType {
    /// Create a new content type
    pub fn new(name: impl Into<String>) -> Self {
        ContentType(name.into())
    }

    /// Get the content type name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContentType {
    fn from(s: &str) -> Self {
        ContentType(s.to_string())
    }
}
