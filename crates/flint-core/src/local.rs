//! Local file indexing.
//!
//! - **`LocalFileFetcher`** turns `local-file` jobs into `LocalFileContent`
//! - **`LocalIndexer`** walks a folder and submits one batch of jobs for the
//!   files that were added, changed or removed since the last indexing

use crate::batch::IndexBatch;
use crate::content::{Content, ContentFetcher, DeleteRule};
use crate::error::{FlintError, Result};
use crate::index::Index;
use crate::job::IndexJob;
use crate::manager::IndexManager;
use crate::types::{Priority, Requester};
use anyhow::bail;
use glob::Pattern;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

/// Content type of local file jobs
pub const LOCAL_FILE: &str = "local-file";

/// Field of the delete rule identifying a file's documents
pub const PATH_FIELD: &str = "_path";

/// Media type of a file, from its extension.
pub fn media_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "xml" => "application/xml",
        "xhtml" => "application/xhtml+xml",
        "html" | "htm" => "text/html",
        "txt" | "text" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileContent {
    path: PathBuf,
    root: Option<PathBuf>,
}

impl LocalFileContent {
    /// Create content for a file.
    ///
    /// When `root` is given, the delete rule uses the path relative to it.
    pub fn new(path: impl Into<PathBuf>, root: Option<PathBuf>) -> Self {
        LocalFileContent {
            path: path.into(),
            root,
        }
    }

    /// The file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Content for LocalFileContent {
    fn is_deleted(&self) -> anyhow::Result<bool> {
        Ok(!self.path.exists())
    }

    fn media_type(&self) -> anyhow::Result<String> {
        Ok(media_type_for(&self.path).to_string())
    }

    fn source(&self) -> anyhow::Result<Box<dyn Read + Send>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn delete_rule(&self) -> Option<DeleteRule> {
        let path = self
            .root
            .as_ref()
            .and_then(|root| self.path.strip_prefix(root).ok())
            .unwrap_or(&self.path);
        let value = path.to_string_lossy().replace('\\', "/");
        Some(DeleteRule::term(PATH_FIELD, value))
    }
}

/// Fetches `local-file` content. The content ID is the file path.
#[derive(Debug, Clone, Default)]
pub struct LocalFileFetcher {
    root: Option<PathBuf>,
}

impl LocalFileFetcher {
    /// Create a fetcher using absolute paths in delete rules
    pub fn new() -> Self {
        LocalFileFetcher { root: None }
    }

    /// Create a fetcher using paths relative to `root` in delete rules
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        LocalFileFetcher {
            root: Some(root.into()),
        }
    }
}

impl ContentFetcher for LocalFileFetcher {
    fn get_content(&self, job: &IndexJob) -> anyhow::Result<Box<dyn Content>> {
        if job.content_type().as_str() != LOCAL_FILE {
            bail!("unsupported content type {}", job.content_type());
        }
        Ok(Box::new(LocalFileContent::new(job.content_id(), self.root.clone())))
    }
}

/// What a folder indexing pass does with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// The file was never indexed
    Insert,
    /// The file changed since it was indexed
    Update,
    /// The file was indexed but no longer exists
    Delete,
}

/// Outcome of `LocalIndexer::index_folder`.
#[derive(Debug)]
pub struct LocalIndexReport {
    /// The batch the jobs were submitted in
    pub batch: Arc<IndexBatch>,
    /// Action submitted for each file
    pub actions: BTreeMap<PathBuf, Action>,
}

impl LocalIndexReport {
    /// Number of files with the given action
    pub fn count(&self, action: Action) -> usize {
        self.actions.values().filter(|a| **a == action).count()
    }
}

/// Walks a folder and submits a batch of jobs for the files to index.
///
/// ## Example
///
/// ```rust,ignore
/// let indexer = LocalIndexer::new(index.clone())
///     .with_include(vec!["*.xml".to_string()])
///     .with_exclude_dirs(vec![".git".to_string()]);
/// let report = indexer.index_folder(&manager, Path::new("/data"), None)?;
/// println!("{} files submitted", report.actions.len());
/// ```
pub struct LocalIndexer {
    index: Arc<dyn Index>,
    requester: Requester,
    priority: Priority,
    include: Vec<String>,
    exclude_dirs: Vec<String>,
    follow_links: bool,
    modified_since: Option<SystemTime>,
}

impl LocalIndexer {
    /// Create an indexer writing to `index`
    pub fn new(index: Arc<dyn Index>) -> Self {
        LocalIndexer {
            index,
            requester: Requester::new("Local Indexer"),
            priority: Priority::Low,
            include: Vec::new(),
            exclude_dirs: Vec::new(),
            follow_links: true,
            modified_since: None,
        }
    }

    /// Set the job priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the requester
    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = requester;
        self
    }

    /// Only index files whose name matches one of these globs (empty = all)
    pub fn with_include(mut self, patterns: Vec<String>) -> Self {
        self.include = patterns;
        self
    }

    /// Skip directories whose name or relative path matches one of these globs
    pub fn with_exclude_dirs(mut self, patterns: Vec<String>) -> Self {
        self.exclude_dirs = patterns;
        self
    }

    /// Follow symbolic links
    pub fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Skip files not modified after this time
    pub fn with_modified_since(mut self, since: Option<SystemTime>) -> Self {
        self.modified_since = since;
        self
    }

    /// Index a folder.
    ///
    /// `indexed` maps files already in the index to their modification time
    /// when they were indexed. New files are inserted, files whose time
    /// differs are updated, unchanged files are skipped and indexed files
    /// missing from the folder are deleted. The batch is marked computed once
    /// every job is submitted.
    #[instrument(skip(self, manager, indexed), fields(root = %root.display(), index = %self.index.index_id()))]
    pub fn index_folder(
        &self,
        manager: &IndexManager,
        root: &Path,
        indexed: Option<HashMap<PathBuf, SystemTime>>,
    ) -> Result<LocalIndexReport> {
        if !root.is_dir() {
            return Err(FlintError::invalid_job(format!(
                "{} is not a folder",
                root.display()
            )));
        }
        let root = root.canonicalize()?;
        let include = compile_patterns(&self.include)?;
        let exclude_dirs = compile_patterns(&self.exclude_dirs)?;

        let mut indexed = indexed.unwrap_or_default();
        let batch = Arc::new(IndexBatch::new(self.index.index_id()));
        let mut actions = BTreeMap::new();

        // A failed submission ends discovery; the jobs already submitted still complete the batch
        let abort = |e: FlintError| {
            manager.mark_computed(&batch);
            e
        };

        let walker = WalkDir::new(&root)
            .follow_links(self.follow_links)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_excluded_dir(e, &root, &exclude_dirs));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Failed to collect file");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if !include.is_empty() && !include.iter().any(|p| p.matches(&name)) {
                continue;
            }

            let path = entry.path().to_path_buf();
            let previous = indexed.remove(&path);
            let modified = entry.metadata().ok().and_then(|m| m.modified().ok());

            if let (Some(since), Some(modified)) = (self.modified_since, modified) {
                if modified <= since {
                    continue;
                }
            }

            let action = match previous {
                None => Action::Insert,
                Some(at) if Some(at) != modified => Action::Update,
                Some(_) => {
                    debug!(path = %path.display(), "File unchanged");
                    continue;
                }
            };
            self.submit(manager, &batch, &path).map_err(&abort)?;
            actions.insert(path, action);
        }

        for path in indexed.into_keys() {
            self.submit(manager, &batch, &path).map_err(&abort)?;
            actions.insert(path, Action::Delete);
        }

        manager.mark_computed(&batch);

        let report = LocalIndexReport { batch, actions };
        info!(
            insert = report.count(Action::Insert),
            update = report.count(Action::Update),
            delete = report.count(Action::Delete),
            "Folder indexing submitted"
        );
        Ok(report)
    }

    fn submit(&self, manager: &IndexManager, batch: &Arc<IndexBatch>, path: &Path) -> Result<()> {
        manager.index_batch(
            batch,
            path.to_string_lossy(),
            LOCAL_FILE,
            self.index.clone(),
            self.requester.clone(),
            self.priority,
            HashMap::new(),
        )?;
        Ok(())
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| FlintError::ConfigError {
                reason: format!("invalid pattern {}: {}", p, e),
            })
        })
        .collect()
}

fn is_excluded_dir(entry: &DirEntry, root: &Path, patterns: &[Pattern]) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
    patterns
        .iter()
        .any(|p| p.matches(&name) || p.matches_path(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ChannelListener, ListenerEvent};
    use crate::manager::ManagerConfig;
    use crate::memory::MemoryIndex;
    use crate::translate::PlainTextTranslatorFactory;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_media_types() {
        assert_eq!(media_type_for(Path::new("a.XML")), "application/xml");
        assert_eq!(media_type_for(Path::new("notes.txt")), "text/plain");
        assert_eq!(media_type_for(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn test_local_file_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("docs").join("a.xml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "<a/>").unwrap();

        let content = LocalFileContent::new(&path, Some(temp_dir.path().to_path_buf()));
        assert!(!content.is_deleted().unwrap());
        assert_eq!(content.media_type().unwrap(), "application/xml");
        assert_eq!(content.delete_rule(), Some(DeleteRule::term("_path", "docs/a.xml")));

        let mut text = String::new();
        content.source().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "<a/>");

        fs::remove_file(&path).unwrap();
        assert!(content.is_deleted().unwrap());
    }

    #[test]
    fn test_index_folder() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        fs::write(root.join("a.xml"), "<a/>").unwrap();
        fs::write(root.join("b.txt"), "bee").unwrap();
        fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
        fs::create_dir_all(root.join("skip")).unwrap();
        fs::write(root.join("skip").join("c.xml"), "<c/>").unwrap();

        let (listener, events) = ChannelListener::new();
        let config = ManagerConfig {
            threads: 2,
            ..ManagerConfig::default()
        };
        let manager = IndexManager::new(Arc::new(LocalFileFetcher::new()), Arc::new(listener), config).unwrap();
        manager.register_translator_factory(Arc::new(PlainTextTranslatorFactory));
        let index = MemoryIndex::new("local", manager.open_indexes().clone());

        // A file indexed earlier that has since been removed
        let gone = root.join("gone.xml");
        let mut indexed = HashMap::new();
        indexed.insert(gone.clone(), SystemTime::UNIX_EPOCH);

        let report = LocalIndexer::new(index.clone())
            .with_include(vec!["*.xml".to_string(), "*.txt".to_string()])
            .with_exclude_dirs(vec!["skip".to_string()])
            .index_folder(&manager, &root, Some(indexed))
            .unwrap();

        assert_eq!(report.count(Action::Insert), 2);
        assert_eq!(report.count(Action::Delete), 1);
        assert_eq!(report.actions.get(&gone), Some(&Action::Delete));
        assert!(!report.actions.contains_key(&root.join("skip").join("c.xml")));

        loop {
            match events.recv_timeout(Duration::from_secs(5)).unwrap() {
                ListenerEvent::EndBatch(batch) => {
                    assert!(Arc::ptr_eq(&batch, &report.batch));
                    break;
                }
                ListenerEvent::Error { message, .. } => panic!("unexpected error: {}", message),
                _ => {}
            }
        }

        manager.shutdown(Duration::from_secs(5));
        let a_key = format!("_path={}", root.join("a.xml").to_string_lossy().replace('\\', "/"));
        assert_eq!(index.document(&a_key), Some(b"<a/>".to_vec()));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_unchanged_files_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let path = root.join("a.xml");
        fs::write(&path, "<a/>").unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        let (listener, _events) = ChannelListener::new();
        let manager =
            IndexManager::new(Arc::new(LocalFileFetcher::new()), Arc::new(listener), ManagerConfig::default())
                .unwrap();
        let index = MemoryIndex::new("local", manager.open_indexes().clone());

        let mut indexed = HashMap::new();
        indexed.insert(path.clone(), modified);
        let report = LocalIndexer::new(index)
            .index_folder(&manager, &root, Some(indexed))
            .unwrap();

        assert!(report.actions.is_empty());
        assert!(report.batch.is_finished());
        manager.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_missing_folder() {
        let temp_dir = TempDir::new().unwrap();
        let (listener, _events) = ChannelListener::new();
        let manager =
            IndexManager::new(Arc::new(LocalFileFetcher::new()), Arc::new(listener), ManagerConfig::default())
                .unwrap();
        let index = MemoryIndex::new("local", manager.open_indexes().clone());

        let result = LocalIndexer::new(index).index_folder(&manager, &temp_dir.path().join("nope"), None);
        assert!(matches!(result, Err(FlintError::InvalidJob { .. })));
        manager.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_failed_submission_ends_batch() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.xml"), "<a/>").unwrap();

        let (listener, events) = ChannelListener::new();
        let manager =
            IndexManager::new(Arc::new(LocalFileFetcher::new()), Arc::new(listener), ManagerConfig::default())
                .unwrap();
        let index = MemoryIndex::new("local", manager.open_indexes().clone());
        manager.shutdown(Duration::from_secs(5));

        let result = LocalIndexer::new(index).index_folder(&manager, temp_dir.path(), None);
        assert!(matches!(result, Err(FlintError::ShuttingDown)));

        let ended = events
            .try_iter()
            .find_map(|e| match e {
                ListenerEvent::EndBatch(batch) => Some(batch),
                _ => None,
            })
            .expect("batch did not end");
        assert!(ended.is_computed());
        assert_eq!(ended.total_count(), 0);
    }
}
