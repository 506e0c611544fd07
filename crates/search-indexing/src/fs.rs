//! The local filesystem as a resource tree.
//!
//! Files under a root directory are exposed as documents with ids
//! `file:/relative/path`. All paths are normalized through [`CrawlPath`],
//! which rejects `..`, so nothing outside the root is reachable.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use search_index::document::property;
use search_storage::CrawlPath;
use search_types::{DocumentId, Priority, SecurityContext};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::crawler::{ResourceTree, TreeNode};
use crate::error::IndexingError;
use crate::provider::DocumentProvider;
use crate::resource::{Resource, ResourceResolver};
use crate::task::IndexTask;

pub const FILE_PREFIX: &str = "file";

fn document_id(path: &CrawlPath) -> String {
    format!("{FILE_PREFIX}:{path}")
}

fn to_disk(root: &Path, path: &CrawlPath) -> PathBuf {
    root.join(path.as_str().trim_start_matches('/'))
}

fn modified_time(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

/// A file on disk.
pub struct FileResource {
    id: DocumentId,
    path: PathBuf,
    container_id: String,
    metadata: Option<fs::Metadata>,
}

impl FileResource {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Resource for FileResource {
    fn id(&self) -> &DocumentId {
        &self.id
    }

    fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_else(|| self.id.identifier())
    }

    fn exists(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| m.is_file())
    }

    fn content(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    fn content_type(&self) -> String {
        mime_guess::from_path(&self.path)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    fn content_length(&self) -> Option<u64> {
        self.metadata.as_ref().map(|m| m.len())
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        self.metadata.as_ref().and_then(modified_time)
    }

    fn security_context(&self) -> SecurityContext {
        SecurityContext::container(self.container_id.clone())
    }

    fn properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        if let Some(ext) = self.path.extension().and_then(|e| e.to_str()) {
            properties.insert(property::CATEGORIES.to_string(), format!("file {ext}"));
        }
        properties
    }

    fn url(&self) -> Option<String> {
        Some(format!("file://{}", self.path.display()))
    }
}

/// Resolves `file:` ids against a root directory.
pub struct FileResolver {
    root: PathBuf,
    container_id: String,
}

impl FileResolver {
    pub fn new(root: impl Into<PathBuf>, container_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            container_id: container_id.into(),
        }
    }
}

impl ResourceResolver for FileResolver {
    fn resolve(&self, identifier: &str) -> Option<Arc<dyn Resource>> {
        let path = match CrawlPath::new(identifier) {
            Ok(path) if !path.is_root() => path,
            Ok(_) => return None,
            Err(e) => {
                warn!(identifier, error = %e, "Rejected file identifier");
                return None;
            }
        };
        let id = DocumentId::new(FILE_PREFIX, path.as_str()).ok()?;
        let disk = to_disk(&self.root, &path);
        let metadata = fs::metadata(&disk).ok();
        Some(Arc::new(FileResource {
            id,
            path: disk,
            container_id: self.container_id.clone(),
            metadata,
        }))
    }
}

/// Directory listing over a root directory.
pub struct FileSystemTree {
    root: PathBuf,
}

impl FileSystemTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceTree for FileSystemTree {
    fn list(&self, path: &CrawlPath) -> Result<Option<Vec<TreeNode>>, IndexingError> {
        let dir = to_disk(&self.root, path);
        if !dir.is_dir() {
            return Ok(None);
        }
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut nodes = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                continue;
            };
            // Follows symlinks; entries that vanish mid-listing are skipped
            let Ok(metadata) = fs::metadata(entry.path()) else {
                continue;
            };
            let child = path.join(&name)?;
            if metadata.is_dir() {
                nodes.push(TreeNode::Directory(child));
            } else if metadata.is_file() {
                nodes.push(TreeNode::Document {
                    id: document_id(&child),
                    modified: modified_time(&metadata),
                });
            }
        }
        nodes.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));
        Ok(Some(nodes))
    }
}

/// Enumerates every file under a root for bulk reindexing.
pub struct FileSystemProvider {
    root: PathBuf,
    container_id: String,
    excluded_directories: Vec<String>,
}

impl FileSystemProvider {
    pub fn new(
        root: impl Into<PathBuf>,
        container_id: impl Into<String>,
        excluded_directories: Vec<String>,
    ) -> Self {
        Self {
            root: root.into(),
            container_id: container_id.into(),
            excluded_directories,
        }
    }

    fn relative_path(&self, path: &Path) -> Option<CrawlPath> {
        let relative = path.strip_prefix(&self.root).ok()?.to_str()?;
        CrawlPath::new(relative).ok()
    }
}

impl DocumentProvider for FileSystemProvider {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn enumerate_documents(
        &self,
        task: &Arc<IndexTask>,
        container: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<(), IndexingError> {
        if container.is_some_and(|c| c != self.container_id) {
            return Ok(());
        }

        let walker = WalkDir::new(&self.root).follow_links(true).into_iter();
        let mut queued = 0usize;
        for entry in walker.filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !self
                    .excluded_directories
                    .iter()
                    .any(|d| e.file_name().to_str() == Some(d.as_str()))
        }) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(since) = since {
                let modified = entry.metadata().ok().as_ref().and_then(modified_time);
                if modified.is_some_and(|m| m <= since) {
                    continue;
                }
            }
            let Some(path) = self.relative_path(entry.path()) else {
                continue;
            };
            task.add_resource(&document_id(&path), Priority::Bulk)?;
            queued += 1;
        }
        debug!(root = %self.root.display(), queued, "Enumerated filesystem documents");
        Ok(())
    }
}
