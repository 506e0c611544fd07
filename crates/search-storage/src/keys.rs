//! Key encoding for storage.
//!
//! Crawl paths are stored under their normalized form: a leading `/`, no
//! trailing `/`, no empty segments. The root is `/`. Keeping one canonical
//! spelling makes the path column unique and lets prefix scans select a
//! subtree.

use std::fmt;

use crate::error::StorageError;

/// Settings key holding the crawler Paused/Running flag.
pub const CRAWLER_RUNNING_KEY: &[u8] = b"crawler:running";

/// Normalized virtual path of a crawlable collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrawlPath(String);

impl CrawlPath {
    pub fn root() -> Self {
        CrawlPath("/".to_string())
    }

    /// Normalize a path: backslashes become `/`, empty and `.` segments are
    /// dropped. `..` is rejected.
    pub fn new(raw: &str) -> Result<Self, StorageError> {
        let mut segments = Vec::new();
        for segment in raw.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(StorageError::Key(format!(
                        "Parent segments are not allowed in crawl paths: {}",
                        raw
                    )))
                }
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Ok(Self::root());
        }
        Ok(CrawlPath(format!("/{}", segments.join("/"))))
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<CrawlPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(CrawlPath(self.0[..idx].to_string())),
        }
    }

    /// Append a single child segment.
    pub fn join(&self, name: &str) -> Result<CrawlPath, StorageError> {
        CrawlPath::new(&format!("{}/{}", self.0, name))
    }

    /// Last segment, empty for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// True when `other` is this path or lies beneath it.
    pub fn contains(&self, other: &CrawlPath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0 == self.0
            || (other.0.starts_with(&self.0) && other.0.as_bytes().get(self.0.len()) == Some(&b'/'))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.clone().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        CrawlPath::new(s)
    }
}

impl fmt::Display for CrawlPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(CrawlPath::new("").unwrap(), CrawlPath::root());
        assert_eq!(CrawlPath::new("a/b/").unwrap().as_str(), "/a/b");
        assert_eq!(CrawlPath::new("//a//./b").unwrap().as_str(), "/a/b");
        assert_eq!(CrawlPath::new("\\a\\b").unwrap().as_str(), "/a/b");
        assert!(CrawlPath::new("/a/../b").is_err());
    }

    #[test]
    fn test_parent_chain() {
        let path = CrawlPath::new("/a/b/c").unwrap();
        let parent = path.parent().unwrap();
        assert_eq!(parent.as_str(), "/a/b");
        assert_eq!(parent.parent().unwrap().as_str(), "/a");
        assert_eq!(parent.parent().unwrap().parent().unwrap(), CrawlPath::root());
        assert!(CrawlPath::root().parent().is_none());
    }

    #[test]
    fn test_contains_respects_segment_boundary() {
        let a = CrawlPath::new("/a").unwrap();
        assert!(a.contains(&CrawlPath::new("/a").unwrap()));
        assert!(a.contains(&CrawlPath::new("/a/b").unwrap()));
        assert!(!a.contains(&CrawlPath::new("/ab").unwrap()));
        assert!(CrawlPath::root().contains(&a));
    }

    #[test]
    fn test_join_and_name() {
        let child = CrawlPath::root().join("docs").unwrap();
        assert_eq!(child.as_str(), "/docs");
        assert_eq!(child.name(), "docs");
        assert_eq!(CrawlPath::root().name(), "");
    }
}
