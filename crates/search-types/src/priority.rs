//! Work item priority and operation kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Scheduling priority of a work item.
///
/// Variants are declared from least to most urgent so the derived `Ord`
/// makes `Commit` the maximum: a max-heap pops commit work first and crawl
/// continuations last.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Crawl,
    Background,
    #[default]
    Bulk,
    Item,
    Delete,
    Commit,
}

impl Priority {
    pub const ALL: [Priority; 6] = [
        Priority::Commit,
        Priority::Delete,
        Priority::Item,
        Priority::Bulk,
        Priority::Background,
        Priority::Crawl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Crawl => "crawl",
            Priority::Background => "background",
            Priority::Bulk => "bulk",
            Priority::Item => "item",
            Priority::Delete => "delete",
            Priority::Commit => "commit",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SearchError::InvalidInput(format!("unknown priority: {s}")))
    }
}

/// What a resource work item does to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    Delete,
    Noop,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Delete => "delete",
            Operation::Noop => "noop",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
