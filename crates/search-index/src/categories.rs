//! Registry of the categories a search may be restricted to.

use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use tracing::debug;

/// Category of indexed files and attachments.
pub const FILE_CATEGORY: &str = "file";
/// Category of folder and project navigation pages.
pub const NAVIGATION_CATEGORY: &str = "navigation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchCategory {
    /// Term stored in the categories field. Always lowercase.
    pub name: String,
    pub description: String,
}

impl SearchCategory {
    pub fn new(name: &str, description: impl Into<String>) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            description: description.into(),
        }
    }
}

/// Registered categories, in registration order.
#[derive(Debug)]
pub struct CategoryRegistry {
    categories: RwLock<Vec<SearchCategory>>,
}

impl CategoryRegistry {
    /// A registry holding only the built-in `file` and `navigation`
    /// categories.
    pub fn new() -> Self {
        Self {
            categories: RwLock::new(vec![
                SearchCategory::new(FILE_CATEGORY, "Files and Attachments"),
                SearchCategory::new(NAVIGATION_CATEGORY, "Folders"),
            ]),
        }
    }

    /// Register `category`. Returns false if one with the same name exists.
    pub fn add(&self, category: SearchCategory) -> bool {
        let mut categories = self
            .categories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if categories.iter().any(|c| c.name == category.name) {
            return false;
        }
        debug!(category = %category.name, "Registered search category");
        categories.push(category);
        true
    }

    /// Look up a category by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<SearchCategory> {
        let name = name.trim().to_lowercase();
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn list(&self) -> Vec<SearchCategory> {
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
