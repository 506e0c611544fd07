//! Documents handed to the index manager.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use search_types::SecurityContext;
use tantivy::TantivyDocument;

use crate::schema::DocumentSchema;

/// Weight of a keyword or identifier term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermWeight {
    Low,
    Medium,
    High,
}

/// Property keys a resource can use to feed the weighted fields.
pub mod property {
    pub const TITLE: &str = "title";
    pub const CATEGORIES: &str = "categories";
    pub const KEYWORDS_LOW: &str = "keywords.low";
    pub const KEYWORDS_MEDIUM: &str = "keywords.medium";
    pub const KEYWORDS_HIGH: &str = "keywords.high";
    pub const IDENTIFIERS_LOW: &str = "identifiers.low";
    pub const IDENTIFIERS_MEDIUM: &str = "identifiers.medium";
    pub const IDENTIFIERS_HIGH: &str = "identifiers.high";
}

/// Text split over low, medium and high weight fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightedText {
    pub low: String,
    pub medium: String,
    pub high: String,
}

impl WeightedText {
    pub fn push(&mut self, weight: TermWeight, text: &str) {
        let target = match weight {
            TermWeight::Low => &mut self.low,
            TermWeight::Medium => &mut self.medium,
            TermWeight::High => &mut self.high,
        };
        if !target.is_empty() {
            target.push(' ');
        }
        target.push_str(text);
    }
}

/// A document ready for indexing. The id is supplied separately to
/// [`IndexManager::index`](crate::IndexManager::index).
#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub security_context: SecurityContext,
    pub title: String,
    pub body: String,
    pub summary: String,
    pub url: Option<String>,
    pub categories: Vec<String>,
    pub keywords: WeightedText,
    pub identifiers: WeightedText,
    pub modified: Option<DateTime<Utc>>,
}

impl IndexDocument {
    pub fn new(security_context: SecurityContext) -> Self {
        Self {
            security_context,
            title: String::new(),
            body: String::new(),
            summary: String::new(),
            url: None,
            categories: Vec::new(),
            keywords: WeightedText::default(),
            identifiers: WeightedText::default(),
            modified: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.add_categories(category);
        self
    }

    pub fn with_keywords(mut self, weight: TermWeight, text: &str) -> Self {
        self.keywords.push(weight, text);
        self
    }

    pub fn with_identifiers(mut self, weight: TermWeight, text: &str) -> Self {
        self.identifiers.push(weight, text);
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Categories are whitespace-separated and matched case-insensitively.
    pub fn add_categories(&mut self, categories: &str) {
        for category in categories.split_whitespace() {
            let category = category.to_lowercase();
            if !self.categories.contains(&category) {
                self.categories.push(category);
            }
        }
    }

    /// Route resource properties into the document. Recognized keys feed
    /// their own fields; anything else is searchable as a low-weight
    /// keyword.
    pub fn apply_properties(&mut self, properties: &BTreeMap<String, String>) {
        for (key, value) in properties {
            if value.trim().is_empty() {
                continue;
            }
            match key.as_str() {
                property::TITLE => {
                    if self.title.is_empty() {
                        self.title = value.clone();
                    }
                }
                property::CATEGORIES => self.add_categories(value),
                property::KEYWORDS_LOW => self.keywords.push(TermWeight::Low, value),
                property::KEYWORDS_MEDIUM => self.keywords.push(TermWeight::Medium, value),
                property::KEYWORDS_HIGH => self.keywords.push(TermWeight::High, value),
                property::IDENTIFIERS_LOW => self.identifiers.push(TermWeight::Low, value),
                property::IDENTIFIERS_MEDIUM => self.identifiers.push(TermWeight::Medium, value),
                property::IDENTIFIERS_HIGH => self.identifiers.push(TermWeight::High, value),
                _ => self.keywords.push(TermWeight::Low, &value.to_lowercase()),
            }
        }
    }

    /// Convert into a Tantivy document for `id`.
    pub fn to_tantivy(&self, id: &str, schema: &DocumentSchema) -> TantivyDocument {
        let mut doc = TantivyDocument::new();
        doc.add_text(schema.id, id);
        doc.add_text(schema.container, &self.security_context.container_id);
        doc.add_text(schema.security_context, self.security_context.encode());
        for category in &self.categories {
            doc.add_text(schema.categories, category);
        }
        doc.add_text(schema.title, &self.title);
        doc.add_text(schema.body, &self.body);
        doc.add_text(schema.summary, &self.summary);
        if let Some(url) = &self.url {
            doc.add_text(schema.url, url);
        }
        doc.add_text(schema.keywords_low, &self.keywords.low);
        doc.add_text(schema.keywords_medium, &self.keywords.medium);
        doc.add_text(schema.keywords_high, &self.keywords.high);
        doc.add_text(schema.identifiers_low, &self.identifiers.low);
        doc.add_text(schema.identifiers_medium, &self.identifiers.medium);
        doc.add_text(schema.identifiers_high, &self.identifiers.high);
        doc.add_i64(
            schema.modified,
            self.modified.map(|m| m.timestamp_millis()).unwrap_or(0),
        );
        doc
    }
}
