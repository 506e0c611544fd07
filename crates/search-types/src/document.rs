//! Document identifiers.
//!
//! Every indexable document is addressed by an opaque `prefix:identifier`
//! string. The prefix selects the resolver that knows how to materialize it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// A globally unique `prefix:identifier` document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId {
    raw: String,
    split: usize,
}

impl DocumentId {
    /// Build an id from its parts.
    pub fn new(prefix: &str, identifier: &str) -> Result<Self, SearchError> {
        Self::parse(&format!("{prefix}:{identifier}"))
    }

    /// Parse a `prefix:identifier` string.
    ///
    /// The prefix must be non-empty and must not contain `:`; the identifier
    /// may contain anything, including further colons.
    pub fn parse(raw: &str) -> Result<Self, SearchError> {
        match raw.find(':') {
            Some(split) if split > 0 => Ok(Self {
                raw: raw.to_string(),
                split,
            }),
            _ => Err(SearchError::InvalidDocumentId(raw.to_string())),
        }
    }

    /// The resolver prefix (text before the first `:`).
    pub fn prefix(&self) -> &str {
        &self.raw[..self.split]
    }

    /// The opaque identifier with the prefix stripped.
    pub fn identifier(&self) -> &str {
        &self.raw[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DocumentId {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = SearchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.raw
    }
}

/// Encoded security context stored with every index document:
/// `containerId` or `containerId|subResourceId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecurityContext {
    pub container_id: String,
    pub sub_resource_id: Option<String>,
}

impl SecurityContext {
    pub fn container(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            sub_resource_id: None,
        }
    }

    pub fn with_resource(container_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            sub_resource_id: Some(resource.into()),
        }
    }

    pub fn encode(&self) -> String {
        match &self.sub_resource_id {
            Some(resource) => format!("{}|{}", self.container_id, resource),
            None => self.container_id.clone(),
        }
    }

    /// Decode a stored security context. An empty sub-resource part is
    /// treated as absent.
    pub fn decode(encoded: &str) -> Self {
        match encoded.split_once('|') {
            Some((container, resource)) if !resource.is_empty() => {
                Self::with_resource(container, resource)
            }
            Some((container, _)) => Self::container(container),
            None => Self::container(encoded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_first_colon() {
        let id = DocumentId::parse("file:/data/a:b.txt").unwrap();
        assert_eq!(id.prefix(), "file");
        assert_eq!(id.identifier(), "/data/a:b.txt");
        assert_eq!(id.to_string(), "file:/data/a:b.txt");
    }

    #[test]
    fn test_parse_rejects_missing_prefix() {
        assert!(DocumentId::parse("no-prefix").is_err());
        assert!(DocumentId::parse(":empty").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = DocumentId::new("wiki", "page-1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"wiki:page-1\"");
        let back: DocumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_security_context_codec() {
        let plain = SecurityContext::decode("c1");
        assert_eq!(plain, SecurityContext::container("c1"));
        assert_eq!(plain.encode(), "c1");

        let scoped = SecurityContext::decode("c1|r1");
        assert_eq!(scoped.sub_resource_id.as_deref(), Some("r1"));
        assert_eq!(scoped.encode(), "c1|r1");

        assert_eq!(SecurityContext::decode("c2|"), SecurityContext::container("c2"));
    }
}
