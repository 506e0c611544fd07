//! The resource resolver contract.
//!
//! A document id has the form `prefix:identifier`. The prefix selects a
//! [`ResourceResolver`] registered at startup; the resolver turns the
//! identifier into a [`Resource`] that exposes the document's current
//! content and metadata. Resources are resolved when a worker picks the
//! item up, not when it is queued.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use search_types::{DocumentId, SecurityContext};
use tracing::debug;

/// A document as seen by the indexer.
pub trait Resource: Send + Sync {
    fn id(&self) -> &DocumentId;

    /// Display name; the title of last resort.
    fn name(&self) -> &str;

    fn exists(&self) -> bool;

    /// Raw bytes. I/O errors are treated as transient.
    fn content(&self) -> std::io::Result<Vec<u8>>;

    /// Declared MIME type.
    fn content_type(&self) -> String;

    /// Size in bytes, when known without reading the content.
    fn content_length(&self) -> Option<u64> {
        None
    }

    fn modified(&self) -> Option<DateTime<Utc>>;

    fn security_context(&self) -> SecurityContext;

    /// Free-form metadata; see `search_index::document::property` for the
    /// keys that feed weighted fields.
    fn properties(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// URL shown with search hits.
    fn url(&self) -> Option<String> {
        None
    }

    /// Whether this resource should be indexed at all.
    fn should_index(&self) -> bool {
        true
    }
}

/// Materializes resources for one id prefix.
pub trait ResourceResolver: Send + Sync {
    /// `identifier` is the document id with its prefix stripped.
    fn resolve(&self, identifier: &str) -> Option<Arc<dyn Resource>>;
}

/// Resolvers keyed by id prefix.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: RwLock<HashMap<String, Arc<dyn ResourceResolver>>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resolver` for `prefix`, replacing any previous one.
    pub fn register(&self, prefix: impl Into<String>, resolver: Arc<dyn ResourceResolver>) {
        let prefix = prefix.into();
        debug!(prefix = %prefix, "Registered resource resolver");
        self.resolvers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(prefix, resolver);
    }

    /// Resolve a full `prefix:identifier` id. Unknown prefixes and malformed
    /// ids resolve to nothing.
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Resource>> {
        let (prefix, identifier) = id.split_once(':')?;
        let resolver = self
            .resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(prefix)
            .cloned()?;
        resolver.resolve(identifier)
    }

    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self
            .resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        prefixes.sort();
        prefixes
    }
}

/// A resource held entirely in memory. Useful for documents generated by
/// providers and in tests.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    pub id: DocumentId,
    pub name: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub modified: Option<DateTime<Utc>>,
    pub security_context: SecurityContext,
    pub properties: BTreeMap<String, String>,
    pub url: Option<String>,
}

impl MemoryResource {
    pub fn new(id: DocumentId, container_id: &str, content_type: &str, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: id.identifier().to_string(),
            id,
            content: content.into(),
            content_type: content_type.to_string(),
            modified: None,
            security_context: SecurityContext::container(container_id),
            properties: BTreeMap::new(),
            url: None,
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_security_context(mut self, context: SecurityContext) -> Self {
        self.security_context = context;
        self
    }
}

impl Resource for MemoryResource {
    fn id(&self) -> &DocumentId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> bool {
        true
    }

    fn content(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.content.clone())
    }

    fn content_type(&self) -> String {
        self.content_type.clone()
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.content.len() as u64)
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    fn security_context(&self) -> SecurityContext {
        self.security_context.clone()
    }

    fn properties(&self) -> BTreeMap<String, String> {
        self.properties.clone()
    }

    fn url(&self) -> Option<String> {
        self.url.clone()
    }
}

/// Resolver over a mutable set of [`MemoryResource`]s.
#[derive(Default)]
pub struct MemoryResolver {
    resources: RwLock<HashMap<String, Arc<MemoryResource>>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource: MemoryResource) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.id.identifier().to_string(), Arc::new(resource));
    }

    pub fn remove(&self, identifier: &str) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier);
    }
}

impl ResourceResolver for MemoryResolver {
    fn resolve(&self, identifier: &str) -> Option<Arc<dyn Resource>> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .map(|r| r.clone() as Arc<dyn Resource>)
    }
}
