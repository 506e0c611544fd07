//! Per-user result filtering.
//!
//! Each indexed document carries an encoded security context,
//! `container` or `container|resource`. A [`SecurityFilter`] is built per
//! query from the containers the user may read within the search scope;
//! [`SecureCollector`] wraps any collector and drops hits the filter
//! rejects before they are counted or ranked.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use search_types::SecurityContext;
use tantivy::collector::{Collector, SegmentCollector};
use tantivy::columnar::StrColumn;
use tantivy::{DocId, Score, SegmentOrdinal, SegmentReader};
use tracing::warn;

/// Who is searching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    User(String),
    /// Internal searches; sees everything in scope.
    System,
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Principal::User(name.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Folder,
    /// Workbooks and tabs are part of their parent folder's scope even in
    /// a non-recursive search.
    Workbook,
    Tab,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub parent: Option<String>,
    pub kind: ContainerKind,
    /// Folders can opt out of recursive searches from their ancestors.
    pub searchable: bool,
}

impl ContainerInfo {
    pub fn folder(id: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            id: id.into(),
            parent: parent.map(str::to_string),
            kind: ContainerKind::Folder,
            searchable: true,
        }
    }

    pub fn with_kind(mut self, kind: ContainerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn not_searchable(mut self) -> Self {
        self.searchable = false;
        self
    }
}

/// Container hierarchy and permission checks.
pub trait SecurityPolicy: Send + Sync {
    fn container(&self, id: &str) -> Option<ContainerInfo>;

    fn children(&self, id: &str) -> Vec<ContainerInfo>;

    /// Top-level containers.
    fn roots(&self) -> Vec<ContainerInfo>;

    fn can_read_container(&self, principal: &Principal, container_id: &str) -> bool;

    /// Finer-grained check for documents with a sub-resource, consulted only
    /// for documents whose container is allowed.
    fn can_read_resource(&self, principal: &Principal, container_id: &str, resource_id: &str)
        -> bool;
}

/// Grants held in memory. Unknown containers are unreadable; a resource is
/// readable unless it has explicit grants that exclude the principal.
#[derive(Debug, Default)]
pub struct InMemorySecurityPolicy {
    containers: HashMap<String, ContainerInfo>,
    children: HashMap<String, Vec<String>>,
    container_grants: HashSet<(String, String)>,
    resource_grants: HashMap<(String, String), HashSet<String>>,
}

impl InMemorySecurityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&mut self, info: ContainerInfo) -> &mut Self {
        if let Some(parent) = &info.parent {
            self.children
                .entry(parent.clone())
                .or_default()
                .push(info.id.clone());
        }
        self.containers.insert(info.id.clone(), info);
        self
    }

    pub fn grant_container(&mut self, user: &str, container_id: &str) -> &mut Self {
        self.container_grants
            .insert((user.to_string(), container_id.to_string()));
        self
    }

    /// Restrict `resource_id` to the users granted here.
    pub fn grant_resource(&mut self, user: &str, container_id: &str, resource_id: &str) -> &mut Self {
        self.resource_grants
            .entry((container_id.to_string(), resource_id.to_string()))
            .or_default()
            .insert(user.to_string());
        self
    }
}

impl SecurityPolicy for InMemorySecurityPolicy {
    fn container(&self, id: &str) -> Option<ContainerInfo> {
        self.containers.get(id).cloned()
    }

    fn children(&self, id: &str) -> Vec<ContainerInfo> {
        self.children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|child| self.containers.get(child).cloned())
            .collect()
    }

    fn roots(&self) -> Vec<ContainerInfo> {
        self.containers
            .values()
            .filter(|c| c.parent.is_none())
            .cloned()
            .collect()
    }

    fn can_read_container(&self, principal: &Principal, container_id: &str) -> bool {
        if !self.containers.contains_key(container_id) {
            return false;
        }
        match principal {
            Principal::System => true,
            Principal::User(user) => self
                .container_grants
                .contains(&(user.clone(), container_id.to_string())),
        }
    }

    fn can_read_resource(&self, principal: &Principal, container_id: &str, resource_id: &str) -> bool {
        let Principal::User(user) = principal else {
            return true;
        };
        match self
            .resource_grants
            .get(&(container_id.to_string(), resource_id.to_string()))
        {
            Some(users) => users.contains(user),
            None => true,
        }
    }
}

/// Where a search looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchScope {
    pub root: String,
    /// Include descendant folders; otherwise only the root and its
    /// workbooks and tabs.
    pub recursive: bool,
}

impl SearchScope {
    pub fn recursive(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
        }
    }

    pub fn single(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            recursive: false,
        }
    }
}

/// Per-query visibility filter.
pub struct SecurityFilter {
    principal: Principal,
    policy: Arc<dyn SecurityPolicy>,
    allowed: HashSet<String>,
    resource_cache: Mutex<HashMap<(String, String), bool>>,
}

impl SecurityFilter {
    /// Containers readable by `principal` within `scope`, or within every
    /// top-level container when no scope is given.
    pub fn new(policy: Arc<dyn SecurityPolicy>, principal: Principal, scope: Option<&SearchScope>) -> Self {
        let mut allowed = HashSet::new();
        match scope {
            Some(scope) => {
                if let Some(root) = policy.container(&scope.root) {
                    collect_allowed(policy.as_ref(), &principal, &root, scope.recursive, &mut allowed);
                } else {
                    warn!(container = %scope.root, "Search scope container not found");
                }
            }
            None => {
                for root in policy.roots() {
                    collect_allowed(policy.as_ref(), &principal, &root, true, &mut allowed);
                }
            }
        }

        Self {
            principal,
            policy,
            allowed,
            resource_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn allowed_containers(&self) -> &HashSet<String> {
        &self.allowed
    }

    /// Whether a document with the encoded `security_context` may be shown.
    pub fn is_visible(&self, security_context: &str) -> bool {
        let context = SecurityContext::decode(security_context);
        if !self.allowed.contains(&context.container_id) {
            return false;
        }
        let Some(resource) = context.sub_resource_id else {
            return true;
        };

        let key = (context.container_id, resource);
        let mut cache = self
            .resource_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(&visible) = cache.get(&key) {
            return visible;
        }
        let visible = self
            .policy
            .can_read_resource(&self.principal, &key.0, &key.1);
        cache.insert(key, visible);
        visible
    }
}

fn collect_allowed(
    policy: &dyn SecurityPolicy,
    principal: &Principal,
    root: &ContainerInfo,
    recursive: bool,
    allowed: &mut HashSet<String>,
) {
    if policy.can_read_container(principal, &root.id) {
        allowed.insert(root.id.clone());
    }

    let mut pending = policy.children(&root.id);
    while let Some(child) = pending.pop() {
        let include = match child.kind {
            ContainerKind::Workbook | ContainerKind::Tab => true,
            ContainerKind::Folder => recursive && child.searchable,
        };
        if !include && !recursive {
            continue;
        }
        if include && policy.can_read_container(principal, &child.id) {
            allowed.insert(child.id.clone());
        }
        // Descend even through unreadable or unsearchable folders; their
        // children carry their own permissions.
        if recursive || child.kind != ContainerKind::Folder {
            pending.extend(policy.children(&child.id));
        }
    }
}

/// Wraps a collector and skips documents the filter rejects.
/// A `None` filter passes everything.
pub struct SecureCollector<C> {
    inner: C,
    filter: Option<Arc<SecurityFilter>>,
}

impl<C> SecureCollector<C> {
    pub fn new(inner: C, filter: Option<Arc<SecurityFilter>>) -> Self {
        Self { inner, filter }
    }
}

pub struct SecureSegmentCollector<S> {
    inner: S,
    filter: Option<(Arc<SecurityFilter>, StrColumn)>,
    scratch: String,
}

impl<C: Collector> Collector for SecureCollector<C> {
    type Fruit = C::Fruit;
    type Child = SecureSegmentCollector<C::Child>;

    fn for_segment(
        &self,
        segment_local_id: SegmentOrdinal,
        segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        let inner = self.inner.for_segment(segment_local_id, segment)?;
        let filter = match &self.filter {
            Some(filter) => {
                let column = segment
                    .fast_fields()
                    .str("security_context")?
                    .ok_or_else(|| {
                        tantivy::TantivyError::SchemaError(
                            "security_context is not a fast field".to_string(),
                        )
                    })?;
                Some((filter.clone(), column))
            }
            None => None,
        };
        Ok(SecureSegmentCollector {
            inner,
            filter,
            scratch: String::new(),
        })
    }

    fn requires_scoring(&self) -> bool {
        self.inner.requires_scoring()
    }

    fn merge_fruits(
        &self,
        segment_fruits: Vec<<Self::Child as SegmentCollector>::Fruit>,
    ) -> tantivy::Result<Self::Fruit> {
        self.inner.merge_fruits(segment_fruits)
    }
}

impl<S: SegmentCollector> SegmentCollector for SecureSegmentCollector<S> {
    type Fruit = S::Fruit;

    fn collect(&mut self, doc: DocId, score: Score) {
        if let Some((filter, column)) = &self.filter {
            let Some(ord) = column.term_ords(doc).next() else {
                return;
            };
            self.scratch.clear();
            if !matches!(column.ord_to_str(ord, &mut self.scratch), Ok(true)) {
                return;
            }
            if !filter.is_visible(&self.scratch) {
                return;
            }
        }
        self.inner.collect(doc, score);
    }

    fn harvest(self) -> Self::Fruit {
        self.inner.harvest()
    }
}
