//! Free-text search with field boosts, category filtering, security
//! filtering and pagination.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{DocAddress, Order, Searcher, TantivyDocument, Term};
use tracing::{debug, info};

use crate::categories::CategoryRegistry;
use crate::error::IndexError;
use crate::manager::IndexManager;
use crate::recovery::ManagerHandle;
use crate::schema::{boost, DocumentSchema};
use crate::security::{Principal, SearchScope, SecureCollector, SecurityFilter, SecurityPolicy};

/// Characters with meaning in the query syntax.
const QUERY_SYNTAX_CHARS: &str = "+-&|!(){}[]^\"~*?:\\/";

/// Escape query-syntax characters so `term` is searched literally.
pub fn escape_term(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if QUERY_SYNTAX_CHARS.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Relevance,
    /// Most recently modified first.
    Modified,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relevance" | "score" => Ok(SortOrder::Relevance),
            "modified" => Ok(SortOrder::Modified),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// A search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Only documents in this category.
    pub category: Option<String>,
    /// `None` searches every container the principal can read.
    pub scope: Option<SearchScope>,
    pub principal: Principal,
    pub sort: SortOrder,
    pub offset: usize,
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            category: None,
            scope: None,
            principal: Principal::System,
            sort: SortOrder::Relevance,
            offset: 0,
            limit: 20,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Document id
    pub identifier: String,
    pub container: String,
    pub category: Option<String>,
    pub title: String,
    pub summary: String,
    /// Display URL with `_docid=<id>` appended
    pub url: Option<String>,
    pub score: f32,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    /// Visible matches, before pagination.
    pub total_hits: usize,
    pub hits: Vec<SearchHit>,
}

/// Searches whichever index manager is current.
pub struct DocumentSearcher {
    handle: Arc<ManagerHandle>,
    policy: Arc<dyn SecurityPolicy>,
    categories: Arc<CategoryRegistry>,
}

impl DocumentSearcher {
    /// A searcher accepting only the built-in categories.
    pub fn new(handle: Arc<ManagerHandle>, policy: Arc<dyn SecurityPolicy>) -> Self {
        Self::with_categories(handle, policy, Arc::new(CategoryRegistry::new()))
    }

    pub fn with_categories(
        handle: Arc<ManagerHandle>,
        policy: Arc<dyn SecurityPolicy>,
        categories: Arc<CategoryRegistry>,
    ) -> Self {
        Self {
            handle,
            policy,
            categories,
        }
    }

    pub fn categories(&self) -> &Arc<CategoryRegistry> {
        &self.categories
    }

    /// Run `request`. An empty query returns no results; a category that
    /// is not registered is an error.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResults, IndexError> {
        if let Some(category) = &request.category {
            if self.categories.get(category).is_none() {
                return Err(IndexError::UnknownCategory(category.clone()));
            }
        }
        if request.query.trim().is_empty() || request.limit == 0 {
            return Ok(SearchResults::default());
        }

        let manager = self.handle.current();
        let schema = manager.schema();
        let query = build_query(manager.as_ref(), request)?;

        let filter = match (&request.principal, &request.scope) {
            (Principal::System, None) => None,
            (principal, scope) => Some(Arc::new(SecurityFilter::new(
                self.policy.clone(),
                principal.clone(),
                scope.as_ref(),
            ))),
        };

        let searcher = manager.searcher()?;
        let (total_hits, addresses) = match request.sort {
            SortOrder::Relevance => {
                let top = TopDocs::with_limit(request.limit).and_offset(request.offset);
                let collector = SecureCollector::new((Count, top), filter);
                let (count, docs) = searcher.search(&query, &collector)?;
                (count, docs)
            }
            SortOrder::Modified => {
                let top = TopDocs::with_limit(request.limit)
                    .and_offset(request.offset)
                    .order_by_fast_field::<i64>("modified", Order::Desc);
                let collector = SecureCollector::new((Count, top), filter);
                let (count, docs) = searcher.search(&query, &collector)?;
                (count, docs.into_iter().map(|(_, addr)| (0.0, addr)).collect())
            }
        };

        let mut hits = Vec::with_capacity(addresses.len());
        for (score, address) in addresses {
            hits.push(load_hit(&searcher, schema, address, score)?);
        }

        info!(
            query = %request.query,
            total_hits,
            returned = hits.len(),
            "Search complete"
        );
        Ok(SearchResults { total_hits, hits })
    }

    /// Look a document up by id, ignoring security.
    pub fn find(&self, id: &str) -> Result<Option<SearchHit>, IndexError> {
        let manager = self.handle.current();
        let schema = manager.schema();
        let searcher = manager.searcher()?;
        let query = TermQuery::new(
            Term::from_field_text(schema.id, id),
            IndexRecordOption::Basic,
        );
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top.into_iter().next() {
            Some((score, address)) => Ok(Some(load_hit(&searcher, schema, address, score)?)),
            None => Ok(None),
        }
    }

    /// Documents currently visible in the index.
    pub fn num_docs(&self) -> Result<u64, IndexError> {
        Ok(self.handle.current().searcher()?.num_docs())
    }
}

fn build_query(manager: &dyn IndexManager, request: &SearchRequest) -> Result<Box<dyn Query>, IndexError> {
    let schema = manager.schema();
    let index = manager.tantivy_index();

    let default_fields = schema.default_fields();
    let mut parser = QueryParser::for_index(index, default_fields.iter().map(|(f, _)| *f).collect());
    for (field, weight) in default_fields {
        parser.set_field_boost(field, weight);
    }
    parser.set_conjunction_by_default();
    let text_query = parser.parse_query(&request.query)?;

    let query: Box<dyn Query> = match &request.category {
        Some(category) => {
            let term = Term::from_field_text(schema.categories, &category.to_lowercase());
            Box::new(BooleanQuery::new(vec![
                (Occur::Must, text_query),
                (
                    Occur::Must,
                    Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
                ),
            ]))
        }
        None => {
            let category_parser = QueryParser::for_index(index, vec![schema.categories]);
            match category_parser.parse_query(&request.query.to_lowercase()) {
                Ok(category_query) => Box::new(BooleanQuery::new(vec![
                    (Occur::Must, text_query),
                    (
                        Occur::Should,
                        Box::new(BoostQuery::new(category_query, boost::CATEGORIES)),
                    ),
                ])),
                Err(e) => {
                    debug!(error = %e, "Query not usable against categories");
                    text_query
                }
            }
        }
    };
    Ok(query)
}

fn load_hit(
    searcher: &Searcher,
    schema: &DocumentSchema,
    address: DocAddress,
    score: f32,
) -> Result<SearchHit, IndexError> {
    let doc: TantivyDocument = searcher.doc(address)?;
    let text = |field| {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let identifier = text(schema.id).unwrap_or_default();
    let url = text(schema.url)
        .filter(|u| !u.is_empty())
        .map(|u| with_doc_id(&u, &identifier));
    let modified = doc
        .get_first(schema.modified)
        .and_then(|v| v.as_i64())
        .filter(|ms| *ms > 0)
        .and_then(DateTime::from_timestamp_millis);

    Ok(SearchHit {
        container: text(schema.container).unwrap_or_default(),
        category: text(schema.categories),
        title: text(schema.title).unwrap_or_default(),
        summary: text(schema.summary).unwrap_or_default(),
        url,
        score,
        modified,
        identifier,
    })
}

/// Append `_docid=<id>` to a display URL.
fn with_doc_id(url: &str, id: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}_docid={}", encode_component(id))
}

fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::SearchCategory;
    use crate::document::{IndexDocument, TermWeight};
    use crate::index::SearchIndexConfig;
    use crate::security::{ContainerInfo, InMemorySecurityPolicy};
    use search_types::SecurityContext;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        handle: Arc<ManagerHandle>,
        searcher: DocumentSearcher,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let handle = Arc::new(ManagerHandle::open(
            &SearchIndexConfig::new(dir.path()).with_memory_mb(15),
        ));
        let mut policy = InMemorySecurityPolicy::new();
        policy
            .add_container(ContainerInfo::folder("root", None))
            .add_container(ContainerInfo::folder("c1", Some("root")))
            .add_container(ContainerInfo::folder("c2", Some("root")))
            .grant_container("alice", "root")
            .grant_container("alice", "c1");
        let searcher = DocumentSearcher::new(handle.clone(), Arc::new(policy));
        Fixture {
            _dir: dir,
            handle,
            searcher,
        }
    }

    fn index(f: &Fixture, id: &str, doc: IndexDocument) {
        f.handle.current().index(id, &doc).unwrap();
    }

    fn commit(f: &Fixture) {
        f.handle.current().commit().unwrap();
    }

    fn ids(results: &SearchResults) -> Vec<&str> {
        results.hits.iter().map(|h| h.identifier.as_str()).collect()
    }

    #[test]
    fn test_escape_term() {
        assert_eq!(escape_term("a+b"), "a\\+b");
        assert_eq!(escape_term("path/to:x"), "path\\/to\\:x");
        assert_eq!(escape_term("plain"), "plain");
    }

    #[test]
    fn test_stemmed_body_match_and_docid_url() {
        let f = fixture();
        index(
            &f,
            "file:/c1/run.txt",
            IndexDocument::new(SecurityContext::container("c1"))
                .with_title("Notes")
                .with_body("the fox runs")
                .with_url("/files/run.txt"),
        );
        commit(&f);

        let results = f.searcher.search(&SearchRequest::new("running")).unwrap();
        assert_eq!(results.total_hits, 1);
        assert_eq!(
            results.hits[0].url.as_deref(),
            Some("/files/run.txt?_docid=file%3A%2Fc1%2Frun.txt")
        );
    }

    #[test]
    fn test_keyword_weights_rank() {
        let f = fixture();
        for (id, weight) in [
            ("low", TermWeight::Low),
            ("med", TermWeight::Medium),
            ("high", TermWeight::High),
        ] {
            index(
                &f,
                id,
                IndexDocument::new(SecurityContext::container("c1"))
                    .with_title(format!("Doc {id}"))
                    .with_keywords(weight, "running"),
            );
        }
        commit(&f);

        let results = f.searcher.search(&SearchRequest::new("running")).unwrap();
        assert_eq!(ids(&results), vec!["high", "med", "low"]);
    }

    #[test]
    fn test_identifier_match() {
        let f = fixture();
        index(
            &f,
            "sample",
            IndexDocument::new(SecurityContext::container("c1"))
                .with_identifiers(TermWeight::High, "LK-0042"),
        );
        commit(&f);

        let results = f.searcher.search(&SearchRequest::new("lk-0042")).unwrap();
        assert_eq!(ids(&results), vec!["sample"]);
    }

    #[test]
    fn test_category_filter() {
        let f = fixture();
        index(
            &f,
            "wiki",
            IndexDocument::new(SecurityContext::container("c1"))
                .with_body("assay protocol")
                .with_category("Wiki"),
        );
        index(
            &f,
            "file",
            IndexDocument::new(SecurityContext::container("c1"))
                .with_body("assay protocol")
                .with_category("File"),
        );
        commit(&f);
        f.searcher
            .categories()
            .add(SearchCategory::new("wiki", "Wiki Pages"));

        let results = f
            .searcher
            .search(&SearchRequest::new("assay").with_category("wiki"))
            .unwrap();
        assert_eq!(ids(&results), vec!["wiki"]);
        assert_eq!(results.hits[0].category.as_deref(), Some("wiki"));
    }

    #[test]
    fn test_unregistered_category_rejected() {
        let f = fixture();
        let request = SearchRequest::new("assay").with_category("wiki");
        assert!(matches!(
            f.searcher.search(&request),
            Err(IndexError::UnknownCategory(c)) if c == "wiki"
        ));

        let files = SearchRequest::new("assay").with_category("FILE");
        assert_eq!(f.searcher.search(&files).unwrap().total_hits, 0);
    }

    #[test]
    fn test_security_filter_applied_before_counting() {
        let f = fixture();
        index(&f, "visible", IndexDocument::new(SecurityContext::container("c1")).with_body("secret plan"));
        index(&f, "hidden", IndexDocument::new(SecurityContext::container("c2")).with_body("secret plan"));
        commit(&f);

        let alice = SearchRequest::new("secret").with_principal(Principal::user("alice"));
        let results = f.searcher.search(&alice).unwrap();
        assert_eq!(results.total_hits, 1);
        assert_eq!(ids(&results), vec!["visible"]);

        let system = f.searcher.search(&SearchRequest::new("secret")).unwrap();
        assert_eq!(system.total_hits, 2);

        let scoped = SearchRequest::new("secret").with_scope(SearchScope::single("c2"));
        assert_eq!(ids(&f.searcher.search(&scoped).unwrap()), vec!["hidden"]);
    }

    #[test]
    fn test_sort_by_modified_and_paging() {
        let f = fixture();
        for (id, ms) in [("old", 1_000), ("new", 3_000), ("mid", 2_000)] {
            index(
                &f,
                id,
                IndexDocument::new(SecurityContext::container("c1"))
                    .with_body("report")
                    .with_modified(DateTime::from_timestamp_millis(ms).unwrap()),
            );
        }
        commit(&f);

        let request = SearchRequest::new("report").with_sort(SortOrder::Modified);
        assert_eq!(ids(&f.searcher.search(&request).unwrap()), vec!["new", "mid", "old"]);

        let page = f.searcher.search(&request.with_page(1, 1)).unwrap();
        assert_eq!(page.total_hits, 3);
        assert_eq!(ids(&page), vec!["mid"]);
    }

    #[test]
    fn test_find_and_num_docs() {
        let f = fixture();
        index(&f, "a", IndexDocument::new(SecurityContext::container("c2")).with_title("Alpha"));
        commit(&f);

        assert_eq!(f.searcher.num_docs().unwrap(), 1);
        let hit = f.searcher.find("a").unwrap().unwrap();
        assert_eq!(hit.title, "Alpha");
        assert_eq!(hit.container, "c2");
        assert!(f.searcher.find("missing").unwrap().is_none());
    }

    #[test]
    fn test_empty_query() {
        let f = fixture();
        let results = f.searcher.search(&SearchRequest::new("  ")).unwrap();
        assert_eq!(results, SearchResults::default());
    }
}
