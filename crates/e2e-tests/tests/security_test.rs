//! Security-filtered search over documents indexed by the pipeline.

use pretty_assertions::assert_eq;

use e2e_tests::{text_doc, TestHarness};
use search_index::{
    ContainerInfo, InMemorySecurityPolicy, Principal, SearchRequest, SearchScope,
};
use search_types::SecurityContext;

fn hits(harness: &TestHarness, policy: InMemorySecurityPolicy, request: SearchRequest) -> Vec<String> {
    harness
        .searcher(policy)
        .search(&request)
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.identifier)
        .collect()
}

fn index_lab_documents() -> TestHarness {
    let harness = TestHarness::new();
    harness.add(text_doc("open", "C1", "assay results for the week"));
    harness.add(
        text_doc("restricted", "C1", "assay results under embargo")
            .with_security_context(SecurityContext::with_resource("C1", "R1")),
    );
    harness.add(text_doc("other", "C2", "assay results from another lab"));
    harness.settle();
    harness
}

fn policy() -> InMemorySecurityPolicy {
    let mut policy = InMemorySecurityPolicy::new();
    policy
        .add_container(ContainerInfo::folder("C1", None))
        .add_container(ContainerInfo::folder("C2", None))
        .grant_container("alice", "C1")
        .grant_resource("bob", "C1", "R1");
    policy
}

#[test]
fn test_resource_grant_required_for_sub_resource_documents() {
    let harness = index_lab_documents();
    let request = SearchRequest::new("assay").with_principal(Principal::user("alice"));

    assert_eq!(hits(&harness, policy(), request.clone()), vec!["mem:open".to_string()]);

    let mut granted = policy();
    granted.grant_resource("alice", "C1", "R1");
    let mut visible = hits(&harness, granted, request);
    visible.sort();
    assert_eq!(visible, vec!["mem:open".to_string(), "mem:restricted".to_string()]);
}

#[test]
fn test_unreadable_container_hidden() {
    let harness = index_lab_documents();
    let request = SearchRequest::new("assay").with_principal(Principal::user("carol"));
    assert!(hits(&harness, policy(), request).is_empty());
}

#[test]
fn test_scope_limits_containers() {
    let harness = index_lab_documents();
    let mut all = hits(
        &harness,
        policy(),
        SearchRequest::new("assay").with_scope(SearchScope::single("C2")),
    );
    all.sort();
    assert_eq!(all, vec!["mem:other".to_string()]);

    let mut everything = harness.search_ids("assay");
    everything.sort();
    assert_eq!(everything.len(), 3);
}
