//! Data filtering end to end: partial query, filter building, compilation,
//! execution against the in-memory store and materialization.

mod common;

use std::sync::Arc;

use common::*;
use policy_bridge::core::ScriptedCore;
use policy_bridge::filter::{DataAdapter, Predicate};
use policy_bridge::host::FieldType;
use policy_bridge::{BridgeConfig, ErrorKind, Instance};
use serde_json::{json, Value};

fn scripted(filter: Value) -> ScriptedCore {
    ScriptedCore::new()
        .with_query(partial_query())
        .with_filter(filter)
}

fn org_filter(org: &str) -> Value {
    repo_filter(
        json!([["Repo", "organization", "Org"]]),
        json!([[eq(field("Org", Some("id")), imm_string(org))]]),
    )
}

fn actor() -> Instance {
    Instance::new("User", alice())
}

#[test]
fn test_repos_of_one_org() {
    let (core, bridge) = bridge(scripted(org_filter("osohq")));
    let repos = bridge
        .authorized_resources(actor(), "read", "Repo", &store(org_rows(), repo_rows()))
        .unwrap();
    assert_eq!(repo_ids(&repos), vec!["demo", "oso"]);
    assert_eq!(core.releases().len(), 1);
}

#[test]
fn test_users_orgs_and_repos_store() {
    let adapter = store(org_rows(), repo_rows());
    assert_eq!(adapter.table("User").len(), 1);
    let (_, bridge) = bridge(scripted(org_filter("osohq")));
    let repos = bridge
        .authorized_resources(actor(), "read", "Repo", &adapter)
        .unwrap();
    assert_eq!(repo_ids(&repos), vec!["demo", "oso"]);
}

#[test]
fn test_result_independent_of_insertion_order() {
    let mut orgs = org_rows();
    orgs.reverse();
    let mut repos = repo_rows();
    repos.rotate_left(1);

    let (_, forward) = bridge(scripted(org_filter("osohq")));
    let (_, shuffled) = bridge(scripted(org_filter("osohq")));
    let a = forward
        .authorized_resources(actor(), "read", "Repo", &store(org_rows(), repo_rows()))
        .unwrap();
    let b = shuffled
        .authorized_resources(actor(), "read", "Repo", &store(orgs, repos))
        .unwrap();
    assert_eq!(repo_ids(&a), repo_ids(&b));
}

#[test]
fn test_empty_conditions_select_everything() {
    let (_, bridge) = bridge(scripted(repo_filter(json!([]), json!([]))));
    let plan = bridge.authorized_plan(actor(), "read", "Repo").unwrap();
    assert_eq!(plan.predicate, Predicate::True);
    assert!(plan.joins.is_empty());

    let (_, bridge) = common::bridge(scripted(repo_filter(json!([]), json!([]))));
    let repos = bridge
        .authorized_resources(actor(), "read", "Repo", &store(org_rows(), repo_rows()))
        .unwrap();
    assert_eq!(repo_ids(&repos), vec!["demo", "ios", "oso"]);
}

#[test]
fn test_primary_key_equality_selects_at_most_one() {
    for id in ["oso", "missing"] {
        let filter = repo_filter(json!([]), json!([[eq(field("Repo", None), imm_string(id))]]));
        let (_, bridge) = bridge(scripted(filter));
        let repos = bridge
            .authorized_resources(actor(), "read", "Repo", &store(org_rows(), repo_rows()))
            .unwrap();
        assert!(repos.len() <= 1);
        assert_eq!(repos.len(), usize::from(id == "oso"));
    }
}

#[test]
fn test_disjunction_is_union() {
    let apple = json!([eq(field("Org", Some("id")), imm_string("apple"))]);
    let demo = json!([eq(field("Repo", Some("id")), imm_string("demo"))]);
    let relations = json!([["Repo", "organization", "Org"]]);

    let run = |conditions: Value| {
        let (_, bridge) = bridge(scripted(repo_filter(relations.clone(), conditions)));
        let repos = bridge
            .authorized_resources(actor(), "read", "Repo", &store(org_rows(), repo_rows()))
            .unwrap();
        repo_ids(&repos)
    };

    let both = run(json!([apple.clone(), demo.clone()]));
    let mut union = run(json!([apple]));
    union.extend(run(json!([demo])));
    union.sort();
    union.dedup();
    assert_eq!(both, union);
    assert_eq!(both, vec!["demo", "ios"]);
}

#[test]
fn test_mirrored_relation_joins_once() {
    let filter = repo_filter(
        json!([["Repo", "organization", "Org"], ["Org", "repos", "Repo"]]),
        json!([[eq(field("Org", Some("id")), imm_string("apple"))]]),
    );
    let (_, bridge) = bridge(scripted(filter));
    let plan = bridge.authorized_plan(actor(), "read", "Repo").unwrap();
    assert_eq!(plan.joins.len(), 1);
}

#[test]
fn test_core_receives_types_and_partials() {
    let (core, bridge) = bridge(scripted(org_filter("osohq")));
    bridge.authorized_plan(actor(), "read", "Repo").unwrap();

    let requests = core.filter_requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.variable, "resource");
    assert_eq!(request.class_tag, "Repo");
    assert_eq!(request.partial_results.len(), 1);
    assert!(matches!(
        request.types["Repo"].get("organization"),
        Some(FieldType::Relation { other_class_tag, .. }) if other_class_tag == "Org"
    ));
}

#[test]
fn test_authorized_query_is_not_executed() {
    let (_, bridge) = bridge(scripted(org_filter("osohq")));
    let adapter = store(org_rows(), repo_rows());
    let query = bridge
        .authorized_query(actor(), "read", "Repo", &adapter)
        .unwrap();
    assert_eq!(query.plan().model, "Repo");
    assert_eq!(query.plan().joins[0].right, "Org");
    assert_eq!(adapter.execute_query(query).unwrap().len(), 2);
}

#[test]
fn test_unsupported_condition_is_compiler_error() {
    let filter = repo_filter(
        json!([]),
        json!([[[field("Repo", Some("id")), "Lt", imm_string("m")]]]),
    );
    let (_, bridge) = bridge(scripted(filter));
    let err = bridge.authorized_plan(actor(), "read", "Repo").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compiler);
}

#[test]
fn test_missing_table_is_adapter_error() {
    let (_, bridge) = bridge(scripted(org_filter("osohq")));
    let adapter = policy_bridge::MemoryAdapter::new().with_table("Repo", repo_rows());
    let err = bridge
        .authorized_resources(actor(), "read", "Repo", &adapter)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Adapter);
}

#[test]
fn test_explain_does_not_change_plan() {
    let config = BridgeConfig {
        explain_filters: true,
        ..BridgeConfig::default()
    };
    let (_, explained) = bridge_with(scripted(org_filter("osohq")), config);
    let (_, plain) = bridge(scripted(org_filter("osohq")));
    assert_eq!(
        explained.authorized_plan(actor(), "read", "Repo").unwrap(),
        plain.authorized_plan(actor(), "read", "Repo").unwrap()
    );
}

#[tokio::test]
async fn test_authorized_resources_async() {
    let (_, bridge) = bridge(scripted(org_filter("apple")));
    let adapter = Arc::new(store(org_rows(), repo_rows()));
    let repos = bridge
        .authorized_resources_async(actor(), "read", "Repo", adapter)
        .await
        .unwrap();
    assert_eq!(repo_ids(&repos), vec!["ios"]);
}
