//! Shared fixtures for integration tests
//!
//! - User / Org / Repo host classes with data-filtering metadata
//! - Builders for wire events, terms and filters
//! - An in-memory store of orgs and repos
#![allow(dead_code)]

use std::sync::Arc;

use policy_bridge::core::ScriptedCore;
use policy_bridge::error::DispatchError;
use policy_bridge::filter::{MemoryAdapter, Row};
use policy_bridge::host::{ClassBuilder, NativeValue, RelationKind};
use policy_bridge::{Bridge, BridgeConfig, Instance};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Org {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repo {
    pub id: String,
    pub org_id: String,
}

pub fn alice() -> User {
    User {
        name: "alice".to_string(),
        roles: vec!["admin".to_string(), "member".to_string()],
    }
}

/// Registers User, Org and Repo on a fresh bridge over `core`
pub fn bridge_with(core: ScriptedCore, config: BridgeConfig) -> (Arc<ScriptedCore>, Bridge) {
    let core = Arc::new(core);
    let bridge = Bridge::new(core.clone(), config);

    bridge
        .register_class(
            ClassBuilder::<User>::new("User")
                .with_constructor(|args| -> Result<User, DispatchError> {
                    Ok(User {
                        name: args.positional(0)?,
                        roles: Vec::new(),
                    })
                })
                .add_attribute("name", |u: &User| u.name.clone())
                .add_iterator_method("roles", |u: &User, _args| -> Result<Vec<String>, DispatchError> {
                    Ok(u.roles.clone())
                })
                .with_equality_check(|a: &User, b: &User| a.name == b.name)
                .build(),
        )
        .unwrap();

    bridge
        .register_class(
            ClassBuilder::<Org>::new("Org")
                .with_constructor(|args| -> Result<Org, DispatchError> {
                    Ok(Org { id: args.named("id")? })
                })
                .add_attribute("id", |o: &Org| o.id.clone())
                .add_field("id", "String")
                .add_relation("repos", RelationKind::Many, "Repo", "id", "org_id")
                .build(),
        )
        .unwrap();

    bridge
        .register_class(
            ClassBuilder::<Repo>::new("Repo")
                .with_constructor(|args| -> Result<Repo, DispatchError> {
                    Ok(Repo {
                        id: args.named("id")?,
                        org_id: args.named("org_id")?,
                    })
                })
                .add_attribute("id", |r: &Repo| r.id.clone())
                .add_field("id", "String")
                .add_relation("organization", RelationKind::One, "Org", "org_id", "id")
                .build(),
        )
        .unwrap();

    (core, bridge)
}

pub fn bridge(core: ScriptedCore) -> (Arc<ScriptedCore>, Bridge) {
    bridge_with(core, BridgeConfig::default())
}

// Wire builders

pub fn string(s: &str) -> Value {
    json!({"value": {"String": s}})
}

pub fn integer(i: i64) -> Value {
    json!({"value": {"Number": {"Integer": i}}})
}

pub fn variable(name: &str) -> Value {
    json!({"value": {"Variable": name}})
}

pub fn instance(id: u64) -> Value {
    json!({"value": {"ExternalInstance": {"instance_id": id}}})
}

pub fn gt(left: Value, right: Value) -> Value {
    json!({"value": {"Expression": {"operator": "Gt", "args": [left, right]}}})
}

pub fn result(bindings: Value) -> Value {
    json!({"Result": {"bindings": bindings}})
}

pub fn done() -> Value {
    json!({"Done": {"partial_result": false}})
}

pub fn call(call_id: u64, receiver: Value, attribute: &str, args: Option<Vec<Value>>) -> Value {
    json!({"ExternalCall": {
        "call_id": call_id,
        "instance": receiver,
        "attribute": attribute,
        "args": args,
    }})
}

pub fn field(type_name: &str, field: Option<&str>) -> Value {
    json!({"Field": [type_name, field]})
}

pub fn imm_string(s: &str) -> Value {
    json!({"Imm": {"String": s}})
}

pub fn eq(left: Value, right: Value) -> Value {
    json!([left, "Eq", right])
}

pub fn repo_filter(relations: Value, conditions: Value) -> Value {
    json!({"root": "Repo", "relations": relations, "conditions": conditions})
}

/// A filtering query: one partial result, then done
pub fn partial_query() -> Vec<Value> {
    vec![
        result(json!({"resource": gt(variable("_this"), integer(0))})),
        done(),
    ]
}

// Store

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), NativeValue::String(v.to_string())))
        .collect()
}

pub fn user_rows() -> Vec<Row> {
    vec![row(&[("id", "leina")])]
}

pub fn org_rows() -> Vec<Row> {
    vec![row(&[("id", "osohq")]), row(&[("id", "apple")])]
}

pub fn repo_rows() -> Vec<Row> {
    vec![
        row(&[("id", "oso"), ("org_id", "osohq")]),
        row(&[("id", "ios"), ("org_id", "apple")]),
        row(&[("id", "demo"), ("org_id", "osohq")]),
    ]
}

pub fn store(orgs: Vec<Row>, repos: Vec<Row>) -> MemoryAdapter {
    MemoryAdapter::new()
        .with_table("User", user_rows())
        .with_table("Org", orgs)
        .with_table("Repo", repos)
}

pub fn repo_ids(instances: &[Instance]) -> Vec<String> {
    let mut ids: Vec<String> = instances
        .iter()
        .map(|i| i.downcast_ref::<Repo>().unwrap().id.clone())
        .collect();
    ids.sort();
    ids
}
