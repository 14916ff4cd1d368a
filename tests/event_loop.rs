//! Event loop tests against a scripted core
//!
//! Each test scripts the events a core would emit and checks what the bridge
//! sent back: call results, question answers, application errors and releases.

mod common;

use common::*;
use policy_bridge::core::{Ack, QueryHandle, QuerySource, ScriptedCore};
use policy_bridge::terms::{Term, Value as TermValue};
use policy_bridge::{BridgeConfig, ErrorKind, Instance, NativeValue};
use serde_json::json;

const ALICE_ID: u64 = 10_000;

#[test]
fn test_attribute_lookup_answers_core() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        call(1, instance(ALICE_ID), "name", None),
        result(json!({})),
        done(),
    ]));
    let actor = Instance::new("User", alice());
    assert!(bridge.is_allowed(actor, "read", "doc").unwrap());
    assert_eq!(
        core.acks(),
        vec![Ack::CallResult {
            query: QueryHandle(1),
            call_id: 1,
            value: Some(Term::string("alice")),
        }]
    );
    assert_eq!(core.releases(), vec![QueryHandle(1)]);
}

#[test]
fn test_sequence_method_is_handed_out_one_by_one() {
    let roles = || call(3, instance(ALICE_ID), "roles", Some(vec![]));
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        roles(),
        roles(),
        roles(),
        done(),
    ]));
    let actor = Instance::new("User", alice());
    assert!(!bridge.is_allowed(actor, "read", "doc").unwrap());

    let values: Vec<Option<Term>> = core
        .acks()
        .into_iter()
        .map(|ack| match ack {
            Ack::CallResult { call_id: 3, value, .. } => value,
            other => panic!("unexpected ack {:?}", other),
        })
        .collect();
    assert_eq!(
        values,
        vec![Some(Term::string("admin")), Some(Term::string("member")), None]
    );
}

#[test]
fn test_call_after_exhaustion_is_protocol_error() {
    let roles = || call(3, instance(ALICE_ID), "roles", Some(vec![]));
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        roles(),
        roles(),
        roles(),
        roles(),
        done(),
    ]));
    let actor = Instance::new("User", alice());
    let err = bridge.is_allowed(actor, "read", "doc").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(core.releases().len(), 1);
}

#[test]
fn test_missing_method_becomes_application_error() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        call(2, instance(ALICE_ID), "nope", Some(vec![])),
        done(),
    ]));
    let actor = Instance::new("User", alice());
    assert!(!bridge.is_allowed(actor, "read", "doc").unwrap());

    let acks = core.acks();
    assert_eq!(acks.len(), 2);
    assert!(matches!(&acks[0], Ack::ApplicationError { message, .. } if message.contains("nope")));
    assert_eq!(
        acks[1],
        Ack::CallResult {
            query: QueryHandle(1),
            call_id: 2,
            value: None,
        }
    );
}

#[test]
fn test_make_external_then_isa() {
    let constructor = json!({"value": {"Call": {
        "name": "Org",
        "args": [],
        "kwargs": {"id": string("osohq")},
    }}});
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        json!({"MakeExternal": {"instance_id": 7, "constructor": constructor}}),
        json!({"ExternalIsa": {"call_id": 4, "instance": instance(7), "class_tag": "Org"}}),
        json!({"ExternalIsa": {"call_id": 5, "instance": instance(7), "class_tag": "Repo"}}),
        call(6, instance(7), "id", None),
        done(),
    ]));
    assert_eq!(bridge.query("x = new Org(id: \"osohq\")").unwrap().count(), 0);
    assert_eq!(
        core.acks(),
        vec![
            Ack::QuestionResult {
                query: QueryHandle(1),
                call_id: 4,
                answer: true,
            },
            Ack::QuestionResult {
                query: QueryHandle(1),
                call_id: 5,
                answer: false,
            },
            Ack::CallResult {
                query: QueryHandle(1),
                call_id: 6,
                value: Some(Term::string("osohq")),
            },
        ]
    );
}

#[test]
fn test_comparison_operator_on_primitives() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        json!({"ExternalOp": {"call_id": 8, "operator": "Lt", "args": [integer(1), integer(2)]}}),
        json!({"ExternalOp": {"call_id": 9, "operator": "Gt", "args": [integer(1), integer(2)]}}),
        done(),
    ]));
    assert_eq!(bridge.query("1 < 2").unwrap().count(), 0);
    let answers: Vec<bool> = core
        .acks()
        .into_iter()
        .filter_map(|ack| match ack {
            Ack::QuestionResult { answer, .. } => Some(answer),
            _ => None,
        })
        .collect();
    assert_eq!(answers, vec![true, false]);
}

#[test]
fn test_unhandled_partial_is_an_error() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        result(json!({"x": gt(variable("x"), integer(1))})),
        done(),
    ]));
    let mut query = bridge.query("x > 1").unwrap();
    let err = query.next().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnhandledPartial);
    assert!(err.to_string().contains('x'));
    assert!(query.next().is_none());
    assert_eq!(core.releases().len(), 1);
}

#[test]
fn test_accept_expression_yields_constraints() {
    let config = BridgeConfig {
        accept_expression: true,
        ..BridgeConfig::default()
    };
    let (_, bridge) = bridge_with(
        ScriptedCore::new().with_query(vec![
            result(json!({"x": gt(variable("x"), integer(1))})),
            done(),
        ]),
        config,
    );
    let results: Vec<_> = bridge
        .query("x > 1")
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0].get("x"),
        Some(NativeValue::Expression { .. })
    ));
}

#[test]
fn test_dropping_query_releases_once() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        result(json!({"x": integer(1)})),
        result(json!({"x": integer(2)})),
        done(),
    ]));
    let mut query = bridge.query("x in [1, 2]").unwrap();
    let first = query.next().unwrap().unwrap();
    assert_eq!(first.get("x"), Some(&NativeValue::Integer(1)));
    drop(query);
    assert_eq!(core.releases(), vec![QueryHandle(1)]);
}

#[test]
fn test_core_error_aborts_session() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        result(json!({})),
        json!({"CoreError": {"kind": "Runtime", "message": "stack overflow"}}),
        done(),
    ]));
    let results: Vec<_> = bridge.query("loop()").unwrap().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    let err = results[1].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Core);
    assert_eq!(core.releases().len(), 1);
}

#[test]
fn test_debug_messages_are_kept() {
    let (_, bridge) = bridge(ScriptedCore::new().with_query(vec![
        json!({"Debug": {"message": "checking alice"}}),
        "None".into(),
        result(json!({})),
        done(),
    ]));
    let mut query = bridge.query("debug()").unwrap();
    assert!(query.next().unwrap().is_ok());
    assert_eq!(query.messages(), ["checking alice".to_string()]);
}

#[test]
fn test_same_object_keeps_its_id() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![done()]));
    let actor = Instance::new("User", alice());
    let args = vec![NativeValue::Instance(actor.clone()), NativeValue::Instance(actor)];
    assert_eq!(bridge.query_rule("same", args).unwrap().count(), 0);

    let started = core.started();
    let QuerySource::Term { term, .. } = &started[0] else {
        panic!("expected a term query");
    };
    let TermValue::Call(call) = term.value() else {
        panic!("expected a call");
    };
    assert_eq!(call.args[0], call.args[1]);
    assert!(matches!(
        call.args[0].value(),
        TermValue::ExternalInstance(ext) if ext.instance_id == ALICE_ID
    ));
}

#[test]
fn test_done_with_partial_flag_outside_filtering() {
    let (_, bridge) = bridge(ScriptedCore::new().with_query(vec![
        json!({"Done": {"partial_result": true}}),
    ]));
    let results: Vec<_> = bridge.query("x > 1").unwrap().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::UnhandledPartial);
}

#[test]
fn test_no_results_is_empty_not_error() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![done()]));
    assert_eq!(bridge.query("f(1)").unwrap().count(), 0);
    assert_eq!(core.releases().len(), 1);
}

#[test]
fn test_malformed_event_is_protocol_error() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        json!({"Teleport": {"call_id": 1}}),
        done(),
    ]));
    let results: Vec<_> = bridge.query("x").unwrap().collect();
    assert_eq!(results.len(), 1);
    let err = results[0].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(err.to_string().contains("malformed event"));
    assert_eq!(core.releases().len(), 1);
}

#[test]
fn test_unknown_instance_in_result_ends_query() {
    let (core, bridge) = bridge(ScriptedCore::new().with_query(vec![
        result(json!({"x": instance(999)})),
        result(json!({"x": integer(2)})),
        done(),
    ]));
    let results: Vec<_> = bridge.query("x = y").unwrap().collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::Registry);
    assert_eq!(core.releases().len(), 1);
}
