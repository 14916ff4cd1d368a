//! Query events received from the reasoning core.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::terms::{Dictionary, Operator, Symbol, Term};

/// Variable bindings of one result
pub type Bindings = BTreeMap<Symbol, Term>;

/// One step of a running query.
///
/// Every variant carrying a `call_id` suspends the query until the host
/// answers that call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Nothing to do; ask again
    None,
    /// The query is over. `partial_result` marks residual constraints.
    Done {
        #[serde(default)]
        partial_result: bool,
    },
    Debug {
        message: String,
    },
    /// Construct a host object; `constructor` is a `Call` term
    MakeExternal {
        instance_id: u64,
        constructor: Term,
    },
    /// Attribute lookup (`args` absent) or method call
    ExternalCall {
        call_id: u64,
        instance: Term,
        attribute: Symbol,
        #[serde(default)]
        args: Option<Vec<Term>>,
        #[serde(default)]
        kwargs: Option<BTreeMap<Symbol, Term>>,
    },
    ExternalIsa {
        call_id: u64,
        instance: Term,
        class_tag: Symbol,
        #[serde(default)]
        fields: Option<Dictionary>,
    },
    ExternalIsaWithPath {
        call_id: u64,
        base_tag: Symbol,
        path: Vec<Term>,
        class_tag: Symbol,
    },
    ExternalIsSubSpecializer {
        call_id: u64,
        instance_id: u64,
        left_class_tag: Symbol,
        right_class_tag: Symbol,
    },
    ExternalIsSubclass {
        call_id: u64,
        left_class_tag: Symbol,
        right_class_tag: Symbol,
    },
    ExternalUnify {
        call_id: u64,
        left_instance_id: u64,
        right_instance_id: u64,
    },
    /// A binary comparison; `args` holds exactly two terms
    ExternalOp {
        call_id: u64,
        operator: Operator,
        args: Vec<Term>,
    },
    /// Next element of an iteration
    NextExternal {
        call_id: u64,
        iterable: Term,
    },
    Result {
        bindings: Bindings,
        #[serde(default)]
        trace: Option<serde_json::Value>,
    },
}

impl Event {
    /// Parses a wire event
    pub fn decode(wire: &serde_json::Value) -> Result<Event, DecodeError> {
        serde_json::from_value(wire.clone()).map_err(|err| DecodeError::new("event", err.to_string()))
    }

    pub fn encode(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Call id the host must answer, if this event suspends the query
    pub fn call_id(&self) -> Option<u64> {
        match self {
            Event::ExternalCall { call_id, .. }
            | Event::ExternalIsa { call_id, .. }
            | Event::ExternalIsaWithPath { call_id, .. }
            | Event::ExternalIsSubSpecializer { call_id, .. }
            | Event::ExternalIsSubclass { call_id, .. }
            | Event::ExternalUnify { call_id, .. }
            | Event::ExternalOp { call_id, .. }
            | Event::NextExternal { call_id, .. } => Some(*call_id),
            _ => None,
        }
    }

    /// Variant name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Event::None => "None",
            Event::Done { .. } => "Done",
            Event::Debug { .. } => "Debug",
            Event::MakeExternal { .. } => "MakeExternal",
            Event::ExternalCall { .. } => "ExternalCall",
            Event::ExternalIsa { .. } => "ExternalIsa",
            Event::ExternalIsaWithPath { .. } => "ExternalIsaWithPath",
            Event::ExternalIsSubSpecializer { .. } => "ExternalIsSubSpecializer",
            Event::ExternalIsSubclass { .. } => "ExternalIsSubclass",
            Event::ExternalUnify { .. } => "ExternalUnify",
            Event::ExternalOp { .. } => "ExternalOp",
            Event::NextExternal { .. } => "NextExternal",
            Event::Result { .. } => "Result",
        }
    }
}
