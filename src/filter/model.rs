//! Filters built by the reasoning core.
//!
//! A filter describes the set of `root` records satisfying an authorization
//! query: the relations to join and a disjunction of conjunctions of
//! conditions. It arrives in wire form:
//!
//! ```ignore
//! {"root": "Repo",
//!  "relations": [["Repo", "organization", "Org"]],
//!  "conditions": [[[{"Field": ["Org", "id"]}, "Eq", {"Imm": {"String": "osohq"}}]]]}
//! ```

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::terms::{Term, Value};

/// A field of a type; no field means the whole record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Projection(pub String, pub Option<String>);

impl Projection {
    pub fn type_name(&self) -> &str {
        &self.0
    }

    pub fn field(&self) -> Option<&str> {
        self.1.as_deref()
    }
}

/// One side of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Field(Projection),
    /// An immediate value
    Imm(Value),
}

/// Comparison of a condition.
///
/// Kinds the bridge cannot compile are kept as `Unsupported` so decoding never
/// fails on them; the compiler rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Comparison {
    Eq,
    Neq,
    In,
    Nin,
    Unsupported(String),
}

impl From<String> for Comparison {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "Eq" => Comparison::Eq,
            "Neq" => Comparison::Neq,
            "In" => Comparison::In,
            "Nin" => Comparison::Nin,
            _ => Comparison::Unsupported(kind),
        }
    }
}

impl From<Comparison> for String {
    fn from(cmp: Comparison) -> Self {
        match cmp {
            Comparison::Eq => "Eq".to_string(),
            Comparison::Neq => "Neq".to_string(),
            Comparison::In => "In".to_string(),
            Comparison::Nin => "Nin".to_string(),
            Comparison::Unsupported(kind) => kind,
        }
    }
}

/// `left cmp right`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition(pub Datum, pub Comparison, pub Datum);

/// `from.field -> to`: join `to` through the relation `field` declared on `from`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation(pub String, pub String, pub String);

impl Relation {
    pub fn from_type(&self) -> &str {
        &self.0
    }

    pub fn field(&self) -> &str {
        &self.1
    }

    pub fn to_type(&self) -> &str {
        &self.2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub root: String,
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Disjunction of conjunctions; empty means every record matches
    #[serde(default)]
    pub conditions: Vec<Vec<Condition>>,
}

impl Filter {
    /// A filter matching every record of `root`
    pub fn all(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            relations: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn decode(wire: &serde_json::Value) -> Result<Filter, DecodeError> {
        serde_json::from_value(wire.clone()).map_err(|err| DecodeError::new("filter", err.to_string()))
    }

    pub fn decode_str(text: &str) -> Result<Filter, DecodeError> {
        serde_json::from_str(text).map_err(|err| DecodeError::new("filter", err.to_string()))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Eq => f.write_str("="),
            Comparison::Neq => f.write_str("!="),
            Comparison::In => f.write_str("IN"),
            Comparison::Nin => f.write_str("NOT IN"),
            Comparison::Unsupported(kind) => write!(f, "<{}>", kind),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Imm(value) => write!(f, "{}", Term::new(value.clone())),
            Datum::Field(Projection(type_name, None)) => f.write_str(type_name),
            Datum::Field(Projection(type_name, Some(field))) => write!(f, "{}.{}", type_name, field),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.0, self.1, self.2)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}", self.0, self.1, self.2)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "query {}", self.root)?;
        if !self.relations.is_empty() {
            writeln!(f, "join")?;
            for relation in &self.relations {
                writeln!(f, "    {}", relation)?;
            }
        }
        if !self.conditions.is_empty() {
            writeln!(f, "where")?;
            let disjuncts = self
                .conditions
                .iter()
                .map(|conjunction| {
                    conjunction
                        .iter()
                        .map(|condition| format!("    {}", condition))
                        .join(" AND\n")
                })
                .join("\n  OR\n");
            writeln!(f, "{}", disjuncts)?;
        }
        Ok(())
    }
}
