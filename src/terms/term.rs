//! Terms exchanged with the reasoning core.
//!
//! The serde representation of these types *is* the wire format: externally
//! tagged enums and `{"value": ...}` wrappers, exactly as the core emits them.
//!
//! ```ignore
//! {"value": {"Number": {"Integer": 1}}}
//! {"value": {"ExternalInstance": {"instance_id": 7, "constructor": null, "repr": "Repo"}}}
//! {"value": {"Expression": {"operator": "Isa", "args": [ ... ]}}}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::numeric::Numeric;

/// A name: variable names, class tags, field names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Symbol(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol(name.to_string())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A term with shared, immutable contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    value: Arc<Value>,
}

impl Term {
    pub fn new(value: Value) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::new(Value::Variable(Symbol::new(name)))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(Value::String(s.into()))
    }

    pub fn integer(i: i64) -> Self {
        Self::new(Value::Number(Numeric::Integer(i)))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(Value::Boolean(b))
    }

    /// `true` if an `Expression` occurs anywhere inside this term
    pub fn contains_expression(&self) -> bool {
        match self.value() {
            Value::Expression(_) => true,
            Value::List(items) => items.iter().any(Term::contains_expression),
            Value::Dictionary(dict) => dict.fields.values().any(Term::contains_expression),
            Value::Pattern(Pattern::Dictionary(dict)) => {
                dict.fields.values().any(Term::contains_expression)
            }
            Value::Pattern(Pattern::Instance(lit)) => {
                lit.fields.fields.values().any(Term::contains_expression)
            }
            Value::Call(call) => call.args.iter().any(Term::contains_expression),
            _ => false,
        }
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Term::new(value)
    }
}

/// The contents of a term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(Numeric),
    String(String),
    Boolean(bool),
    ExternalInstance(ExternalInstance),
    Dictionary(Dictionary),
    Pattern(Pattern),
    Call(Call),
    List(Vec<Term>),
    Variable(Symbol),
    RestVariable(Symbol),
    Expression(Operation),
}

impl Value {
    /// Wire tag of this value, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Number(Numeric::Integer(_)) => "Integer",
            Value::Number(Numeric::Float(_)) => "Float",
            Value::String(_) => "String",
            Value::Boolean(_) => "Boolean",
            Value::ExternalInstance(_) => "ExternalInstance",
            Value::Dictionary(_) => "Dictionary",
            Value::Pattern(_) => "Pattern",
            Value::Call(_) => "Call",
            Value::List(_) => "List",
            Value::Variable(_) => "Variable",
            Value::RestVariable(_) => "RestVariable",
            Value::Expression(_) => "Expression",
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Variable(sym) | Value::RestVariable(sym) => Some(sym),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_expression(&self) -> Option<&Operation> {
        match self {
            Value::Expression(op) => Some(op),
            _ => None,
        }
    }
}

/// A reference to a host object held in the instance registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalInstance {
    pub instance_id: u64,
    #[serde(default)]
    pub constructor: Option<Term>,
    #[serde(default)]
    pub repr: Option<String>,
}

/// String-keyed map of terms
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    pub fields: BTreeMap<Symbol, Term>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A shape to match against: `{x: 1}` or `Repo{name: "oso"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    Dictionary(Dictionary),
    Instance(InstanceLiteral),
}

/// A class tag with field constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceLiteral {
    pub tag: Symbol,
    pub fields: Dictionary,
}

/// A predicate application `name(args..)`; also used for constructor calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub name: Symbol,
    pub args: Vec<Term>,
    #[serde(default)]
    pub kwargs: Option<BTreeMap<Symbol, Term>>,
}

/// An unevaluated operation, as found in residual constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operator: Operator,
    pub args: Vec<Term>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Debug,
    Print,
    Cut,
    In,
    Isa,
    New,
    Dot,
    Not,
    Mul,
    Div,
    Mod,
    Rem,
    Add,
    Sub,
    Eq,
    Geq,
    Leq,
    Neq,
    Gt,
    Lt,
    Unify,
    Or,
    And,
    ForAll,
    Assign,
}

impl Operator {
    /// Infix spelling, if the operator has one
    pub fn symbol(&self) -> Option<&'static str> {
        let s = match self {
            Operator::In => " in ",
            Operator::Isa => " matches ",
            Operator::Dot => ".",
            Operator::Mul => " * ",
            Operator::Div => " / ",
            Operator::Mod => " mod ",
            Operator::Rem => " rem ",
            Operator::Add => " + ",
            Operator::Sub => " - ",
            Operator::Eq => " == ",
            Operator::Geq => " >= ",
            Operator::Leq => " <= ",
            Operator::Neq => " != ",
            Operator::Gt => " > ",
            Operator::Lt => " < ",
            Operator::Unify => " = ",
            Operator::Or => " or ",
            Operator::And => " and ",
            Operator::Assign => " := ",
            _ => return None,
        };
        Some(s)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::Neq
                | Operator::Lt
                | Operator::Gt
                | Operator::Leq
                | Operator::Geq
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn fmt_fields(f: &mut fmt::Formatter<'_>, dict: &Dictionary) -> fmt::Result {
    write!(
        f,
        "{{{}}}",
        dict.fields
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .join(", ")
    )
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::ExternalInstance(ext) => match &ext.repr {
                Some(repr) => f.write_str(repr),
                None => write!(f, "^{{id: {}}}", ext.instance_id),
            },
            Value::Dictionary(dict) | Value::Pattern(Pattern::Dictionary(dict)) => {
                fmt_fields(f, dict)
            }
            Value::Pattern(Pattern::Instance(lit)) => {
                f.write_str(lit.tag.as_str())?;
                fmt_fields(f, &lit.fields)
            }
            Value::Call(call) => {
                write!(f, "{}({})", call.name, call.args.iter().join(", "))
            }
            Value::List(items) => write!(f, "[{}]", items.iter().join(", ")),
            Value::Variable(sym) => f.write_str(sym.as_str()),
            Value::RestVariable(sym) => write!(f, "*{}", sym),
            Value::Expression(op) => match (op.operator, op.operator.symbol()) {
                (Operator::Not, _) => write!(f, "not {}", op.args.iter().join(", ")),
                (Operator::Dot, _) if op.args.len() == 2 => {
                    let field = &op.args[1];
                    match field.value().as_string() {
                        Some(name) => write!(f, "{}.{}", op.args[0], name),
                        None => write!(f, "{}.{}", op.args[0], field),
                    }
                }
                (_, Some(sym)) if op.args.len() >= 2 => {
                    write!(f, "{}", op.args.iter().join(sym))
                }
                (operator, _) => write!(f, "{:?}({})", operator, op.args.iter().join(", ")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_external_instance() {
        let wire = json!({"value": {"ExternalInstance": {"instance_id": 7, "constructor": null, "repr": "Repo"}}});
        let term: Term = serde_json::from_value(wire).unwrap();
        match term.value() {
            Value::ExternalInstance(ext) => {
                assert_eq!(ext.instance_id, 7);
                assert!(ext.constructor.is_none());
            }
            other => panic!("expected external instance, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_fields_default() {
        let wire = json!({"value": {"Call": {"name": "allow", "args": []}}});
        let term: Term = serde_json::from_value(wire).unwrap();
        assert!(matches!(term.value(), Value::Call(c) if c.kwargs.is_none()));
    }

    #[test]
    fn test_contains_expression() {
        let isa = Term::new(Value::Expression(Operation {
            operator: Operator::Isa,
            args: vec![Term::variable("x"), Term::string("y")],
        }));
        let list = Term::new(Value::List(vec![Term::integer(1), isa]));
        assert!(list.contains_expression());
        assert!(!Term::integer(1).contains_expression());
    }

    #[test]
    fn test_display() {
        let dot = Term::new(Value::Expression(Operation {
            operator: Operator::Dot,
            args: vec![Term::variable("resource"), Term::string("org_id")],
        }));
        let eq = Term::new(Value::Expression(Operation {
            operator: Operator::Unify,
            args: vec![dot, Term::string("osohq")],
        }));
        assert_eq!(eq.to_string(), "resource.org_id = \"osohq\"");
    }
}
