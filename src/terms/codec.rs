//! Wire codec.
//!
//! `decode`/`encode` move terms between JSON and [`Term`]. `to_native` and
//! `from_native` move them between [`Term`] and [`NativeValue`], resolving
//! instance references through a session's [`Registry`].

use std::collections::BTreeMap;

use super::numeric::Numeric;
use super::term::{
    Call, Dictionary, ExternalInstance, InstanceLiteral, Operation, Pattern, Symbol, Term, Value,
};
use crate::error::{DecodeError, RegistryError};
use crate::host::{NativeValue, Registry};

/// Parses a wire term
pub fn decode(wire: &serde_json::Value) -> Result<Term, DecodeError> {
    serde_json::from_value(wire.clone()).map_err(|err| DecodeError::new("term", err.to_string()))
}

/// Parses a wire term from its JSON text
pub fn decode_str(text: &str) -> Result<Term, DecodeError> {
    serde_json::from_str(text).map_err(|err| DecodeError::new("term", err.to_string()))
}

/// Renders a term in wire form
pub fn encode(term: &Term) -> serde_json::Value {
    // Map keys are symbols and non-finite floats are strings, so this cannot fail.
    serde_json::to_value(term).unwrap_or(serde_json::Value::Null)
}

fn fields_to_native(
    fields: &BTreeMap<Symbol, Term>,
    registry: &Registry,
) -> Result<BTreeMap<String, NativeValue>, RegistryError> {
    fields
        .iter()
        .map(|(k, v)| Ok((k.0.clone(), to_native(v, registry)?)))
        .collect()
}

fn terms_to_native(terms: &[Term], registry: &Registry) -> Result<Vec<NativeValue>, RegistryError> {
    terms.iter().map(|t| to_native(t, registry)).collect()
}

/// Converts a term to a host value.
///
/// Instance references are looked up in `registry`; a reference to an id the
/// registry does not hold is an error.
pub fn to_native(term: &Term, registry: &Registry) -> Result<NativeValue, RegistryError> {
    let value = match term.value() {
        Value::Number(Numeric::Integer(i)) => NativeValue::Integer(*i),
        Value::Number(Numeric::Float(f)) => NativeValue::Float(*f),
        Value::String(s) => NativeValue::String(s.clone()),
        Value::Boolean(b) => NativeValue::Boolean(*b),
        Value::ExternalInstance(ext) => {
            NativeValue::Instance(registry.lookup(ext.instance_id)?.instance.clone())
        }
        Value::Dictionary(dict) => NativeValue::Map(fields_to_native(&dict.fields, registry)?),
        Value::Pattern(Pattern::Dictionary(dict)) => NativeValue::Pattern {
            tag: None,
            fields: fields_to_native(&dict.fields, registry)?,
        },
        Value::Pattern(Pattern::Instance(lit)) => NativeValue::Pattern {
            tag: Some(lit.tag.0.clone()),
            fields: fields_to_native(&lit.fields.fields, registry)?,
        },
        Value::Call(call) => NativeValue::Predicate {
            name: call.name.0.clone(),
            args: terms_to_native(&call.args, registry)?,
        },
        Value::List(items) => NativeValue::List(terms_to_native(items, registry)?),
        Value::Variable(sym) | Value::RestVariable(sym) => NativeValue::Variable(sym.0.clone()),
        Value::Expression(op) => NativeValue::Expression {
            operator: op.operator,
            args: terms_to_native(&op.args, registry)?,
        },
    };
    Ok(value)
}

fn fields_from_native(
    fields: &BTreeMap<String, NativeValue>,
    registry: &mut Registry,
) -> BTreeMap<Symbol, Term> {
    fields
        .iter()
        .map(|(k, v)| (Symbol::new(k.clone()), from_native(v, registry)))
        .collect()
}

/// Converts a host value to a term.
///
/// Host objects are cached in `registry`, reusing the id of an object that
/// was handed over before.
pub fn from_native(value: &NativeValue, registry: &mut Registry) -> Term {
    let value = match value {
        NativeValue::Integer(i) => Value::Number(Numeric::Integer(*i)),
        NativeValue::Float(f) => Value::Number(Numeric::Float(*f)),
        NativeValue::String(s) => Value::String(s.clone()),
        NativeValue::Boolean(b) => Value::Boolean(*b),
        NativeValue::List(items) => {
            Value::List(items.iter().map(|v| from_native(v, registry)).collect())
        }
        NativeValue::Map(fields) => Value::Dictionary(Dictionary {
            fields: fields_from_native(fields, registry),
        }),
        NativeValue::Instance(instance) => {
            let instance_id = registry.cache(instance);
            Value::ExternalInstance(ExternalInstance {
                instance_id,
                constructor: None,
                repr: Some(instance.class_name().to_string()),
            })
        }
        NativeValue::Variable(name) => Value::Variable(Symbol::new(name.clone())),
        NativeValue::Predicate { name, args } => Value::Call(Call {
            name: Symbol::new(name.clone()),
            args: args.iter().map(|v| from_native(v, registry)).collect(),
            kwargs: None,
        }),
        NativeValue::Expression { operator, args } => Value::Expression(Operation {
            operator: *operator,
            args: args.iter().map(|v| from_native(v, registry)).collect(),
        }),
        NativeValue::Pattern { tag: None, fields } => Value::Pattern(Pattern::Dictionary(Dictionary {
            fields: fields_from_native(fields, registry),
        })),
        NativeValue::Pattern {
            tag: Some(tag),
            fields,
        } => Value::Pattern(Pattern::Instance(InstanceLiteral {
            tag: Symbol::new(tag.clone()),
            fields: Dictionary {
                fields: fields_from_native(fields, registry),
            },
        })),
    };
    Term::new(value)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::host::{ClassTable, Instance};
    use crate::terms::Operator;

    fn registry() -> Registry {
        let counter = Arc::new(AtomicU64::new(1));
        Registry::new(
            ClassTable::new(),
            Arc::new(move || counter.fetch_add(1, Ordering::SeqCst)),
        )
    }

    #[test]
    fn test_decode_primitives() {
        let term = decode(&json!({"value": {"Number": {"Integer": 42}}})).unwrap();
        assert_eq!(term, Term::integer(42));
        let term = decode(&json!({"value": {"Number": {"Float": "Infinity"}}})).unwrap();
        assert!(matches!(term.value(), Value::Number(Numeric::Float(f)) if f.is_infinite()));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let err = decode(&json!({"value": {"Frobnicate": 1}})).unwrap_err();
        assert_eq!(err.what, "term");
        let err = decode_str("{\"value\": ").unwrap_err();
        assert_eq!(err.what, "term");
    }

    #[test]
    fn test_encode_wire_shape() {
        let term = Term::new(Value::List(vec![Term::string("a"), Term::boolean(true)]));
        assert_eq!(
            encode(&term),
            json!({"value": {"List": [
                {"value": {"String": "a"}},
                {"value": {"Boolean": true}}
            ]}})
        );
    }

    #[test]
    fn test_to_native_unknown_instance() {
        let reg = registry();
        let term = decode(&json!({"value": {"ExternalInstance": {"instance_id": 5}}})).unwrap();
        assert_eq!(
            to_native(&term, &reg).unwrap_err(),
            RegistryError::UnknownInstance { id: 5 }
        );
    }

    #[test]
    fn test_instance_reference_identity() {
        let mut reg = registry();
        let user = Instance::new("User", "alice".to_string());
        let term = from_native(&NativeValue::Instance(user.clone()), &mut reg);
        let again = from_native(&NativeValue::Instance(user.clone()), &mut reg);
        assert_eq!(term, again);

        match to_native(&term, &reg).unwrap() {
            NativeValue::Instance(back) => assert!(back.ptr_eq(&user)),
            other => panic!("expected instance, got {:?}", other),
        }
    }

    #[test]
    fn test_expression_to_native() {
        let reg = registry();
        let term = Term::new(Value::Expression(Operation {
            operator: Operator::Isa,
            args: vec![
                Term::variable("resource"),
                Term::new(Value::Pattern(Pattern::Instance(InstanceLiteral {
                    tag: Symbol::from("Repo"),
                    fields: Dictionary::new(),
                }))),
            ],
        }));
        let native = to_native(&term, &reg).unwrap();
        assert!(native.contains_expression());
        match native {
            NativeValue::Expression { operator, args } => {
                assert_eq!(operator, Operator::Isa);
                assert_eq!(args[0], NativeValue::Variable("resource".into()));
                assert!(matches!(&args[1], NativeValue::Pattern { tag: Some(t), .. } if t == "Repo"));
            }
            other => panic!("expected expression, got {:?}", other),
        }
    }
}
