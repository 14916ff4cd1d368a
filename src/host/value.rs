//! Host-side values.
//!
//! [`NativeValue`] is what native code sees after a term has been decoded:
//! primitives stay primitives, instance references become [`Instance`]s, and
//! the symbolic parts of a term (variables, predicates, expressions, patterns)
//! are kept as plain data.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::terms::Operator;

/// A host object shared with the reasoning core.
///
/// The object is reference counted; the registry, result sets and the host can
/// all hold it at once. Two `Instance`s are the same object when they point at
/// the same allocation.
#[derive(Clone)]
pub struct Instance {
    class_name: Arc<str>,
    object: Arc<dyn Any + Send + Sync>,
}

impl Instance {
    pub fn new<T: Any + Send + Sync>(class_name: &str, object: T) -> Self {
        Self {
            class_name: Arc::from(class_name),
            object: Arc::new(object),
        }
    }

    pub fn from_arc(class_name: &str, object: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            class_name: Arc::from(class_name),
            object,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.object.is::<T>()
    }

    pub fn object(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.object
    }

    /// Same underlying object
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }

    /// Identity key for the underlying allocation
    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.object) as *const () as usize
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class_name)
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// A decoded value as seen by native code
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<NativeValue>),
    Map(BTreeMap<String, NativeValue>),
    Instance(Instance),
    /// An unbound variable
    Variable(String),
    /// A predicate application `name(args..)`
    Predicate { name: String, args: Vec<NativeValue> },
    /// A residual constraint
    Expression {
        operator: Operator,
        args: Vec<NativeValue>,
    },
    /// A shape to match against; `tag` is `None` for dictionary patterns
    Pattern {
        tag: Option<String>,
        fields: BTreeMap<String, NativeValue>,
    },
}

impl NativeValue {
    /// Type name used in error messages and primitive `isa` checks
    pub fn type_name(&self) -> &str {
        match self {
            NativeValue::Integer(_) => "Integer",
            NativeValue::Float(_) => "Float",
            NativeValue::String(_) => "String",
            NativeValue::Boolean(_) => "Boolean",
            NativeValue::List(_) => "List",
            NativeValue::Map(_) => "Dictionary",
            NativeValue::Instance(instance) => instance.class_name(),
            NativeValue::Variable(_) => "Variable",
            NativeValue::Predicate { .. } => "Predicate",
            NativeValue::Expression { .. } => "Expression",
            NativeValue::Pattern { .. } => "Pattern",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NativeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NativeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            NativeValue::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[NativeValue]> {
        match self {
            NativeValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// `true` if a residual constraint occurs anywhere in this value
    pub fn contains_expression(&self) -> bool {
        match self {
            NativeValue::Expression { .. } => true,
            NativeValue::List(items) => items.iter().any(NativeValue::contains_expression),
            NativeValue::Map(fields) | NativeValue::Pattern { fields, .. } => {
                fields.values().any(NativeValue::contains_expression)
            }
            NativeValue::Predicate { args, .. } => args.iter().any(NativeValue::contains_expression),
            _ => false,
        }
    }

    /// Equality that treats `1` and `1.0` as equal and compares instances by identity
    pub fn loose_eq(&self, other: &NativeValue) -> bool {
        match (self, other) {
            (NativeValue::Integer(a), NativeValue::Float(b))
            | (NativeValue::Float(b), NativeValue::Integer(a)) => (*a as f64) == *b,
            (NativeValue::List(a), NativeValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (NativeValue::Map(a), NativeValue::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            _ => self == other,
        }
    }

    /// Ordering between primitives of compatible types
    pub fn compare(&self, other: &NativeValue) -> Option<Ordering> {
        match (self, other) {
            (NativeValue::Integer(a), NativeValue::Integer(b)) => Some(a.cmp(b)),
            (NativeValue::Integer(a), NativeValue::Float(b)) => (*a as f64).partial_cmp(b),
            (NativeValue::Float(a), NativeValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (NativeValue::Float(a), NativeValue::Float(b)) => a.partial_cmp(b),
            (NativeValue::String(a), NativeValue::String(b)) => Some(a.cmp(b)),
            (NativeValue::Boolean(a), NativeValue::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Integer(i) => write!(f, "{}", i),
            NativeValue::Float(x) => write!(f, "{}", x),
            NativeValue::String(s) => write!(f, "{:?}", s),
            NativeValue::Boolean(b) => write!(f, "{}", b),
            NativeValue::List(items) => write!(f, "[{}]", items.iter().join(", ")),
            NativeValue::Map(fields) => write!(
                f,
                "{{{}}}",
                fields.iter().map(|(k, v)| format!("{}: {}", k, v)).join(", ")
            ),
            NativeValue::Instance(instance) => write!(f, "{}<{:#x}>", instance.class_name(), instance.address()),
            NativeValue::Variable(name) => f.write_str(name),
            NativeValue::Predicate { name, args } => {
                write!(f, "{}({})", name, args.iter().join(", "))
            }
            NativeValue::Expression { operator, args } => {
                write!(f, "{}({})", operator, args.iter().join(", "))
            }
            NativeValue::Pattern { tag, fields } => write!(
                f,
                "{}{{{}}}",
                tag.as_deref().unwrap_or(""),
                fields.iter().map(|(k, v)| format!("{}: {}", k, v)).join(", ")
            ),
        }
    }
}
