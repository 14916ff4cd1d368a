//! Native call dispatch.
//!
//! Resolves the reasoning core's requests against registered classes:
//! attribute and method calls, iteration, type checks, unification and
//! comparison operators.
//!
//! # Cursors
//!
//! A call whose result is a sequence is handed back one element per request.
//! The dispatcher keeps the iterator under the request's call id; once it is
//! drained the call answers [`CallOutcome::Exhausted`] and any further request
//! for that id is [`DispatchError::OutOfSequence`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::trace;

use super::class::{CallOutput, FieldType, NativeIter};
use super::registry::ClassTable;
use super::value::{Instance, NativeValue};
use crate::error::DispatchError;
use crate::terms::Operator;

/// Answer to a call request
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Value(NativeValue),
    /// The call's result stream has ended
    Exhausted,
}

struct Cursor {
    label: String,
    iter: NativeIter,
    yielded: usize,
}

/// Per-session dispatch state
#[derive(Default)]
pub struct Dispatcher {
    cursors: HashMap<u64, Cursor>,
    exhausted: HashSet<u64>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("open_cursors", &self.cursors.len())
            .field("exhausted", &self.exhausted.len())
            .finish()
    }
}

fn unsupported(operator: Operator, left: &NativeValue, right: &NativeValue) -> DispatchError {
    DispatchError::UnsupportedOperation {
        operator: operator.to_string(),
        operands: format!("{} and {}", left.type_name(), right.type_name()),
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sequence results still being handed out
    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }

    /// Drops every open cursor
    pub fn clear(&mut self) {
        self.cursors.clear();
        self.exhausted.clear();
    }

    /// Calls `name` on `receiver`.
    ///
    /// `args` is `None` for a bare attribute access. A method wins over an
    /// attribute of the same name; lookup walks the receiver's class and then
    /// its ancestors.
    pub fn call(
        &mut self,
        classes: &ClassTable,
        call_id: u64,
        receiver: &NativeValue,
        name: &str,
        args: Option<Vec<NativeValue>>,
    ) -> Result<CallOutcome, DispatchError> {
        if let Some(outcome) = self.resume(call_id)? {
            return Ok(outcome);
        }
        match invoke(classes, receiver, name, args)? {
            CallOutput::Value(value) => Ok(CallOutcome::Value(value)),
            CallOutput::Sequence(iter) => {
                let label = format!("{}.{}", receiver.type_name(), name);
                self.open(call_id, label, iter)
            }
        }
    }

    /// Next element of `iterable` for the iteration identified by `call_id`
    pub fn next_external(
        &mut self,
        classes: &ClassTable,
        call_id: u64,
        iterable: &NativeValue,
    ) -> Result<CallOutcome, DispatchError> {
        if let Some(outcome) = self.resume(call_id)? {
            return Ok(outcome);
        }
        let iter: NativeIter = match iterable {
            NativeValue::List(items) => Box::new(items.clone().into_iter()),
            NativeValue::Map(fields) => Box::new(
                fields
                    .clone()
                    .into_iter()
                    .map(|(k, v)| NativeValue::List(vec![NativeValue::String(k), v])),
            ),
            NativeValue::Instance(instance) => {
                let iterator = classes
                    .mro(instance.class_name())
                    .iter()
                    .filter_map(|name| classes.get(name))
                    .find_map(|class| class.iterator().cloned());
                match iterator {
                    Some(iterator) => iterator(instance)?,
                    None => {
                        return Err(DispatchError::NotIterable {
                            value: iterable.to_string(),
                        })
                    }
                }
            }
            other => {
                return Err(DispatchError::NotIterable {
                    value: other.to_string(),
                })
            }
        };
        self.open(call_id, format!("iter({})", iterable.type_name()), iter)
    }

    fn resume(&mut self, call_id: u64) -> Result<Option<CallOutcome>, DispatchError> {
        if self.exhausted.contains(&call_id) {
            return Err(DispatchError::OutOfSequence { call_id });
        }
        if self.cursors.contains_key(&call_id) {
            return Ok(Some(self.advance(call_id)));
        }
        Ok(None)
    }

    fn open(&mut self, call_id: u64, label: String, iter: NativeIter) -> Result<CallOutcome, DispatchError> {
        self.cursors.insert(
            call_id,
            Cursor {
                label,
                iter,
                yielded: 0,
            },
        );
        Ok(self.advance(call_id))
    }

    fn advance(&mut self, call_id: u64) -> CallOutcome {
        let next = match self.cursors.get_mut(&call_id) {
            Some(cursor) => {
                let next = cursor.iter.next();
                if next.is_some() {
                    cursor.yielded += 1;
                }
                next
            }
            None => None,
        };
        match next {
            Some(value) => CallOutcome::Value(value),
            None => {
                if let Some(cursor) = self.cursors.remove(&call_id) {
                    trace!(
                        target: "policy_bridge::dispatch",
                        call_id,
                        source = %cursor.label,
                        yielded = cursor.yielded,
                        "cursor exhausted"
                    );
                }
                self.exhausted.insert(call_id);
                CallOutcome::Exhausted
            }
        }
    }

    /// `value matches class_tag{fields}`
    pub fn isa(
        &self,
        classes: &ClassTable,
        value: &NativeValue,
        class_tag: &str,
        fields: Option<&BTreeMap<String, NativeValue>>,
    ) -> Result<bool, DispatchError> {
        let type_ok = match value {
            NativeValue::Instance(instance) => instance_isa(classes, instance, class_tag),
            NativeValue::Integer(_) => matches!(class_tag, "Integer" | "Number"),
            NativeValue::Float(_) => matches!(class_tag, "Float" | "Number"),
            NativeValue::String(_) => class_tag == "String",
            NativeValue::Boolean(_) => class_tag == "Boolean",
            NativeValue::List(_) => class_tag == "List",
            NativeValue::Map(_) => class_tag == "Dictionary",
            _ => false,
        };
        if !type_ok {
            return Ok(false);
        }
        match fields {
            Some(fields) => self.fields_match(classes, value, fields),
            None => Ok(true),
        }
    }

    fn fields_match(
        &self,
        classes: &ClassTable,
        value: &NativeValue,
        fields: &BTreeMap<String, NativeValue>,
    ) -> Result<bool, DispatchError> {
        for (name, expected) in fields {
            let actual = match invoke(classes, value, name, None) {
                Ok(CallOutput::Value(actual)) => actual,
                Ok(CallOutput::Sequence(_)) => return Ok(false),
                Err(DispatchError::MethodNotFound { .. }) => return Ok(false),
                Err(err) => return Err(err),
            };
            let ok = match expected {
                NativeValue::Pattern {
                    tag: Some(tag),
                    fields,
                } => self.isa(classes, &actual, tag, Some(fields))?,
                NativeValue::Pattern { tag: None, fields } => {
                    self.fields_match(classes, &actual, fields)?
                }
                expected => expected.loose_eq(&actual),
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether following `path` from `base_tag` lands on a `class_tag`
    pub fn isa_with_path(
        &self,
        classes: &ClassTable,
        base_tag: &str,
        path: &[String],
        class_tag: &str,
    ) -> bool {
        let mut current = base_tag.to_string();
        for segment in path {
            let field = classes
                .mro(&current)
                .iter()
                .filter_map(|name| classes.get(name))
                .find_map(|class| class.field(segment).cloned());
            current = match field {
                Some(FieldType::Base { class_tag }) => class_tag,
                Some(FieldType::Relation {
                    other_class_tag, ..
                }) => other_class_tag,
                None => return false,
            };
        }
        classes.is_subclass(&current, class_tag)
    }

    /// `true` if `left` is a more specific match for `instance` than `right`
    pub fn is_subspecializer(
        &self,
        classes: &ClassTable,
        instance: &Instance,
        left: &str,
        right: &str,
    ) -> bool {
        let mro = classes.mro(instance.class_name());
        let left = mro.iter().position(|name| name == left);
        let right = mro.iter().position(|name| name == right);
        match (left, right) {
            (Some(left), Some(right)) => left < right,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn is_subclass(&self, classes: &ClassTable, left: &str, right: &str) -> bool {
        classes.is_subclass(left, right)
    }

    /// Structural equality between two host objects
    pub fn unify(
        &self,
        classes: &ClassTable,
        left: &Instance,
        right: &Instance,
    ) -> Result<bool, DispatchError> {
        if left.ptr_eq(right) {
            return Ok(true);
        }
        let equality = classes
            .mro(left.class_name())
            .iter()
            .filter_map(|name| classes.get(name))
            .find_map(|class| class.equality().cloned());
        match equality {
            Some(equal) => equal(left, right),
            None => Ok(false),
        }
    }

    /// Applies a comparison operator
    pub fn operator(
        &self,
        classes: &ClassTable,
        operator: Operator,
        left: &NativeValue,
        right: &NativeValue,
    ) -> Result<bool, DispatchError> {
        if let (NativeValue::Instance(a), NativeValue::Instance(b)) = (left, right) {
            let comparison = classes
                .mro(a.class_name())
                .iter()
                .filter_map(|name| classes.get(name))
                .find_map(|class| class.comparison(operator).cloned());
            if let Some(compare) = comparison {
                return compare(a, b);
            }
            return match operator {
                Operator::Eq | Operator::Unify => self.unify(classes, a, b),
                Operator::Neq => Ok(!self.unify(classes, a, b)?),
                _ => Err(unsupported(operator, left, right)),
            };
        }
        let ordering = || left.compare(right).ok_or_else(|| unsupported(operator, left, right));
        match operator {
            Operator::Eq | Operator::Unify => Ok(left.loose_eq(right)),
            Operator::Neq => Ok(!left.loose_eq(right)),
            Operator::Lt => Ok(ordering()? == Ordering::Less),
            Operator::Gt => Ok(ordering()? == Ordering::Greater),
            Operator::Leq => Ok(ordering()? != Ordering::Greater),
            Operator::Geq => Ok(ordering()? != Ordering::Less),
            _ => Err(unsupported(operator, left, right)),
        }
    }
}

fn instance_isa(classes: &ClassTable, instance: &Instance, class_tag: &str) -> bool {
    if let Some(check) = classes.get(class_tag).and_then(|class| class.isa_check().cloned()) {
        return check(instance);
    }
    classes.is_subclass(instance.class_name(), class_tag)
}

fn invoke(
    classes: &ClassTable,
    receiver: &NativeValue,
    name: &str,
    args: Option<Vec<NativeValue>>,
) -> Result<CallOutput, DispatchError> {
    let instance = match receiver {
        NativeValue::Instance(instance) => instance,
        other => return builtin(other, name, args.unwrap_or_default()).map(CallOutput::Value),
    };
    let zero_args = args.as_ref().map_or(true, Vec::is_empty);
    for class_name in classes.mro(instance.class_name()) {
        let Some(class) = classes.get(&class_name) else {
            continue;
        };
        if let Some(method) = class.method(name) {
            return method(instance, args.unwrap_or_default());
        }
        if zero_args {
            if let Some(getter) = class.attribute(name) {
                return getter(instance).map(CallOutput::Value);
            }
        }
    }
    Err(DispatchError::MethodNotFound {
        class: instance.class_name().to_string(),
        method: name.to_string(),
    })
}

fn arity(args: &[NativeValue], expected: usize) -> Result<(), DispatchError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(DispatchError::ArityMismatch {
            expected,
            got: args.len(),
        })
    }
}

fn string_arg(args: &[NativeValue]) -> Result<&str, DispatchError> {
    arity(args, 1)?;
    args[0].as_str().ok_or_else(|| DispatchError::TypeError {
        expected: "String".to_string(),
        got: args[0].type_name().to_string(),
    })
}

/// Methods available on primitive values
fn builtin(
    receiver: &NativeValue,
    name: &str,
    args: Vec<NativeValue>,
) -> Result<NativeValue, DispatchError> {
    match (receiver, name) {
        (NativeValue::String(s), "len") => {
            arity(&args, 0)?;
            Ok(NativeValue::Integer(s.chars().count() as i64))
        }
        (NativeValue::String(s), "is_empty") => Ok(NativeValue::Boolean(s.is_empty())),
        (NativeValue::String(s), "to_lowercase") => Ok(NativeValue::String(s.to_lowercase())),
        (NativeValue::String(s), "to_uppercase") => Ok(NativeValue::String(s.to_uppercase())),
        (NativeValue::String(s), "starts_with") => {
            Ok(NativeValue::Boolean(s.starts_with(string_arg(&args)?)))
        }
        (NativeValue::String(s), "ends_with") => {
            Ok(NativeValue::Boolean(s.ends_with(string_arg(&args)?)))
        }
        (NativeValue::String(s), "contains") => {
            Ok(NativeValue::Boolean(s.contains(string_arg(&args)?)))
        }
        (NativeValue::List(items), "len") => Ok(NativeValue::Integer(items.len() as i64)),
        (NativeValue::List(items), "is_empty") => Ok(NativeValue::Boolean(items.is_empty())),
        (NativeValue::List(items), "contains") => {
            arity(&args, 1)?;
            Ok(NativeValue::Boolean(items.iter().any(|item| item.loose_eq(&args[0]))))
        }
        (NativeValue::Map(fields), "len") => Ok(NativeValue::Integer(fields.len() as i64)),
        (NativeValue::Map(fields), key) if args.is_empty() && fields.contains_key(key) => {
            Ok(fields[key].clone())
        }
        (other, _) => Err(DispatchError::MethodNotFound {
            class: other.type_name().to_string(),
            method: name.to_string(),
        }),
    }
}
