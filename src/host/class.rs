//! Class descriptors.
//!
//! A [`ClassDescriptor`] is everything the bridge knows about a host type: how
//! to construct it, its ancestors, the attributes and methods the reasoning
//! core may call, how to iterate it, how to compare it, and the field types the
//! filter compiler needs.
//!
//! # Example
//!
//! ```ignore
//! let repo = ClassBuilder::<Repo>::new("Repo")
//!     .with_constructor(|args| Ok(Repo { id: args.named("id")?, org_id: args.named("org_id")? }))
//!     .add_attribute("id", |r: &Repo| r.id.clone())
//!     .add_relation("organization", RelationKind::One, "Org", "org_id", "id")
//!     .build();
//! bridge.register_class(repo)?;
//! ```

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::convert::{FromNative, ToNative};
use super::value::{Instance, NativeValue};
use crate::error::DispatchError;
use crate::terms::Operator;

/// Lazily produced values of a sequence-returning call
pub type NativeIter = Box<dyn Iterator<Item = NativeValue> + Send>;

pub type Constructor =
    Arc<dyn Fn(ConstructorArgs) -> Result<Arc<dyn Any + Send + Sync>, DispatchError> + Send + Sync>;
pub type AttributeGetter = Arc<dyn Fn(&Instance) -> Result<NativeValue, DispatchError> + Send + Sync>;
pub type Method =
    Arc<dyn Fn(&Instance, Vec<NativeValue>) -> Result<CallOutput, DispatchError> + Send + Sync>;
pub type IteratorFn = Arc<dyn Fn(&Instance) -> Result<NativeIter, DispatchError> + Send + Sync>;
pub type IsaCheck = Arc<dyn Fn(&Instance) -> bool + Send + Sync>;
pub type ComparisonFn =
    Arc<dyn Fn(&Instance, &Instance) -> Result<bool, DispatchError> + Send + Sync>;

/// Field type metadata, per class, keyed by field name
pub type Types = BTreeMap<String, BTreeMap<String, FieldType>>;

/// What a method call produced
pub enum CallOutput {
    Value(NativeValue),
    /// Values handed to the core one per request
    Sequence(NativeIter),
}

impl fmt::Debug for CallOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutput::Value(v) => f.debug_tuple("Value").field(v).finish(),
            CallOutput::Sequence(_) => f.write_str("Sequence(..)"),
        }
    }
}

/// Arguments passed to a constructor
#[derive(Debug, Clone, Default)]
pub struct ConstructorArgs {
    pub positional: Vec<NativeValue>,
    pub named: BTreeMap<String, NativeValue>,
}

impl ConstructorArgs {
    /// Positional argument `index`, converted
    pub fn positional<T: FromNative>(&self, index: usize) -> Result<T, DispatchError> {
        match self.positional.get(index) {
            Some(value) => T::from_native(value.clone()),
            None => Err(DispatchError::ArityMismatch {
                expected: index + 1,
                got: self.positional.len(),
            }),
        }
    }

    /// Named argument, converted
    pub fn named<T: FromNative>(&self, name: &str) -> Result<T, DispatchError> {
        match self.named.get(name) {
            Some(value) => T::from_native(value.clone()),
            None => Err(DispatchError::runtime(format!(
                "missing constructor argument '{}'",
                name
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    One,
    Many,
}

/// Declared type of a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// A plain column holding a value of `class_tag`
    Base { class_tag: String },
    /// A link to another class: `self.my_field = other.other_field`
    Relation {
        kind: RelationKind,
        other_class_tag: String,
        my_field: String,
        other_field: String,
    },
}

/// Everything the bridge knows about a host type
pub struct ClassDescriptor {
    name: String,
    type_id: Option<TypeId>,
    constructor: Option<Constructor>,
    ancestors: SmallVec<[String; 4]>,
    attributes: HashMap<String, AttributeGetter>,
    methods: HashMap<String, Method>,
    iterator: Option<IteratorFn>,
    isa_check: Option<IsaCheck>,
    equality: Option<ComparisonFn>,
    comparisons: HashMap<Operator, ComparisonFn>,
    fields: BTreeMap<String, FieldType>,
    primary_key: Option<String>,
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attributes: Vec<_> = self.attributes.keys().collect();
        attributes.sort();
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("ancestors", &self.ancestors)
            .field("attributes", &attributes)
            .field("methods", &methods)
            .field("iterable", &self.iterator.is_some())
            .field("fields", &self.fields)
            .field("primary_key", &self.primary_key)
            .finish()
    }
}

impl ClassDescriptor {
    /// Descriptor with no capabilities
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_id: None,
            constructor: None,
            ancestors: SmallVec::new(),
            attributes: HashMap::new(),
            methods: HashMap::new(),
            iterator: None,
            isa_check: None,
            equality: None,
            comparisons: HashMap::new(),
            fields: BTreeMap::new(),
            primary_key: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// Declared supertypes, nearest first
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeGetter> {
        self.attributes.get(name)
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn iterator(&self) -> Option<&IteratorFn> {
        self.iterator.as_ref()
    }

    pub fn isa_check(&self) -> Option<&IsaCheck> {
        self.isa_check.as_ref()
    }

    pub fn equality(&self) -> Option<&ComparisonFn> {
        self.equality.as_ref()
    }

    pub fn comparison(&self, operator: Operator) -> Option<&ComparisonFn> {
        self.comparisons.get(&operator)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldType> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldType> {
        self.fields.get(name)
    }

    /// Declared primary key column, if any
    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }
}

/// Typed builder for a [`ClassDescriptor`] over the Rust type `T`
pub struct ClassBuilder<T> {
    class: ClassDescriptor,
    ty: PhantomData<fn() -> T>,
}

fn receiver<'a, T: Any>(instance: &'a Instance, class: &str) -> Result<&'a T, DispatchError> {
    instance
        .downcast_ref::<T>()
        .ok_or_else(|| DispatchError::TypeError {
            expected: class.to_string(),
            got: instance.class_name().to_string(),
        })
}

impl<T: Any + Send + Sync> ClassBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        let mut class = ClassDescriptor::new(name);
        class.type_id = Some(TypeId::of::<T>());
        Self {
            class,
            ty: PhantomData,
        }
    }

    pub fn with_constructor<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConstructorArgs) -> Result<T, DispatchError> + Send + Sync + 'static,
    {
        self.class.constructor = Some(Arc::new(move |args: ConstructorArgs| -> Result<Arc<dyn Any + Send + Sync>, DispatchError> {
            let object: Arc<dyn Any + Send + Sync> = Arc::new(f(&args)?);
            Ok(object)
        }));
        self
    }

    pub fn add_ancestor(mut self, name: impl Into<String>) -> Self {
        self.class.ancestors.push(name.into());
        self
    }

    pub fn add_attribute<F, R>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: ToNative,
    {
        let class = self.class.name.clone();
        self.class.attributes.insert(
            name.to_string(),
            Arc::new(move |instance: &Instance| -> Result<NativeValue, DispatchError> {
                Ok(f(receiver::<T>(instance, &class)?).to_native())
            }),
        );
        self
    }

    pub fn add_method<F, R>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&T, Vec<NativeValue>) -> Result<R, DispatchError> + Send + Sync + 'static,
        R: ToNative,
    {
        let class = self.class.name.clone();
        self.class.methods.insert(
            name.to_string(),
            Arc::new(move |instance: &Instance, args: Vec<NativeValue>| -> Result<CallOutput, DispatchError> {
                let value = f(receiver::<T>(instance, &class)?, args)?;
                Ok(CallOutput::Value(value.to_native()))
            }),
        );
        self
    }

    /// A method whose result is handed to the core one element at a time
    pub fn add_iterator_method<F, I>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&T, Vec<NativeValue>) -> Result<I, DispatchError> + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: ToNative + 'static,
        I::IntoIter: Send + 'static,
    {
        let class = self.class.name.clone();
        self.class.methods.insert(
            name.to_string(),
            Arc::new(move |instance: &Instance, args: Vec<NativeValue>| -> Result<CallOutput, DispatchError> {
                let items = f(receiver::<T>(instance, &class)?, args)?;
                let iter: NativeIter = Box::new(items.into_iter().map(ToNative::to_native));
                Ok(CallOutput::Sequence(iter))
            }),
        );
        self
    }

    /// Makes instances of this class iterable (`x in instance`)
    pub fn with_iterator<F, I>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> I + Send + Sync + 'static,
        I: IntoIterator,
        I::Item: ToNative + 'static,
        I::IntoIter: Send + 'static,
    {
        let class = self.class.name.clone();
        self.class.iterator = Some(Arc::new(move |instance: &Instance| -> Result<NativeIter, DispatchError> {
            let items = f(receiver::<T>(instance, &class)?);
            let iter: NativeIter = Box::new(items.into_iter().map(ToNative::to_native));
            Ok(iter)
        }));
        self
    }

    /// Replaces the default membership test for `isa` against this class
    pub fn with_isa_check<F>(mut self, f: F) -> Self
    where
        F: Fn(&Instance) -> bool + Send + Sync + 'static,
    {
        self.class.isa_check = Some(Arc::new(f));
        self
    }

    /// Structural equality used for unification; defaults to identity
    pub fn with_equality_check<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        self.class.equality = Some(Arc::new(move |a: &Instance, b: &Instance| -> Result<bool, DispatchError> {
            match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
                (Some(a), Some(b)) => Ok(f(a, b)),
                _ => Ok(false),
            }
        }));
        self
    }

    pub fn add_comparison<F>(mut self, operator: Operator, f: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let class = self.class.name.clone();
        self.class.comparisons.insert(
            operator,
            Arc::new(move |a: &Instance, b: &Instance| -> Result<bool, DispatchError> {
                Ok(f(receiver::<T>(a, &class)?, receiver::<T>(b, &class)?))
            }),
        );
        self
    }

    pub fn add_field(mut self, name: &str, class_tag: &str) -> Self {
        self.class.fields.insert(
            name.to_string(),
            FieldType::Base {
                class_tag: class_tag.to_string(),
            },
        );
        self
    }

    pub fn add_relation(
        mut self,
        name: &str,
        kind: RelationKind,
        other_class_tag: &str,
        my_field: &str,
        other_field: &str,
    ) -> Self {
        self.class.fields.insert(
            name.to_string(),
            FieldType::Relation {
                kind,
                other_class_tag: other_class_tag.to_string(),
                my_field: my_field.to_string(),
                other_field: other_field.to_string(),
            },
        );
        self
    }

    pub fn with_primary_key(mut self, column: &str) -> Self {
        self.class.primary_key = Some(column.to_string());
        self
    }

    pub fn build(self) -> ClassDescriptor {
        self.class
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Repo {
        id: String,
        tags: Vec<String>,
    }

    fn repo_class() -> ClassDescriptor {
        ClassBuilder::<Repo>::new("Repo")
            .with_constructor(|args| {
                Ok(Repo {
                    id: args.named("id")?,
                    tags: Vec::new(),
                })
            })
            .add_attribute("id", |r: &Repo| r.id.clone())
            .add_iterator_method("tags", |r: &Repo, _args| Ok(r.tags.clone()))
            .add_relation("organization", RelationKind::One, "Org", "org_id", "id")
            .build()
    }

    #[test]
    fn test_builder_registers_capabilities() {
        let class = repo_class();
        assert_eq!(class.name(), "Repo");
        assert_eq!(class.type_id(), Some(TypeId::of::<Repo>()));
        assert!(class.attribute("id").is_some());
        assert!(class.method("tags").is_some());
        assert!(class.method("id").is_none());
        assert!(matches!(
            class.field("organization"),
            Some(FieldType::Relation { kind: RelationKind::One, .. })
        ));
    }

    #[test]
    fn test_attribute_rejects_wrong_receiver() {
        let class = repo_class();
        let getter = class.attribute("id").unwrap();
        let not_a_repo = Instance::new("Repo", 42i64);
        assert!(matches!(
            getter(&not_a_repo),
            Err(DispatchError::TypeError { .. })
        ));
    }

    #[test]
    fn test_constructor_missing_argument() {
        let class = repo_class();
        let ctor = class.constructor().unwrap();
        let err = ctor(ConstructorArgs::default()).err().unwrap();
        assert!(err.to_string().contains("missing constructor argument 'id'"));
    }

    #[test]
    fn test_relation_wire_shape() {
        let relation = FieldType::Relation {
            kind: RelationKind::Many,
            other_class_tag: "Repo".into(),
            my_field: "id".into(),
            other_field: "org_id".into(),
        };
        let wire = serde_json::to_value(&relation).unwrap();
        assert_eq!(wire["Relation"]["kind"], "many");
        assert_eq!(wire["Relation"]["other_class_tag"], "Repo");
    }
}
