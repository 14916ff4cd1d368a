//! Class table and instance registry.
//!
//! # Design
//!
//! - [`ClassTable`] is shared by every session of a bridge. Classes are
//!   registered up front and read on every dispatch, so it sits behind a
//!   `parking_lot::RwLock`.
//! - [`Registry`] is per session: the id → instance cache the reasoning core
//!   refers to with `ExternalInstance` terms. Ids come from the core's
//!   allocator so host-cached and core-constructed instances never collide.
//! - Handing the same host object to the core twice reuses its id.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::class::{ClassDescriptor, ConstructorArgs, Types};
use super::value::{Instance, NativeValue};
use crate::error::RegistryError;

#[derive(Default)]
struct ClassTableInner {
    classes: HashMap<String, Arc<ClassDescriptor>>,
    by_type: HashMap<TypeId, String>,
}

/// Registered classes, shared across sessions
#[derive(Clone, Default)]
pub struct ClassTable {
    inner: Arc<RwLock<ClassTableInner>>,
}

impl fmt::Debug for ClassTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassTable")
            .field("classes", &self.names())
            .finish()
    }
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class; a class already registered under the same name is
    /// replaced and returned
    pub fn register(&self, class: ClassDescriptor) -> Option<Arc<ClassDescriptor>> {
        let name = class.name().to_string();
        let mut inner = self.inner.write();
        if let Some(type_id) = class.type_id() {
            inner.by_type.insert(type_id, name.clone());
        }
        let previous = inner.classes.insert(name.clone(), Arc::new(class));
        if previous.is_some() {
            debug!(target: "policy_bridge::registry", class = %name, "replaced class registration");
        } else {
            trace!(target: "policy_bridge::registry", class = %name, "registered class");
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.inner.read().classes.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<ClassDescriptor>, RegistryError> {
        self.get(name).ok_or_else(|| RegistryError::UnknownClass {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().classes.contains_key(name)
    }

    /// Registered class names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.read().classes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Name of the class registered for the Rust type `T`
    pub fn class_name_of<T: Any>(&self) -> Option<String> {
        self.inner.read().by_type.get(&TypeId::of::<T>()).cloned()
    }

    /// Wraps `value` as an instance of the class registered for its type
    pub fn instance_of<T: Any + Send + Sync>(&self, value: T) -> Result<Instance, RegistryError> {
        match self.class_name_of::<T>() {
            Some(name) => Ok(Instance::new(&name, value)),
            None => Err(RegistryError::UnknownClass {
                name: std::any::type_name::<T>().to_string(),
            }),
        }
    }

    /// `name` followed by its ancestors, depth first, without repeats
    pub fn mro(&self, name: &str) -> Vec<String> {
        let inner = self.inner.read();
        let mut order = Vec::new();
        let mut pending = vec![name.to_string()];
        while let Some(next) = pending.pop() {
            if order.contains(&next) {
                continue;
            }
            if let Some(class) = inner.classes.get(&next) {
                pending.extend(class.ancestors().iter().rev().cloned());
            }
            order.push(next);
        }
        order
    }

    /// `true` if `left` is `right` or has it among its ancestors
    pub fn is_subclass(&self, left: &str, right: &str) -> bool {
        self.mro(left).iter().any(|name| name == right)
    }

    /// Field types of every registered class, in the shape the core expects
    pub fn serialize_types(&self) -> Types {
        self.inner
            .read()
            .classes
            .iter()
            .map(|(name, class)| (name.clone(), class.fields().clone()))
            .collect()
    }
}

/// Allocates instance ids; backed by the reasoning core's counter
pub type IdAllocator = Arc<dyn Fn() -> u64 + Send + Sync>;

/// A cached instance and the id the core knows it by
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    pub id: u64,
    pub instance: Instance,
}

/// Per-session instance cache
pub struct Registry {
    classes: ClassTable,
    instances: HashMap<u64, InstanceHandle>,
    by_address: HashMap<usize, u64>,
    records: HashMap<(String, String), Instance>,
    allocate_id: IdAllocator,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("classes", &self.classes)
            .field("instance_count", &self.instances.len())
            .field("record_count", &self.records.len())
            .finish()
    }
}

impl Registry {
    pub fn new(classes: ClassTable, allocate_id: IdAllocator) -> Self {
        Self {
            classes,
            instances: HashMap::new(),
            by_address: HashMap::new(),
            records: HashMap::new(),
            allocate_id,
        }
    }

    /// Empty registry over the same classes and id allocator
    pub fn detached(&self) -> Registry {
        Registry::new(self.classes.clone(), self.allocate_id.clone())
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Registers a class in the shared table
    pub fn register(&self, class: ClassDescriptor) {
        self.classes.register(class);
    }

    /// Constructs an instance of `class_name` and caches it under `id`
    pub fn realize(
        &mut self,
        id: u64,
        class_name: &str,
        args: ConstructorArgs,
    ) -> Result<InstanceHandle, RegistryError> {
        if self.instances.contains_key(&id) {
            return Err(RegistryError::DuplicateInstance { id });
        }
        let class = self.classes.require(class_name)?;
        let constructor = class.constructor().ok_or_else(|| RegistryError::Construction {
            class: class_name.to_string(),
            message: "class has no constructor".to_string(),
        })?;
        let object = constructor(args).map_err(|err| RegistryError::Construction {
            class: class_name.to_string(),
            message: err.to_string(),
        })?;
        let instance = Instance::from_arc(class_name, object);
        trace!(target: "policy_bridge::registry", id, class = class_name, "realized instance");
        Ok(self.insert(id, instance))
    }

    /// Caches an existing host object under `id`
    pub fn insert_instance(&mut self, id: u64, instance: Instance) -> Result<InstanceHandle, RegistryError> {
        if self.instances.contains_key(&id) {
            return Err(RegistryError::DuplicateInstance { id });
        }
        Ok(self.insert(id, instance))
    }

    fn insert(&mut self, id: u64, instance: Instance) -> InstanceHandle {
        self.by_address.insert(instance.address(), id);
        let handle = InstanceHandle { id, instance };
        self.instances.insert(id, handle.clone());
        handle
    }

    pub fn lookup(&self, id: u64) -> Result<&InstanceHandle, RegistryError> {
        self.instances
            .get(&id)
            .ok_or(RegistryError::UnknownInstance { id })
    }

    /// Id for `instance`, caching it under a fresh id on first sight
    pub fn cache(&mut self, instance: &Instance) -> u64 {
        if let Some(id) = self.by_address.get(&instance.address()) {
            return *id;
        }
        let id = (self.allocate_id)();
        self.insert(id, instance.clone());
        id
    }

    /// Materializes a fetched row as an instance of `class_name`.
    ///
    /// Rows with the same primary key value resolve to the same instance for
    /// the lifetime of the registry.
    pub fn realize_record(
        &mut self,
        class_name: &str,
        key: &NativeValue,
        row: &BTreeMap<String, NativeValue>,
    ) -> Result<Instance, RegistryError> {
        let cache_key = (class_name.to_string(), key.to_string());
        if let Some(instance) = self.records.get(&cache_key) {
            return Ok(instance.clone());
        }
        let class = self.classes.require(class_name)?;
        let constructor = class.constructor().ok_or_else(|| RegistryError::Construction {
            class: class_name.to_string(),
            message: "class has no constructor".to_string(),
        })?;
        let args = ConstructorArgs {
            positional: Vec::new(),
            named: row.clone(),
        };
        let object = constructor(args).map_err(|err| RegistryError::Construction {
            class: class_name.to_string(),
            message: err.to_string(),
        })?;
        let instance = Instance::from_arc(class_name, object);
        self.records.insert(cache_key, instance.clone());
        Ok(instance)
    }

    /// Drops every cached instance; registered classes are kept
    pub fn reset(&mut self) {
        self.instances.clear();
        self.by_address.clear();
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::error::DispatchError;
    use crate::host::class::ClassBuilder;

    #[derive(Debug)]
    struct Org {
        id: String,
    }

    fn registry() -> Registry {
        let classes = ClassTable::new();
        classes.register(
            ClassBuilder::<Org>::new("Org")
                .with_constructor(|args| {
                    if args.named.contains_key("fail") {
                        return Err(DispatchError::runtime("boom"));
                    }
                    Ok(Org {
                        id: args.named("id")?,
                    })
                })
                .add_attribute("id", |o: &Org| o.id.clone())
                .build(),
        );
        let counter = Arc::new(AtomicU64::new(100));
        Registry::new(classes, Arc::new(move || counter.fetch_add(1, Ordering::SeqCst)))
    }

    fn named(pairs: &[(&str, &str)]) -> ConstructorArgs {
        ConstructorArgs {
            positional: Vec::new(),
            named: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), NativeValue::String(v.to_string())))
                .collect(),
        }
    }

    #[test]
    fn test_realize_then_lookup() {
        let mut reg = registry();
        let handle = reg.realize(7, "Org", named(&[("id", "osohq")])).unwrap();
        let found = reg.lookup(7).unwrap();
        assert!(found.instance.ptr_eq(&handle.instance));
        assert_eq!(
            found.instance.downcast_ref::<Org>().map(|o| o.id.as_str()),
            Some("osohq")
        );
    }

    #[test]
    fn test_realize_duplicate_id() {
        let mut reg = registry();
        reg.realize(7, "Org", named(&[("id", "a")])).unwrap();
        let err = reg.realize(7, "Org", named(&[("id", "b")])).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateInstance { id: 7 });
    }

    #[test]
    fn test_unknown_class_and_instance() {
        let mut reg = registry();
        assert_eq!(
            reg.realize(1, "Team", ConstructorArgs::default()).unwrap_err(),
            RegistryError::UnknownClass {
                name: "Team".into()
            }
        );
        assert_eq!(
            reg.lookup(99).unwrap_err(),
            RegistryError::UnknownInstance { id: 99 }
        );
    }

    #[test]
    fn test_constructor_failure() {
        let mut reg = registry();
        let err = reg.realize(1, "Org", named(&[("fail", "yes")])).unwrap_err();
        assert!(matches!(err, RegistryError::Construction { ref class, .. } if class == "Org"));
        assert!(reg.lookup(1).is_err());
    }

    #[test]
    fn test_cache_reuses_id() {
        let mut reg = registry();
        let org = Instance::new("Org", Org { id: "x".into() });
        let first = reg.cache(&org);
        let second = reg.cache(&org.clone());
        assert_eq!(first, second);
        let other = reg.cache(&Instance::new("Org", Org { id: "x".into() }));
        assert_ne!(first, other);
    }

    #[test]
    fn test_reset_keeps_classes() {
        let mut reg = registry();
        reg.realize(1, "Org", named(&[("id", "a")])).unwrap();
        reg.reset();
        assert!(reg.is_empty());
        assert!(reg.classes().contains("Org"));
        reg.realize(1, "Org", named(&[("id", "a")])).unwrap();
    }

    #[test]
    fn test_realize_record_is_cached_by_key() {
        let mut reg = registry();
        let mut row = BTreeMap::new();
        row.insert("id".to_string(), NativeValue::String("osohq".into()));
        let key = NativeValue::String("osohq".into());
        let a = reg.realize_record("Org", &key, &row).unwrap();
        let b = reg.realize_record("Org", &key, &row).unwrap();
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_mro_and_subclass() {
        let classes = ClassTable::new();
        classes.register(ClassDescriptor::new("Resource"));
        classes.register(ClassBuilder::<Org>::new("Org").add_ancestor("Resource").build());
        assert_eq!(classes.mro("Org"), vec!["Org".to_string(), "Resource".to_string()]);
        assert!(classes.is_subclass("Org", "Resource"));
        assert!(!classes.is_subclass("Resource", "Org"));
        assert_eq!(classes.class_name_of::<Org>().as_deref(), Some("Org"));
    }
}
