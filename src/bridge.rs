//! The host-facing entry point.
//!
//! A [`Bridge`] owns a reasoning core and the class table shared by every
//! query it starts. Each query runs in its own [`Session`] with a fresh
//! instance registry, so host objects never leak between queries.
//!
//! # Example
//!
//! ```ignore
//! let bridge = Bridge::new(core, BridgeConfig::default());
//! bridge.register_class(
//!     ClassBuilder::<Repo>::new("Repo")
//!         .add_attribute("name", |r: &Repo| r.name.clone())
//!         .add_relation("organization", RelationKind::One, "Org", "org_id", "id")
//!         .build(),
//! )?;
//! bridge.load_files(&["policy.polar"])?;
//!
//! if bridge.is_allowed(alice.clone(), "read", repo)? { /* ... */ }
//! let repos = bridge.authorized_resources(alice, "read", "Repo", &adapter)?;
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::core::{Bindings, QuerySource, ReasoningCore};
use crate::error::{BridgeError, CoreError, CoreErrorKind, Result};
use crate::filter::{compile, execute, materialize, DataAdapter, Filter, QueryPlan};
use crate::host::{ClassDescriptor, ClassTable, Instance, NativeValue, Registry, ToNative};
use crate::query::{Query, Session, SessionMode};
use crate::terms::{
    from_native, Call, Dictionary, InstanceLiteral, Operation, Operator, Pattern, Symbol, Term,
    Value,
};

const POLICY_EXTENSION: &str = "polar";

#[derive(Clone)]
pub struct Bridge {
    core: Arc<dyn ReasoningCore>,
    classes: ClassTable,
    config: Arc<BridgeConfig>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("classes", &self.classes.names())
            .field("config", &self.config)
            .finish()
    }
}

/// `var` restricted to instances of `class_tag`: `var matches class_tag{}`
fn isa_constraint(var: &str, class_tag: &str) -> Term {
    let pattern = Term::new(Value::Pattern(Pattern::Instance(InstanceLiteral {
        tag: Symbol::new(class_tag),
        fields: Dictionary::new(),
    })));
    let isa = Term::new(Value::Expression(Operation {
        operator: Operator::Isa,
        args: vec![Term::variable(var), pattern],
    }));
    Term::new(Value::Expression(Operation {
        operator: Operator::And,
        args: vec![isa],
    }))
}

impl Bridge {
    pub fn new(core: Arc<dyn ReasoningCore>, config: BridgeConfig) -> Self {
        Self {
            core,
            classes: ClassTable::new(),
            config: Arc::new(config),
        }
    }

    pub fn core(&self) -> &Arc<dyn ReasoningCore> {
        &self.core
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    /// Declares `class` to the core and publishes it to every later query.
    ///
    /// Registering a name again replaces the earlier descriptor.
    pub fn register_class(&self, class: ClassDescriptor) -> Result<()> {
        self.core.register_class(class.name(), class.ancestors())?;
        debug!(target: "policy_bridge::registry", class = class.name(), "registered class");
        self.classes.register(class);
        Ok(())
    }

    pub fn load_str(&self, source: &str, filename: Option<&str>) -> Result<()> {
        self.core.load_source(source, filename)?;
        Ok(())
    }

    /// Loads policy files; only `.polar` files are accepted
    pub fn load_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<()> {
        for path in paths {
            let path = path.as_ref();
            let name = path.display().to_string();
            if path.extension().and_then(|ext| ext.to_str()) != Some(POLICY_EXTENSION) {
                return Err(CoreError::new(
                    CoreErrorKind::Validation,
                    format!("incorrect file type {}: expected a .{} file", name, POLICY_EXTENSION),
                )
                .into());
            }
            let source = fs::read_to_string(path).map_err(|err| {
                CoreError::new(
                    CoreErrorKind::Operational,
                    format!("failed to read {}: {}", name, err),
                )
            })?;
            self.load_str(&source, Some(&name))?;
        }
        Ok(())
    }

    pub fn clear_rules(&self) -> Result<()> {
        self.core.clear_rules()?;
        Ok(())
    }

    /// Empty instance registry whose ids come from the core
    pub fn registry(&self) -> Registry {
        let core = self.core.clone();
        Registry::new(self.classes.clone(), Arc::new(move || core.new_instance_id()))
    }

    fn session(&self, registry: Registry, mode: SessionMode) -> Session {
        Session::new(self.core.clone(), registry, mode, self.config.accept_expression)
    }

    /// Runs a query given as policy source text
    pub fn query(&self, text: &str) -> Result<Query> {
        let mut session = self.session(self.registry(), SessionMode::Ordinary);
        session.start(QuerySource::Text(text.to_string()))?;
        Ok(Query::new(session))
    }

    /// Queries the rule `name` with host values as arguments
    pub fn query_rule(&self, name: &str, args: Vec<NativeValue>) -> Result<Query> {
        let session = self.start_rule(name, args, Bindings::new(), SessionMode::Ordinary)?;
        Ok(Query::new(session))
    }

    fn start_rule(
        &self,
        name: &str,
        args: Vec<NativeValue>,
        bindings: Bindings,
        mode: SessionMode,
    ) -> Result<Session> {
        let mut registry = self.registry();
        let args = args.iter().map(|arg| from_native(arg, &mut registry)).collect();
        let term = Term::new(Value::Call(Call {
            name: Symbol::new(name),
            args,
            kwargs: None,
        }));
        let mut session = self.session(registry, mode);
        session.start(QuerySource::Term { term, bindings })?;
        Ok(session)
    }

    /// Whether the allow rule holds for the triple
    pub fn is_allowed(
        &self,
        actor: impl ToNative,
        action: impl ToNative,
        resource: impl ToNative,
    ) -> Result<bool> {
        let mut query = self.query_rule(
            &self.config.allow_rule,
            vec![actor.to_native(), action.to_native(), resource.to_native()],
        )?;
        match query.next() {
            Some(result) => result.map(|_| true),
            None => Ok(false),
        }
    }

    /// String actions `actor` may take on `resource`, sorted
    pub fn authorized_actions(
        &self,
        actor: impl ToNative,
        resource: impl ToNative,
    ) -> Result<Vec<String>> {
        let query = self.query_rule(
            &self.config.allow_rule,
            vec![
                actor.to_native(),
                NativeValue::Variable("action".to_string()),
                resource.to_native(),
            ],
        )?;
        let mut actions = BTreeSet::new();
        for result in query {
            if let Some(NativeValue::String(action)) = result?.get("action") {
                actions.insert(action.clone());
            }
        }
        Ok(actions.into_iter().collect())
    }

    /// Plan selecting the `class_tag` records `actor` may `action`
    pub fn authorized_plan(
        &self,
        actor: impl ToNative,
        action: impl ToNative,
        class_tag: &str,
    ) -> Result<QueryPlan> {
        let (plan, _) = self.filter_plan(actor.to_native(), action.to_native(), class_tag)?;
        Ok(plan)
    }

    fn filter_plan(
        &self,
        actor: NativeValue,
        action: NativeValue,
        class_tag: &str,
    ) -> Result<(QueryPlan, Registry)> {
        self.classes.require(class_tag)?;
        let var = self.config.filter_variable.as_str();
        let mut bindings = Bindings::new();
        bindings.insert(Symbol::new(var), isa_constraint(var, class_tag));

        let mut session = self.start_rule(
            &self.config.allow_rule,
            vec![actor, action, NativeValue::Variable(var.to_string())],
            bindings,
            SessionMode::Filtering,
        )?;
        let partials = session.collect_partials()?;
        let registry = session.take_registry();
        debug!(target: "policy_bridge::filter::compile", class = class_tag, partials = partials.len(), "collected partial results");

        let types = self.classes.serialize_types();
        let wire = self.core.build_data_filter(&types, &partials, var, class_tag)?;
        let filter = Filter::decode(&wire).map_err(BridgeError::from)?;
        let plan = compile(&filter, &registry, &self.config.default_primary_key)?;
        if self.config.explain_filters {
            info!(target: "policy_bridge::filter::compile", %filter, %plan, "explain");
        }
        Ok((plan, registry))
    }

    /// The adapter query for the authorized `class_tag` records, not executed
    pub fn authorized_query<A: DataAdapter + ?Sized>(
        &self,
        actor: impl ToNative,
        action: impl ToNative,
        class_tag: &str,
        adapter: &A,
    ) -> Result<A::Query> {
        let (plan, _) = self.filter_plan(actor.to_native(), action.to_native(), class_tag)?;
        Ok(adapter.build_query(&plan)?)
    }

    /// Fetches the authorized `class_tag` records as host instances
    pub fn authorized_resources<A: DataAdapter + ?Sized>(
        &self,
        actor: impl ToNative,
        action: impl ToNative,
        class_tag: &str,
        adapter: &A,
    ) -> Result<Vec<Instance>> {
        let (plan, mut registry) =
            self.filter_plan(actor.to_native(), action.to_native(), class_tag)?;
        let rows = execute(adapter, &plan)?;
        materialize(&plan, &rows, &mut registry)
    }

    /// [`Bridge::authorized_resources`] on the blocking pool
    #[cfg(feature = "async")]
    pub async fn authorized_resources_async<A>(
        &self,
        actor: impl ToNative,
        action: impl ToNative,
        class_tag: &str,
        adapter: Arc<A>,
    ) -> Result<Vec<Instance>>
    where
        A: DataAdapter + Send + Sync + 'static,
    {
        let bridge = self.clone();
        let actor = actor.to_native();
        let action = action.to_native();
        let class_tag = class_tag.to_string();
        tokio::task::spawn_blocking(move || {
            bridge.authorized_resources(actor, action, &class_tag, adapter.as_ref())
        })
        .await
        .map_err(|err| {
            BridgeError::from(CoreError::new(
                CoreErrorKind::Operational,
                format!("filter task failed: {}", err),
            ))
        })?
    }
}
