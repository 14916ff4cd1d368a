/// policy-bridge - Host bridge for a policy reasoning core
///
/// The reasoning core evaluates policy but knows nothing about host objects.
/// This library sits between the two: it drives queries through the core's
/// event protocol, answers the calls the core makes into host code, and turns
/// partially evaluated authorization queries into queries against a data store.
///
/// # Architecture
///
/// 1. **Terms** (`terms` module)
///    - Wire representation of values exchanged with the core
///    - JSON codec and conversion to and from host values
///
/// 2. **Host objects** (`host` module)
///    - Class descriptors with attribute, method and comparison capabilities
///    - Per-session instance registry mapping core ids to host objects
///    - Dispatcher for external calls, iteration, `isa` checks and operators
///
/// 3. **Sessions** (`query` module)
///    - One state machine per query: pull an event, answer it, repeat
///    - Releases the core-side query exactly once
///
/// 4. **Data filtering** (`filter` module)
///    - Filters built by the core compiled into join plans
///    - Adapters that run plans and materialize records as instances
///
/// # Example
///
/// ```ignore
/// use policy_bridge::{Bridge, BridgeConfig, ScriptedCore};
/// use serde_json::json;
///
/// let core = Arc::new(ScriptedCore::new().with_query(vec![
///     json!({"Result": {"bindings": {}}}),
///     json!({"Done": {"partial_result": false}}),
/// ]));
/// let bridge = Bridge::new(core, BridgeConfig::default());
/// assert!(bridge.is_allowed("alice", "read", "doc")?);
/// ```

pub mod bridge;
pub mod config;
pub mod core;
pub mod error;
pub mod filter;
pub mod host;
pub mod query;
pub mod terms;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use core::{Bindings, Event, QueryHandle, QuerySource, ReasoningCore, ScriptedCore, Transcript};
pub use error::{BridgeError, ErrorKind, Result};
pub use filter::{DataAdapter, Filter, MemoryAdapter, QueryPlan};
pub use host::{ClassBuilder, ClassDescriptor, ClassTable, Instance, NativeValue, Registry};
pub use query::{Query, ResultSet, Session};
pub use terms::{Term, Value};
