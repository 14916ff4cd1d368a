//! Data filtering.
//!
//! The core turns an authorization query with an unbound resource into a
//! wire [`Filter`]. The [`FilterCompiler`] resolves it against the registered
//! classes into a [`QueryPlan`], which a [`DataAdapter`] runs against a store.
//!
//! # Example
//!
//! ```ignore
//! let plan = compile(&filter, &registry, "id")?;
//! let rows = execute(&adapter, &plan)?;
//! let repos = materialize(&plan, &rows, &mut registry)?;
//! ```

pub mod adapter;
pub mod compiler;
pub mod memory;
pub mod model;
pub mod plan;

pub use adapter::{execute, materialize, DataAdapter, Row};
pub use compiler::{compile, FilterCompiler};
pub use memory::{MemoryAdapter, MemoryQuery};
pub use model::{Comparison, Condition, Datum, Filter, Projection, Relation};
pub use plan::{Join, Operand, Predicate, QueryPlan};
