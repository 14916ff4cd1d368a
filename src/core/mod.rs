//! The reasoning core interface.
//!
//! The bridge never evaluates policy itself. It drives a [`ReasoningCore`]:
//! start a query, pull wire events, answer the calls the core makes back into
//! the host, and release the query when done.
//!
//! # Design
//!
//! - Events cross this boundary in wire form (`serde_json::Value`) and are
//!   decoded on the bridge side, so a core living behind an FFI or a socket
//!   implements the trait by forwarding strings.
//! - A query is identified by an opaque [`QueryHandle`]. The core owns the
//!   query state; `release` frees it and must be called exactly once per
//!   handle. The session layer guarantees that.
//! - [`ScriptedCore`] replays recorded transcripts and is what the test suite
//!   and the `replay` command run against.

pub mod events;
pub mod scripted;

use crate::error::CoreError;
use crate::host::Types;
use crate::terms::Term;

pub use events::{Bindings, Event};
pub use scripted::{Ack, ScriptedCore, Transcript};

/// Opaque id of a running query inside the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub u64);

/// What to ask the core
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    /// Policy-language source text
    Text(String),
    /// A structured goal, usually a rule `Call`, with pre-bound variables
    Term { term: Term, bindings: Bindings },
}

/// A policy reasoning core
pub trait ReasoningCore: Send + Sync {
    /// Loads policy source
    fn load_source(&self, source: &str, filename: Option<&str>) -> Result<(), CoreError>;

    /// Drops every loaded rule
    fn clear_rules(&self) -> Result<(), CoreError>;

    /// Declares a host class and its ancestors
    fn register_class(&self, name: &str, ancestors: &[String]) -> Result<(), CoreError>;

    /// Fresh instance id from the core's id space
    fn new_instance_id(&self) -> u64;

    fn start_query(&self, source: QuerySource) -> Result<QueryHandle, CoreError>;

    /// Next event of `query`, in wire form
    fn next_event(&self, query: QueryHandle) -> Result<serde_json::Value, CoreError>;

    /// Answers an `ExternalCall` or `NextExternal`; `None` means no (more) results
    fn call_result(
        &self,
        query: QueryHandle,
        call_id: u64,
        value: Option<Term>,
    ) -> Result<(), CoreError>;

    /// Answers a yes/no question (`ExternalIsa`, `ExternalOp`, ...)
    fn question_result(&self, query: QueryHandle, call_id: u64, answer: bool)
        -> Result<(), CoreError>;

    /// Reports a failure raised by host code
    fn application_error(&self, query: QueryHandle, message: &str) -> Result<(), CoreError>;

    /// Frees the query
    fn release(&self, query: QueryHandle);

    /// Turns the partial results of a filtering query into a wire filter
    fn build_data_filter(
        &self,
        types: &Types,
        partial_results: &[Bindings],
        variable: &str,
        class_tag: &str,
    ) -> Result<serde_json::Value, CoreError>;
}
