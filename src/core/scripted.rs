//! A reasoning core that replays recorded events.
//!
//! Each started query takes the next scripted event list; answers sent back by
//! the host are recorded as [`Ack`]s so callers can check what the bridge told
//! the core. A scripted step of the form `{"CoreError": {"kind": "Runtime",
//! "message": ".."}}` makes `next_event` fail instead of returning an event.
//!
//! ```ignore
//! let core = Arc::new(
//!     ScriptedCore::new()
//!         .with_query(vec![json!({"Result": {"bindings": {}}}), json!({"Done": {}})]),
//! );
//! let bridge = Bridge::new(core.clone(), BridgeConfig::default());
//! assert_eq!(bridge.query("allow(_, _, _)")?.count(), 1);
//! assert_eq!(core.releases().len(), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{Bindings, QueryHandle, QuerySource, ReasoningCore};
use crate::error::{CoreError, CoreErrorKind};
use crate::host::Types;
use crate::terms::Term;

/// An answer the host sent back to the core
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    CallResult {
        query: QueryHandle,
        call_id: u64,
        value: Option<Term>,
    },
    QuestionResult {
        query: QueryHandle,
        call_id: u64,
        answer: bool,
    },
    ApplicationError {
        query: QueryHandle,
        message: String,
    },
}

/// One recorded query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedQuery {
    /// Query text, for display only
    #[serde(default)]
    pub source: Option<String>,
    pub events: Vec<serde_json::Value>,
}

/// A recorded session with a core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub queries: Vec<ScriptedQuery>,
    /// Wire filters returned by successive `build_data_filter` calls
    #[serde(default)]
    pub filters: Vec<serde_json::Value>,
}

/// Arguments of a recorded `build_data_filter` call
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRequest {
    pub types: Types,
    pub partial_results: Vec<Bindings>,
    pub variable: String,
    pub class_tag: String,
}

#[derive(Default)]
struct State {
    pending: VecDeque<ScriptedQuery>,
    filters: VecDeque<serde_json::Value>,
    running: HashMap<u64, VecDeque<serde_json::Value>>,
    next_query: u64,
    started: Vec<QuerySource>,
    acks: Vec<Ack>,
    releases: Vec<QueryHandle>,
    sources: Vec<(String, Option<String>)>,
    classes: Vec<(String, Vec<String>)>,
    filter_requests: Vec<FilterRequest>,
}

/// Replays a [`Transcript`]
pub struct ScriptedCore {
    state: Mutex<State>,
    next_instance_id: AtomicU64,
}

impl std::fmt::Debug for ScriptedCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScriptedCore")
            .field("pending_queries", &state.pending.len())
            .field("running_queries", &state.running.len())
            .field("acks", &state.acks.len())
            .finish()
    }
}

impl Default for ScriptedCore {
    fn default() -> Self {
        Self::new()
    }
}

fn scripted_error(step: &serde_json::Value) -> Option<CoreError> {
    let error = step.get("CoreError")?;
    let kind = match error.get("kind").and_then(|k| k.as_str()) {
        Some("Parse") => CoreErrorKind::Parse,
        Some("Operational") => CoreErrorKind::Operational,
        Some("Validation") => CoreErrorKind::Validation,
        _ => CoreErrorKind::Runtime,
    };
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("scripted failure");
    Some(CoreError::new(kind, message))
}

impl ScriptedCore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_instance_id: AtomicU64::new(10_000),
        }
    }

    pub fn from_transcript(transcript: Transcript) -> Self {
        let core = Self::new();
        {
            let mut state = core.state.lock();
            state.pending.extend(transcript.queries);
            state.filters.extend(transcript.filters);
        }
        core
    }

    /// Queues the events of the next query to be started
    pub fn with_query(self, events: Vec<serde_json::Value>) -> Self {
        self.state.lock().pending.push_back(ScriptedQuery {
            source: None,
            events,
        });
        self
    }

    /// Queues a wire filter for the next `build_data_filter` call
    pub fn with_filter(self, filter: serde_json::Value) -> Self {
        self.state.lock().filters.push_back(filter);
        self
    }

    pub fn with_first_instance_id(self, id: u64) -> Self {
        self.next_instance_id.store(id, Ordering::SeqCst);
        self
    }

    pub fn acks(&self) -> Vec<Ack> {
        self.state.lock().acks.clone()
    }

    /// Every release call, in order, duplicates included
    pub fn releases(&self) -> Vec<QueryHandle> {
        self.state.lock().releases.clone()
    }

    pub fn started(&self) -> Vec<QuerySource> {
        self.state.lock().started.clone()
    }

    pub fn loaded_sources(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().sources.clone()
    }

    pub fn registered_classes(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().classes.clone()
    }

    pub fn filter_requests(&self) -> Vec<FilterRequest> {
        self.state.lock().filter_requests.clone()
    }

    /// Queries queued but not yet started
    pub fn pending_queries(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl ReasoningCore for ScriptedCore {
    fn load_source(&self, source: &str, filename: Option<&str>) -> Result<(), CoreError> {
        self.state
            .lock()
            .sources
            .push((source.to_string(), filename.map(str::to_string)));
        Ok(())
    }

    fn clear_rules(&self) -> Result<(), CoreError> {
        self.state.lock().sources.clear();
        Ok(())
    }

    fn register_class(&self, name: &str, ancestors: &[String]) -> Result<(), CoreError> {
        self.state
            .lock()
            .classes
            .push((name.to_string(), ancestors.to_vec()));
        Ok(())
    }

    fn new_instance_id(&self) -> u64 {
        self.next_instance_id.fetch_add(1, Ordering::SeqCst)
    }

    fn start_query(&self, source: QuerySource) -> Result<QueryHandle, CoreError> {
        let mut state = self.state.lock();
        let script = state.pending.pop_front().ok_or_else(|| {
            CoreError::new(CoreErrorKind::Operational, "no scripted query left to start")
        })?;
        state.next_query += 1;
        let handle = QueryHandle(state.next_query);
        state.running.insert(handle.0, script.events.into());
        state.started.push(source);
        trace!(target: "policy_bridge::core::scripted", query = handle.0, "started query");
        Ok(handle)
    }

    fn next_event(&self, query: QueryHandle) -> Result<serde_json::Value, CoreError> {
        let mut state = self.state.lock();
        let events = state.running.get_mut(&query.0).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::Operational,
                format!("query {} is not running", query.0),
            )
        })?;
        let step = events.pop_front().ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::Operational,
                format!("script for query {} is exhausted", query.0),
            )
        })?;
        match scripted_error(&step) {
            Some(err) => Err(err),
            None => Ok(step),
        }
    }

    fn call_result(
        &self,
        query: QueryHandle,
        call_id: u64,
        value: Option<Term>,
    ) -> Result<(), CoreError> {
        self.state.lock().acks.push(Ack::CallResult {
            query,
            call_id,
            value,
        });
        Ok(())
    }

    fn question_result(
        &self,
        query: QueryHandle,
        call_id: u64,
        answer: bool,
    ) -> Result<(), CoreError> {
        self.state.lock().acks.push(Ack::QuestionResult {
            query,
            call_id,
            answer,
        });
        Ok(())
    }

    fn application_error(&self, query: QueryHandle, message: &str) -> Result<(), CoreError> {
        self.state.lock().acks.push(Ack::ApplicationError {
            query,
            message: message.to_string(),
        });
        Ok(())
    }

    fn release(&self, query: QueryHandle) {
        let mut state = self.state.lock();
        state.running.remove(&query.0);
        state.releases.push(query);
    }

    fn build_data_filter(
        &self,
        types: &Types,
        partial_results: &[Bindings],
        variable: &str,
        class_tag: &str,
    ) -> Result<serde_json::Value, CoreError> {
        let mut state = self.state.lock();
        state.filter_requests.push(FilterRequest {
            types: types.clone(),
            partial_results: partial_results.to_vec(),
            variable: variable.to_string(),
            class_tag: class_tag.to_string(),
        });
        state.filters.pop_front().ok_or_else(|| {
            CoreError::new(CoreErrorKind::Operational, "no scripted filter left")
        })
    }
}
