//! Query session: the host side of the event protocol.
//!
//! A session drives one core query. Every event is pulled, decoded and either
//! resolved internally (`MakeExternal`, `Debug`, `None`), handed out as a
//! result, or turned into an [`ExternalRequest`] that must be answered before
//! the next pull.
//!
//! # States
//!
//! ```text
//! Idle --start--> AwaitingEvent --external event--> Suspended(call_id)
//!                   ^    |                               |
//!                   |    +--Done / error--> Completed    |
//!                   +-------------- answer --------------+
//! ```
//!
//! The core-side query is released exactly once: on `Done`, on the first
//! fatal error, on an explicit [`Session::release`], or when the session is
//! dropped mid-iteration.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::core::{Bindings, Event, QueryHandle, QuerySource, ReasoningCore};
use crate::error::{BridgeError, DispatchError, Result};
use crate::host::{
    CallOutcome, ConstructorArgs, Dispatcher, Instance, NativeValue, Registry,
};
use crate::terms::{from_native, to_native, Operator, Term, Value};

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, query not started
    Idle,
    /// Ready to pull the next event
    AwaitingEvent,
    /// Waiting for the host to answer `call_id`
    Suspended(u64),
    /// Done, failed or released
    Completed,
}

/// How results with residual constraints are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Results go to the host; residual constraints are an error unless
    /// expressions are accepted
    Ordinary,
    /// Every result is a partial result collected for filter building
    Filtering,
}

/// A call the core made into the host
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalRequest {
    /// Attribute access (`args` is `None`) or method call
    Call {
        call_id: u64,
        receiver: NativeValue,
        name: String,
        args: Option<Vec<NativeValue>>,
        kwargs: BTreeMap<String, NativeValue>,
    },
    /// Next element of an iteration
    Next { call_id: u64, iterable: NativeValue },
    Isa {
        call_id: u64,
        value: NativeValue,
        class_tag: String,
        fields: Option<BTreeMap<String, NativeValue>>,
    },
    IsaWithPath {
        call_id: u64,
        base_tag: String,
        path: Vec<String>,
        class_tag: String,
    },
    IsSubspecializer {
        call_id: u64,
        instance_id: u64,
        left: String,
        right: String,
    },
    IsSubclass {
        call_id: u64,
        left: String,
        right: String,
    },
    Unify {
        call_id: u64,
        left_instance_id: u64,
        right_instance_id: u64,
    },
    Op {
        call_id: u64,
        operator: Operator,
        left: NativeValue,
        right: NativeValue,
    },
}

impl ExternalRequest {
    pub fn call_id(&self) -> u64 {
        match self {
            ExternalRequest::Call { call_id, .. }
            | ExternalRequest::Next { call_id, .. }
            | ExternalRequest::Isa { call_id, .. }
            | ExternalRequest::IsaWithPath { call_id, .. }
            | ExternalRequest::IsSubspecializer { call_id, .. }
            | ExternalRequest::IsSubclass { call_id, .. }
            | ExternalRequest::Unify { call_id, .. }
            | ExternalRequest::Op { call_id, .. } => *call_id,
        }
    }

    /// Answered with yes/no rather than a value
    pub fn is_question(&self) -> bool {
        !matches!(
            self,
            ExternalRequest::Call { .. } | ExternalRequest::Next { .. }
        )
    }
}

/// The host's answer to an [`ExternalRequest`]
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A call result; `None` when there are no more results
    Value {
        call_id: u64,
        value: Option<NativeValue>,
    },
    Answer {
        call_id: u64,
        answer: bool,
    },
    /// Host code failed; the core gets an application error and a negative answer
    Error {
        call_id: u64,
        message: String,
        question: bool,
    },
}

impl Reply {
    pub fn call_id(&self) -> u64 {
        match self {
            Reply::Value { call_id, .. }
            | Reply::Answer { call_id, .. }
            | Reply::Error { call_id, .. } => *call_id,
        }
    }
}

/// What a pull produced
#[derive(Debug, Clone, PartialEq)]
pub enum Pull {
    Result(Bindings),
    Call(ExternalRequest),
    Debug(String),
    Done,
}

pub struct Session {
    core: Arc<dyn ReasoningCore>,
    handle: Option<QueryHandle>,
    released: bool,
    state: SessionState,
    mode: SessionMode,
    accept_expression: bool,
    registry: Registry,
    dispatcher: Dispatcher,
    partials: Vec<Bindings>,
    messages: Vec<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("released", &self.released)
            .field("partials", &self.partials.len())
            .finish()
    }
}

fn terms_to_native(terms: &[Term], registry: &Registry) -> Result<Vec<NativeValue>> {
    Ok(terms
        .iter()
        .map(|t| to_native(t, registry))
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

fn symbol_map_to_native<'a>(
    fields: impl IntoIterator<Item = (&'a crate::terms::Symbol, &'a Term)>,
    registry: &Registry,
) -> Result<BTreeMap<String, NativeValue>> {
    let mut out = BTreeMap::new();
    for (k, v) in fields {
        out.insert(k.0.clone(), to_native(v, registry)?);
    }
    Ok(out)
}

impl Session {
    pub fn new(
        core: Arc<dyn ReasoningCore>,
        registry: Registry,
        mode: SessionMode,
        accept_expression: bool,
    ) -> Self {
        Self {
            core,
            handle: None,
            released: false,
            state: SessionState::Idle,
            mode,
            accept_expression,
            registry,
            dispatcher: Dispatcher::new(),
            partials: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Starts the core-side query
    pub fn start(&mut self, source: QuerySource) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(BridgeError::protocol(format!(
                "session already started (state {:?})",
                self.state
            )));
        }
        let handle = match self.core.start_query(source) {
            Ok(handle) => handle,
            Err(err) => {
                self.state = SessionState::Completed;
                return Err(err.into());
            }
        };
        debug!(target: "policy_bridge::session", query = handle.0, mode = ?self.mode, "started query");
        self.handle = Some(handle);
        self.state = SessionState::AwaitingEvent;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn handle_id(&self) -> Option<QueryHandle> {
        self.handle
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Moves the instance registry out, leaving an empty one behind
    pub fn take_registry(&mut self) -> Registry {
        let empty = self.registry.detached();
        std::mem::replace(&mut self.registry, empty)
    }

    /// Messages of the `Debug` events seen so far
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Partial results collected so far
    pub fn partials(&self) -> &[Bindings] {
        &self.partials
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Releases the core-side query. Safe to call any number of times.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.dispatcher.clear();
        self.state = SessionState::Completed;
        if let Some(handle) = self.handle {
            trace!(target: "policy_bridge::session", query = handle.0, "released query");
            self.core.release(handle);
        }
    }

    fn complete(&mut self) {
        self.release();
    }

    fn live_handle(&self) -> Result<QueryHandle> {
        match self.handle {
            Some(handle) if !self.released => Ok(handle),
            _ => Err(BridgeError::protocol("query has been released")),
        }
    }

    /// Pulls the next event that needs the host's attention
    pub fn pull(&mut self) -> Result<Pull> {
        match self.state {
            SessionState::Completed => return Ok(Pull::Done),
            SessionState::Idle => {
                return Err(BridgeError::protocol("session has not been started"))
            }
            SessionState::Suspended(call_id) => {
                return Err(BridgeError::protocol(format!(
                    "call {} is still waiting for an answer",
                    call_id
                )))
            }
            SessionState::AwaitingEvent => {}
        }
        let pulled = self.step();
        if pulled.is_err() {
            self.complete();
        }
        pulled
    }

    fn step(&mut self) -> Result<Pull> {
        let handle = self.live_handle()?;
        loop {
            let wire = self.core.next_event(handle)?;
            let event = Event::decode(&wire)
                .map_err(|err| BridgeError::protocol(format!("malformed event: {}", err)))?;
            trace!(target: "policy_bridge::session::event", query = handle.0, kind = event.kind(), call_id = ?event.call_id());
            match event {
                Event::None => continue,
                Event::Debug { message } => {
                    info!(target: "policy_bridge::session::debug", query = handle.0, %message);
                    self.messages.push(message.clone());
                    return Ok(Pull::Debug(message));
                }
                Event::Done { partial_result } => {
                    self.complete();
                    self.check_partials(partial_result)?;
                    return Ok(Pull::Done);
                }
                Event::Result { bindings, .. } => {
                    if let Some(bindings) = self.accept_result(bindings) {
                        return Ok(Pull::Result(bindings));
                    }
                }
                Event::MakeExternal {
                    instance_id,
                    constructor,
                } => self.make_external(instance_id, &constructor)?,
                event => {
                    let request = self.request(event)?;
                    self.state = SessionState::Suspended(request.call_id());
                    return Ok(Pull::Call(request));
                }
            }
        }
    }

    fn accept_result(&mut self, bindings: Bindings) -> Option<Bindings> {
        let partial = bindings.values().any(Term::contains_expression);
        match self.mode {
            SessionMode::Filtering => {
                self.partials.push(bindings);
                None
            }
            SessionMode::Ordinary if partial && !self.accept_expression => {
                debug!(target: "policy_bridge::session", variables = bindings.len(), "stashed partial result");
                self.partials.push(bindings);
                None
            }
            SessionMode::Ordinary => Some(bindings),
        }
    }

    fn check_partials(&self, partial_result: bool) -> Result<()> {
        if self.mode == SessionMode::Filtering || self.accept_expression {
            return Ok(());
        }
        if !partial_result && self.partials.is_empty() {
            return Ok(());
        }
        let residual = self.partials.iter().find_map(|bindings| {
            bindings
                .iter()
                .find(|(_, term)| term.contains_expression())
        });
        let (variable, message) = match residual {
            Some((var, term)) => (
                var.0.clone(),
                format!(
                    "unhandled partial result for variable `{}`: {} = {}; \
                     constrain the variable before the query ends or use data filtering",
                    var, var, term
                ),
            ),
            None => (
                "unknown".to_string(),
                "query finished with unhandled residual constraints".to_string(),
            ),
        };
        Err(BridgeError::UnhandledPartial { variable, message })
    }

    fn make_external(&mut self, instance_id: u64, constructor: &Term) -> Result<()> {
        let call = match constructor.value() {
            Value::Call(call) => call,
            other => {
                return Err(BridgeError::protocol(format!(
                    "constructor of instance {} must be a call, got {}",
                    instance_id,
                    other.kind()
                )))
            }
        };
        let args = ConstructorArgs {
            positional: terms_to_native(&call.args, &self.registry)?,
            named: symbol_map_to_native(call.kwargs.iter().flatten(), &self.registry)?,
        };
        self.registry.realize(instance_id, call.name.as_str(), args)?;
        Ok(())
    }

    fn request(&self, event: Event) -> Result<ExternalRequest> {
        let registry = &self.registry;
        let request = match event {
            Event::ExternalCall {
                call_id,
                instance,
                attribute,
                args,
                kwargs,
            } => ExternalRequest::Call {
                call_id,
                receiver: to_native(&instance, registry)?,
                name: attribute.0,
                args: match args {
                    Some(args) => Some(terms_to_native(&args, registry)?),
                    None => None,
                },
                kwargs: symbol_map_to_native(kwargs.iter().flatten(), registry)?,
            },
            Event::NextExternal { call_id, iterable } => ExternalRequest::Next {
                call_id,
                iterable: to_native(&iterable, registry)?,
            },
            Event::ExternalIsa {
                call_id,
                instance,
                class_tag,
                fields,
            } => ExternalRequest::Isa {
                call_id,
                value: to_native(&instance, registry)?,
                class_tag: class_tag.0,
                fields: match fields {
                    Some(dict) => Some(symbol_map_to_native(dict.fields.iter(), registry)?),
                    None => None,
                },
            },
            Event::ExternalIsaWithPath {
                call_id,
                base_tag,
                path,
                class_tag,
            } => {
                let path = path
                    .iter()
                    .map(|segment| match segment.value() {
                        Value::String(s) => Ok(s.clone()),
                        other => Err(BridgeError::protocol(format!(
                            "path segments must be strings, got {}",
                            other.kind()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                ExternalRequest::IsaWithPath {
                    call_id,
                    base_tag: base_tag.0,
                    path,
                    class_tag: class_tag.0,
                }
            }
            Event::ExternalIsSubSpecializer {
                call_id,
                instance_id,
                left_class_tag,
                right_class_tag,
            } => ExternalRequest::IsSubspecializer {
                call_id,
                instance_id,
                left: left_class_tag.0,
                right: right_class_tag.0,
            },
            Event::ExternalIsSubclass {
                call_id,
                left_class_tag,
                right_class_tag,
            } => ExternalRequest::IsSubclass {
                call_id,
                left: left_class_tag.0,
                right: right_class_tag.0,
            },
            Event::ExternalUnify {
                call_id,
                left_instance_id,
                right_instance_id,
            } => ExternalRequest::Unify {
                call_id,
                left_instance_id,
                right_instance_id,
            },
            Event::ExternalOp {
                call_id,
                operator,
                args,
            } => {
                if args.len() != 2 {
                    return Err(BridgeError::protocol(format!(
                        "operator {} expects 2 operands, got {}",
                        operator,
                        args.len()
                    )));
                }
                ExternalRequest::Op {
                    call_id,
                    operator,
                    left: to_native(&args[0], registry)?,
                    right: to_native(&args[1], registry)?,
                }
            }
            other => {
                return Err(BridgeError::protocol(format!(
                    "unexpected {} event",
                    other.kind()
                )))
            }
        };
        Ok(request)
    }

    fn instance(&mut self, id: u64) -> Result<Instance> {
        match self.registry.lookup(id) {
            Ok(handle) => Ok(handle.instance.clone()),
            Err(err) => {
                self.complete();
                Err(err.into())
            }
        }
    }

    /// Resolves a request against the registered classes.
    ///
    /// Failures of host code become [`Reply::Error`] and the query goes on.
    /// Requests that break the protocol end the session.
    pub fn handle(&mut self, request: &ExternalRequest) -> Result<Reply> {
        let classes = self.registry.classes().clone();
        let call_id = request.call_id();
        let outcome: std::result::Result<Reply, DispatchError> = match request {
            ExternalRequest::Call {
                receiver,
                name,
                args,
                kwargs,
                ..
            } => {
                if kwargs.is_empty() {
                    self.dispatcher
                        .call(&classes, call_id, receiver, name, args.clone())
                        .map(|outcome| value_reply(call_id, outcome))
                } else {
                    Err(DispatchError::runtime(format!(
                        "keyword arguments are not supported in calls to '{}'",
                        name
                    )))
                }
            }
            ExternalRequest::Next { iterable, .. } => self
                .dispatcher
                .next_external(&classes, call_id, iterable)
                .map(|outcome| value_reply(call_id, outcome)),
            ExternalRequest::Isa {
                value,
                class_tag,
                fields,
                ..
            } => self
                .dispatcher
                .isa(&classes, value, class_tag, fields.as_ref())
                .map(|answer| Reply::Answer { call_id, answer }),
            ExternalRequest::IsaWithPath {
                base_tag,
                path,
                class_tag,
                ..
            } => Ok(Reply::Answer {
                call_id,
                answer: self
                    .dispatcher
                    .isa_with_path(&classes, base_tag, path, class_tag),
            }),
            ExternalRequest::IsSubspecializer {
                instance_id,
                left,
                right,
                ..
            } => {
                let instance = self.instance(*instance_id)?;
                Ok(Reply::Answer {
                    call_id,
                    answer: self
                        .dispatcher
                        .is_subspecializer(&classes, &instance, left, right),
                })
            }
            ExternalRequest::IsSubclass { left, right, .. } => Ok(Reply::Answer {
                call_id,
                answer: self.dispatcher.is_subclass(&classes, left, right),
            }),
            ExternalRequest::Unify {
                left_instance_id,
                right_instance_id,
                ..
            } => {
                let left = self.instance(*left_instance_id)?;
                let right = self.instance(*right_instance_id)?;
                self.dispatcher
                    .unify(&classes, &left, &right)
                    .map(|answer| Reply::Answer { call_id, answer })
            }
            ExternalRequest::Op {
                operator,
                left,
                right,
                ..
            } => self
                .dispatcher
                .operator(&classes, *operator, left, right)
                .map(|answer| Reply::Answer { call_id, answer }),
        };
        match outcome {
            Ok(reply) => Ok(reply),
            Err(DispatchError::OutOfSequence { call_id }) => {
                self.complete();
                Err(BridgeError::protocol(format!(
                    "call {} was requested again after its results ran out",
                    call_id
                )))
            }
            Err(err) => {
                warn!(target: "policy_bridge::session::dispatch", call_id, error = %err, "native call failed");
                Ok(Reply::Error {
                    call_id,
                    message: err.to_string(),
                    question: request.is_question(),
                })
            }
        }
    }

    /// Sends the answer for the suspended call back to the core
    pub fn answer(&mut self, reply: Reply) -> Result<()> {
        let expected = match self.state {
            SessionState::Suspended(call_id) => call_id,
            state => {
                self.complete();
                return Err(BridgeError::protocol(format!(
                    "no call is waiting for an answer (state {:?})",
                    state
                )));
            }
        };
        if reply.call_id() != expected {
            self.complete();
            return Err(BridgeError::protocol(format!(
                "answer for call {} but call {} is pending",
                reply.call_id(),
                expected
            )));
        }
        let handle = self.live_handle()?;
        let sent = match reply {
            Reply::Value { call_id, value } => {
                let term = value.as_ref().map(|v| from_native(v, &mut self.registry));
                self.core.call_result(handle, call_id, term)
            }
            Reply::Answer { call_id, answer } => self.core.question_result(handle, call_id, answer),
            Reply::Error {
                call_id,
                message,
                question,
            } => self.core.application_error(handle, &message).and_then(|()| {
                if question {
                    self.core.question_result(handle, call_id, false)
                } else {
                    self.core.call_result(handle, call_id, None)
                }
            }),
        };
        if let Err(err) = sent {
            self.complete();
            return Err(err.into());
        }
        self.state = SessionState::AwaitingEvent;
        Ok(())
    }

    /// Runs the event loop until the next result, answering calls on the way
    pub fn next_result(&mut self) -> Option<Result<Bindings>> {
        loop {
            match self.pull() {
                Ok(Pull::Result(bindings)) => return Some(Ok(bindings)),
                Ok(Pull::Call(request)) => {
                    let answered = self
                        .handle(&request)
                        .and_then(|reply| self.answer(reply));
                    if let Err(err) = answered {
                        return Some(Err(err));
                    }
                }
                Ok(Pull::Debug(_)) => continue,
                Ok(Pull::Done) => return None,
                Err(err) => return Some(Err(err)),
            }
        }
    }

    /// Like [`Session::next_result`], with bindings converted to host values.
    ///
    /// A binding that cannot be converted ends the query.
    pub fn next_decoded(&mut self) -> Option<Result<BTreeMap<String, NativeValue>>> {
        let bindings = match self.next_result()? {
            Ok(bindings) => bindings,
            Err(err) => return Some(Err(err)),
        };
        let decoded = self.decode_bindings(&bindings);
        if decoded.is_err() {
            self.complete();
        }
        Some(decoded)
    }

    /// Runs the query to completion and returns its partial results
    pub fn collect_partials(&mut self) -> Result<Vec<Bindings>> {
        while let Some(result) = self.next_result() {
            result?;
        }
        Ok(std::mem::take(&mut self.partials))
    }

    /// Converts result bindings to host values
    pub fn decode_bindings(&self, bindings: &Bindings) -> Result<BTreeMap<String, NativeValue>> {
        symbol_map_to_native(bindings.iter(), &self.registry)
    }
}

fn value_reply(call_id: u64, outcome: CallOutcome) -> Reply {
    match outcome {
        CallOutcome::Value(value) => Reply::Value {
            call_id,
            value: Some(value),
        },
        CallOutcome::Exhausted => Reply::Value {
            call_id,
            value: None,
        },
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}
