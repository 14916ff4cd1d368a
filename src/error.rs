//! Error types for the bridge.
//!
//! Every failure the bridge can report is a [`BridgeError`]. The leaf enums
//! ([`RegistryError`], [`DispatchError`], [`CompilerError`], ...) are the
//! vocabulary of the individual components and convert into `BridgeError`
//! with `?`.
//!
//! # Propagation
//!
//! - [`DispatchError`]s raised inside a native call are caught at the dispatch
//!   boundary and handed back to the reasoning core as an application error.
//!   They only reach host code when the host calls the dispatcher directly.
//! - Everything else aborts the session that raised it and is returned to the
//!   caller. Use [`BridgeError::kind`] to branch on the category.

use std::fmt;
use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Coarse error category, stable across messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The core sent something that violates the event protocol
    Protocol,
    /// A wire value could not be decoded
    Decoding,
    /// Unknown class, unknown instance or duplicate instance
    Registry,
    /// A native call failed
    Dispatch,
    /// A filter could not be compiled
    Compiler,
    /// A query ended with residual constraints nobody asked for
    UnhandledPartial,
    /// The reasoning core reported an error
    Core,
    /// The data adapter failed to build or run a query
    Adapter,
    /// Invalid bridge configuration
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Protocol => "protocol",
            ErrorKind::Decoding => "decoding",
            ErrorKind::Registry => "registry",
            ErrorKind::Dispatch => "dispatch",
            ErrorKind::Compiler => "compiler",
            ErrorKind::UnhandledPartial => "unhandled partial",
            ErrorKind::Core => "core",
            ErrorKind::Adapter => "adapter",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

/// Position in a policy source reported by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub filename: Option<String>,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)?;
        if let Some(filename) = &self.filename {
            write!(f, " in {}", filename)?;
        }
        Ok(())
    }
}

/// A wire value that does not have the expected shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// What was being decoded ("term", "event", "filter", ...)
    pub what: &'static str,
    pub message: String,
}

impl DecodeError {
    pub fn new(what: &'static str, message: impl Into<String>) -> Self {
        Self {
            what,
            message: message.into(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.what, self.message)
    }
}

impl std::error::Error for DecodeError {}

/// Errors from the instance registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No class registered under this name
    UnknownClass { name: String },
    /// No instance cached under this id
    UnknownInstance { id: u64 },
    /// An instance is already cached under this id
    DuplicateInstance { id: u64 },
    /// The class constructor failed
    Construction { class: String, message: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownClass { name } => write!(f, "unregistered class '{}'", name),
            Self::UnknownInstance { id } => write!(f, "unregistered instance {}", id),
            Self::DuplicateInstance { id } => {
                write!(f, "instance {} has already been realized", id)
            }
            Self::Construction { class, message } => {
                write!(f, "error constructing instance of {}: {}", class, message)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors raised while resolving or executing a native call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Neither a method nor an attribute matched anywhere on the ancestor chain
    MethodNotFound { class: String, method: String },
    /// Wrong number of arguments
    ArityMismatch { expected: usize, got: usize },
    /// Type error in arguments
    TypeError { expected: String, got: String },
    /// A value was iterated that has no iterator capability
    NotIterable { value: String },
    /// Operator not supported for these operands
    UnsupportedOperation { operator: String, operands: String },
    /// A request arrived for a call whose result stream already ended
    OutOfSequence { call_id: u64 },
    /// The native code itself failed
    Runtime(String),
}

impl DispatchError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodNotFound { class, method } => {
                write!(f, "'{}' object has no attribute or method '{}'", class, method)
            }
            Self::ArityMismatch { expected, got } => {
                write!(f, "arity mismatch: expected {}, got {}", expected, got)
            }
            Self::TypeError { expected, got } => {
                write!(f, "type error: expected {}, got {}", expected, got)
            }
            Self::NotIterable { value } => write!(f, "{} is not iterable", value),
            Self::UnsupportedOperation { operator, operands } => {
                write!(f, "unsupported operation {} for {}", operator, operands)
            }
            Self::OutOfSequence { call_id } => {
                write!(f, "call {} was already exhausted", call_id)
            }
            Self::Runtime(msg) => write!(f, "runtime error: {}", msg),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Errors turning a filter into an executable query plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerError {
    /// A condition used a comparison other than Eq, Neq, In or Nin
    UnsupportedCondition { kind: String },
    /// A projection referenced a type that no relation joins in
    UnjoinedType { type_name: String },
    /// A relation named a field that is not a declared relation
    UnknownRelation { type_name: String, field: String },
    /// A relation whose left side is never reachable from the model
    UnreachableJoin { relation: String },
    /// A literal that cannot be used in a predicate
    InvalidLiteral { message: String },
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedCondition { kind } => {
                write!(f, "unsupported condition kind '{}'", kind)
            }
            Self::UnjoinedType { type_name } => {
                write!(f, "type {} is referenced but never joined", type_name)
            }
            Self::UnknownRelation { type_name, field } => {
                write!(f, "{}.{} is not a registered relation", type_name, field)
            }
            Self::UnreachableJoin { relation } => {
                write!(f, "relation {} is not connected to the query model", relation)
            }
            Self::InvalidLiteral { message } => write!(f, "invalid literal: {}", message),
        }
    }
}

impl std::error::Error for CompilerError {}

/// Category of an error reported by the reasoning core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreErrorKind {
    Parse,
    Runtime,
    Operational,
    Validation,
}

/// An error reported by the reasoning core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreError {
    pub kind: CoreErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} error: {}", self.kind, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        Ok(())
    }
}

impl std::error::Error for CoreError {}

/// Errors from a data adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    UnknownTable { name: String },
    UnknownColumn { table: String, column: String },
    Execution(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTable { name } => write!(f, "no table for type {}", name),
            Self::UnknownColumn { table, column } => {
                write!(f, "table {} has no column {}", table, column)
            }
            Self::Execution(msg) => write!(f, "query execution failed: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Errors loading a [`BridgeConfig`](crate::config::BridgeConfig)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "failed to read config '{}': {}", path.display(), message)
            }
            Self::Parse(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The core violated the event protocol; the session is aborted
    Protocol { message: String },
    Decoding(DecodeError),
    Registry(RegistryError),
    Dispatch(DispatchError),
    Compiler(CompilerError),
    /// The query produced residual constraints outside a filtering context
    UnhandledPartial { variable: String, message: String },
    Core(CoreError),
    Adapter(AdapterError),
    Config(ConfigError),
}

impl BridgeError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Decoding(_) => ErrorKind::Decoding,
            Self::Registry(_) => ErrorKind::Registry,
            Self::Dispatch(_) => ErrorKind::Dispatch,
            Self::Compiler(_) => ErrorKind::Compiler,
            Self::UnhandledPartial { .. } => ErrorKind::UnhandledPartial,
            Self::Core(_) => ErrorKind::Core,
            Self::Adapter(_) => ErrorKind::Adapter,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Source location, when the core provided one
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Self::Core(err) => err.location.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol { message } => write!(f, "protocol error: {}", message),
            Self::Decoding(err) => write!(f, "{}", err),
            Self::Registry(err) => write!(f, "{}", err),
            Self::Dispatch(err) => write!(f, "{}", err),
            Self::Compiler(err) => write!(f, "compiler error: {}", err),
            Self::UnhandledPartial { message, .. } => write!(f, "{}", message),
            Self::Core(err) => write!(f, "{}", err),
            Self::Adapter(err) => write!(f, "{}", err),
            Self::Config(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decoding(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Dispatch(err) => Some(err),
            Self::Compiler(err) => Some(err),
            Self::Core(err) => Some(err),
            Self::Adapter(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Protocol { .. } | Self::UnhandledPartial { .. } => None,
        }
    }
}

impl From<DecodeError> for BridgeError {
    fn from(err: DecodeError) -> Self {
        Self::Decoding(err)
    }
}

impl From<RegistryError> for BridgeError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl From<DispatchError> for BridgeError {
    fn from(err: DispatchError) -> Self {
        Self::Dispatch(err)
    }
}

impl From<CompilerError> for BridgeError {
    fn from(err: CompilerError) -> Self {
        Self::Compiler(err)
    }
}

impl From<CoreError> for BridgeError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<AdapterError> for BridgeError {
    fn from(err: AdapterError) -> Self {
        Self::Adapter(err)
    }
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}
