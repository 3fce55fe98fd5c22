//! Error types for the Sapling runtime

use std::fmt;

use thiserror::Error;

use crate::permission::Permission;
use crate::value::Value;

/// The registries whose entries must be unique per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationKind {
    /// Host alias (`@api` → `https://api.example.com`)
    HostAlias,
    /// Named pattern
    Pattern,
    /// Pattern namespace
    PatternNamespace,
    /// URL or host protocol client
    ProtocolClient,
    /// Host resolution data
    HostResolution,
    /// Event-source factory (per scheme)
    EventSourceFactory,
    /// Database opener (per scheme)
    OpenDatabase,
    /// Free-entity loader (per pattern kind)
    LoadFreeEntity,
    /// Static host-resolution checker (per scheme)
    StaticHostCheck,
    /// Resource content parser (per mimetype)
    ContentTypeParser,
}

impl fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistrationKind::HostAlias => "host alias",
            RegistrationKind::Pattern => "pattern",
            RegistrationKind::PatternNamespace => "pattern namespace",
            RegistrationKind::ProtocolClient => "protocol client",
            RegistrationKind::HostResolution => "host resolution",
            RegistrationKind::EventSourceFactory => "event source factory",
            RegistrationKind::OpenDatabase => "open-db function",
            RegistrationKind::LoadFreeEntity => "load-free-entity function",
            RegistrationKind::StaticHostCheck => "static host-resolution checker",
            RegistrationKind::ContentTypeParser => "content type parser",
        };
        f.write_str(s)
    }
}

/// Main error type for runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    // ═══════════════════════════════════════════════════════════════════
    // Values
    // ═══════════════════════════════════════════════════════════════════
    /// The value cannot be cloned (constrained, foreign or identity-bearing)
    #[error("value is not clonable")]
    NotClonable,

    /// Type mismatch error
    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        /// Expected type
        expected: String,
        /// Actual type received
        got: String,
    },

    /// An element of the wrong kind was added to a typed list
    #[error("cannot add a(n) {got} to a list of {list_kind}")]
    IncompatibleListElement {
        /// The list's element kind
        list_kind: &'static str,
        /// Type of the rejected element
        got: String,
    },

    /// Index outside of a sequence
    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Sequence length
        len: usize,
    },

    /// Attempt to mutate an immutable value
    #[error("{0} is immutable")]
    ImmutableValue(&'static str),

    // ═══════════════════════════════════════════════════════════════════
    // Context, permissions and limits
    // ═══════════════════════════════════════════════════════════════════
    /// The context lacks a permission
    #[error("not allowed, missing permission: {0}")]
    NotAllowed(Permission),

    /// The context is done
    #[error("context is done")]
    DoneContext,

    /// A global state is already associated with the context
    #[error("context already has an associated state")]
    AlreadyAssociatedState,

    /// No global state is associated with the context
    #[error("context has no associated state")]
    NoAssociatedState,

    /// A name was registered twice
    #[error("non unique {kind} registration: {name}")]
    NonUniqueRegistration {
        /// Which registry
        kind: RegistrationKind,
        /// The duplicated key
        name: String,
    },

    /// User data entry registered twice
    #[error("user data entry {0} is already defined")]
    NotUniqueUserDataEntry(String),

    /// User data value is not sharable
    #[error("user data value is not sharable: {0}")]
    NotSharableUserDataValue(String),

    /// A total limit has not enough tokens
    #[error("limit {0} reached")]
    LimitReached(String),

    // ═══════════════════════════════════════════════════════════════════
    // Patterns
    // ═══════════════════════════════════════════════════════════════════
    /// The pattern does not accept arguments
    #[error("pattern is not callable")]
    PatternNotCallable,

    /// Invalid arguments given to a callable pattern or a constructor
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid pseudo-path passed to migration
    #[error("invalid migration pseudo-path: {0}")]
    InvalidMigrationPseudoPath(String),

    /// A migration step failed at the given pseudo-path
    #[error("migration failed at {pseudo_path}: {reason}")]
    MigrationFailure {
        /// Pseudo-path of the failing step
        pseudo_path: String,
        /// Reason
        reason: String,
    },

    /// A constrained value would violate its constraint
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A complex property constraint could not be evaluated
    #[error("failed to evaluate constraint: {0}")]
    ConstraintEvaluation(String),

    /// A string did not parse against a string pattern
    #[error("failed to parse {input:?}: {reason}")]
    ParseFailure {
        /// Parsed input
        input: String,
        /// Reason
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Streams
    // ═══════════════════════════════════════════════════════════════════
    /// The stream has no more elements
    #[error("end of stream")]
    EndOfStream,

    /// No element arrived before the timeout
    #[error("timeout while waiting for the next stream element")]
    StreamElemWaitTimeout,

    /// No chunk arrived before the timeout
    #[error("timeout while waiting for the next stream chunk")]
    StreamChunkWaitTimeout,

    /// The source has no data for now
    #[error("source is temporarily dried up")]
    TempDriedUpSource,

    /// The source will never produce data again
    #[error("source is definitively dried up")]
    DefDriedUpSource,

    /// Write to a stopped stream
    #[error("writable stream is stopped")]
    StoppedWritableStream,

    /// Element rejected by a stream
    #[error("invalid stream element")]
    InvalidStreamElement,

    /// Chunk data rejected by a stream
    #[error("invalid stream chunk data")]
    InvalidStreamChunkData,

    /// Streams that cannot be merged
    #[error("invalid confluence: {0}")]
    InvalidConfluence(String),

    // ═══════════════════════════════════════════════════════════════════
    // Watchers and events
    // ═══════════════════════════════════════════════════════════════════
    /// No value arrived before the timeout
    #[error("watch timeout")]
    WatchTimeout,

    /// The watcher is stopped
    #[error("watcher is stopped")]
    StoppedWatcher,

    /// The value cannot create managed watchers
    #[error("managed watchers are not supported by this value")]
    ManagedWatchersNotSupported,

    /// Intermediate depth not supported by the value
    #[error("intermediate depth watching is not supported by this value")]
    IntermediateDepthWatchingNotSupported,

    /// Deep watching not supported by the value
    #[error("deep watching is not supported by this value")]
    DeepWatchingNotSupported,

    /// Same handler added twice to an event source
    #[error("handler already added")]
    HandlerAlreadyAdded,

    /// No factory registered for a scheme
    #[error("no event source factory for scheme {0}")]
    NoEventSourceFactory(String),

    // ═══════════════════════════════════════════════════════════════════
    // Pub-sub
    // ═══════════════════════════════════════════════════════════════════
    /// Published data must be immutable
    #[error("publication data should be immutable")]
    MutablePublicationData,

    /// Message data must be immutable
    #[error("message data should be immutable")]
    MutableMessageData,

    /// The publisher has no transient id
    #[error("publisher is not uniquely identifiable")]
    PublisherNotUniquelyIdentifiable,

    /// The subscriber has no transient id
    #[error("subscriber is not uniquely identifiable")]
    SubscriberNotUniquelyIdentifiable,

    // ═══════════════════════════════════════════════════════════════════
    // Transactions
    // ═══════════════════════════════════════════════════════════════════
    /// Waited for too many successive write transactions
    #[error("waited for too many write transactions")]
    TooManyWriteTxsWaited,

    /// Readonly transactions did not finish in time
    #[error("timeout while waiting for readonly transactions to finish")]
    WaitReadonlyTxsTimeout,

    /// A running transaction was required
    #[error("a running transaction was expected")]
    RunningTransactionExpected,

    // ═══════════════════════════════════════════════════════════════════
    // Resources, storage and databases
    // ═══════════════════════════════════════════════════════════════════
    /// Release of a resource that was never acquired
    #[error("cannot release unregistered resource {0}")]
    CannotReleaseUnregisteredResource(String),

    /// Resource not acquired before the timeout
    #[error("failed to acquire resource {0}")]
    FailedToAcquireResource(String),

    /// Resource content does not parse
    #[error("invalid resource content: {0}")]
    InvalidResourceContent(String),

    /// No parser for a content type
    #[error("no parser for content type {0}")]
    ContentTypeParserNotFound(String),

    /// Invalid storage key
    #[error("invalid storage key {0}: keys must be absolute and must not end with '/'")]
    InvalidStorageKey(String),

    /// No loader for a pattern kind
    #[error("no load-free-entity function for {0} patterns")]
    NoLoadFreeEntityFn(String),

    /// No opener for a database scheme
    #[error("no open-db function for scheme {0}")]
    NoOpenDatabaseFn(String),

    /// Database is closed
    #[error("database is closed")]
    DatabaseClosed,

    /// Schema already updated
    #[error("database schema already updated or update not allowed")]
    DatabaseSchemaAlreadyUpdatedOrNotAllowed,

    /// Feature not implemented
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Error from an external collaborator (driver, adapter, codec)
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl RuntimeError {
    /// Build a type error from an expected type name and the offending value.
    pub fn type_error(expected: impl Into<String>, got: &Value) -> Self {
        RuntimeError::TypeError {
            expected: expected.into(),
            got: type_name(got).to_string(),
        }
    }

    /// Build a registration error.
    pub fn non_unique(kind: RegistrationKind, name: impl Into<String>) -> Self {
        RuntimeError::NonUniqueRegistration {
            kind,
            name: name.into(),
        }
    }

    /// Check whether the error marks the end of a stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, RuntimeError::EndOfStream)
    }

    /// Check whether the error is one of the wait timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RuntimeError::WatchTimeout
                | RuntimeError::StreamElemWaitTimeout
                | RuntimeError::StreamChunkWaitTimeout
        )
    }
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Get the runtime type name of a value (used in error messages and type patterns).
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Bool(_) => "bool",
        Value::Rune(_) => "rune",
        Value::Byte(_) => "byte",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Str(_) => "string",
        Value::Path(_) => "path",
        Value::PathPattern(_) => "path-pattern",
        Value::Url(_) => "url",
        Value::Host(_) => "host",
        Value::HostPattern(_) => "host-pattern",
        Value::UrlPattern(_) => "url-pattern",
        Value::Scheme(_) => "scheme",
        Value::EmailAddress(_) => "email-address",
        Value::Identifier(_) => "identifier",
        Value::PropertyName(_) => "property-name",
        Value::CheckedString(_) => "checked-string",
        Value::Mimetype(_) => "mimetype",
        Value::ByteCount(_) => "byte-count",
        Value::LineCount(_) => "line-count",
        Value::RuneCount(_) => "rune-count",
        Value::ByteRate(_) => "byte-rate",
        Value::SimpleRate(_) => "simple-rate",
        Value::Duration(_) => "duration",
        Value::DateTime(_) => "datetime",
        Value::FileMode(_) => "filemode",
        Value::RuneRange(_) => "rune-range",
        Value::QuantityRange(_) => "quantity-range",
        Value::IntRange(_) => "int-range",
        Value::Port(_) => "port",
        Value::Color(_) => "color",
        Value::Option(_) => "option",
        Value::Object(_) => "object",
        Value::List(_) => "list",
        Value::Dictionary(_) => "dictionary",
        Value::RuneSlice(_) => "rune-slice",
        Value::ByteSlice(_) => "byte-slice",
        Value::StringConcat(_) => "string-concatenation",
        Value::BytesConcat(_) => "bytes-concatenation",
        Value::Record(_) => "record",
        Value::Tuple(_) => "tuple",
        Value::KeyList(_) => "keylist",
        Value::Pattern(_) => "pattern",
        Value::PatternNamespace(_) => "pattern-namespace",
        Value::Markup(_) => "markup",
        Value::Event(_) => "event",
        Value::Mutation(_) => "mutation",
        Value::Watcher(_) => "watcher",
        Value::EventSource(_) => "event-source",
        Value::Subscription(_) => "subscription",
        Value::Publication(_) => "publication",
        Value::Message(_) => "message",
        Value::Function(_) => "function",
        Value::Struct(_) => "struct",
        Value::ModuleArgs(_) => "module-args",
        Value::Opaque(_) => "opaque",
        Value::AstNode(_) => "ast-node",
    }
}
