//! Value representation for runtime values

mod atoms;
mod callable;
mod clone;
mod compound;
mod dictionary;
mod display;
mod equality;
mod immutable;
mod impls;
mod list;
mod markup;
mod object;
mod slices;
mod smart_lock;

pub use atoms::{
    CheckedString, Color, Host, HostPattern, IntRange, OptionValue, Path, PathPattern, Port,
    QuantityRange, RuneRange, Scheme, Url, UrlPattern,
};
pub use callable::{FunctionValue, NativeFnPtr, Parameter};
pub use clone::CloneMap;
pub use compound::{AstNode, ModuleArgs, ModuleParam, ModuleParams, Opaque, StructValue};
pub use dictionary::Dictionary;
pub use immutable::{KeyList, Record, Tuple};
pub use list::{List, ListData};
pub use markup::{MarkupElement, MarkupNode};
pub use object::Object;
pub use slices::{ByteSlice, BytesConcatenation, RuneSlice, StringConcatenation};
pub use smart_lock::{SmartLock, SmartLockGuard};

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use crate::context::StateId;
use crate::event::{Event, EventSource};
use crate::pattern::{Pattern, PatternNamespace};
use crate::pubsub::{Message, Publication, Subscription};
use crate::watch::{Mutation, Watchable, Watcher};

/// Runtime value.
///
/// Values are organized into tiers:
/// - Atomic immutables: inline or `Arc<str>` backed, copied freely
/// - Composites: `Arc`-wrapped, mutable ones carry a [`SmartLock`]
/// - Patterns, reactive values and host wrappers
#[derive(Clone)]
pub enum Value {
    // ═══════════════════════════════════════════════════════════════════
    // Atomic immutables
    // ═══════════════════════════════════════════════════════════════════
    /// The unit value
    Nil,
    /// Boolean
    Bool(bool),
    /// Unicode scalar value
    Rune(char),
    /// Byte
    Byte(u8),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// UNIX-like path
    Path(Path),
    /// Path glob or prefix pattern
    PathPattern(PathPattern),
    /// Absolute URL
    Url(Url),
    /// Host with scheme
    Host(Host),
    /// Host glob
    HostPattern(HostPattern),
    /// URL pattern
    UrlPattern(UrlPattern),
    /// URL scheme
    Scheme(Scheme),
    /// Email address
    EmailAddress(Arc<str>),
    /// Identifier
    Identifier(Arc<str>),
    /// Property name (`.name`)
    PropertyName(Arc<str>),
    /// String checked against a named pattern
    CheckedString(Arc<CheckedString>),
    /// Mimetype (`application/json`)
    Mimetype(Arc<str>),
    /// Byte count
    ByteCount(i64),
    /// Line count
    LineCount(i64),
    /// Rune count
    RuneCount(i64),
    /// Bytes per second
    ByteRate(i64),
    /// Operations per second
    SimpleRate(i64),
    /// Duration
    Duration(Duration),
    /// Date and time
    DateTime(SystemTime),
    /// UNIX file mode
    FileMode(u32),
    /// Inclusive rune range
    RuneRange(RuneRange),
    /// Quantity range
    QuantityRange(Arc<QuantityRange>),
    /// Inclusive integer range
    IntRange(IntRange),
    /// Port
    Port(Port),
    /// RGB color
    Color(Color),
    /// Named option
    Option(Arc<OptionValue>),

    // ═══════════════════════════════════════════════════════════════════
    // Mutable composites
    // ═══════════════════════════════════════════════════════════════════
    /// Ordered keyed map
    Object(Arc<Object>),
    /// List over a typed underlying list
    List(Arc<List>),
    /// Map with arbitrary keys
    Dictionary(Arc<Dictionary>),
    /// Mutable sequence of runes
    RuneSlice(Arc<RuneSlice>),
    /// Sequence of bytes, optionally immutable
    ByteSlice(Arc<ByteSlice>),
    /// Lazy string concatenation
    StringConcat(Arc<StringConcatenation>),
    /// Lazy bytes concatenation
    BytesConcat(Arc<BytesConcatenation>),

    // ═══════════════════════════════════════════════════════════════════
    // Immutable composites
    // ═══════════════════════════════════════════════════════════════════
    /// Immutable keyed map
    Record(Arc<Record>),
    /// Immutable sequence
    Tuple(Arc<Tuple>),
    /// Immutable list of keys
    KeyList(Arc<KeyList>),

    // ═══════════════════════════════════════════════════════════════════
    // Patterns and markup
    // ═══════════════════════════════════════════════════════════════════
    /// First-class pattern
    Pattern(Pattern),
    /// Named group of patterns
    PatternNamespace(Arc<PatternNamespace>),
    /// Markup tree
    Markup(Arc<MarkupNode>),

    // ═══════════════════════════════════════════════════════════════════
    // Reactive and streaming
    // ═══════════════════════════════════════════════════════════════════
    /// Event emitted by an event source
    Event(Arc<Event>),
    /// Change to a watchable value
    Mutation(Arc<Mutation>),
    /// Watcher
    Watcher(Arc<dyn Watcher>),
    /// Event source
    EventSource(Arc<dyn EventSource>),
    /// Pub-sub subscription
    Subscription(Arc<Subscription>),
    /// Pub-sub publication
    Publication(Arc<Publication>),
    /// Message
    Message(Arc<Message>),

    // ═══════════════════════════════════════════════════════════════════
    // Callables and host values
    // ═══════════════════════════════════════════════════════════════════
    /// Function
    Function(Arc<FunctionValue>),
    /// Struct instance
    Struct(Arc<StructValue>),
    /// Module arguments
    ModuleArgs(Arc<ModuleArgs>),
    /// Opaque host handle
    Opaque(Arc<Opaque>),
    /// Syntax node from the parse-tree provider
    AstNode(Arc<AstNode>),
}

/// Process-lifetime identity of a pointer-bearing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransientId(pub usize);

impl TransientId {
    /// Identity of the value behind an `Arc`.
    pub fn of<T: ?Sized>(arc: &Arc<T>) -> Self {
        TransientId(Arc::as_ptr(arc) as *const () as usize)
    }
}

/// Non-owning handle on a pointer-bearing value.
///
/// While the handle exists the value's allocation is kept, so its
/// [`TransientId`] cannot be reused by another value.
#[derive(Clone)]
pub struct WeakValue {
    id: TransientId,
    alive: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl WeakValue {
    /// Handle on the value behind an `Arc`.
    pub fn of<T: ?Sized + Send + Sync + 'static>(arc: &Arc<T>) -> Self {
        let weak: Weak<T> = Arc::downgrade(arc);
        WeakValue {
            id: TransientId::of(arc),
            alive: Arc::new(move || weak.strong_count() > 0),
        }
    }

    /// Identity of the value.
    pub fn id(&self) -> TransientId {
        self.id
    }

    /// Check whether the value is still referenced.
    pub fn is_alive(&self) -> bool {
        (self.alive)()
    }
}

impl std::fmt::Debug for WeakValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakValue")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Value {
    /// Identity of pointer-bearing values; `None` for atomic values.
    pub fn transient_id(&self) -> Option<TransientId> {
        let id = match self {
            Value::CheckedString(a) => TransientId::of(a),
            Value::QuantityRange(a) => TransientId::of(a),
            Value::Option(a) => TransientId::of(a),
            Value::Object(a) => TransientId::of(a),
            Value::List(a) => TransientId::of(a),
            Value::Dictionary(a) => TransientId::of(a),
            Value::RuneSlice(a) => TransientId::of(a),
            Value::ByteSlice(a) => TransientId::of(a),
            Value::StringConcat(a) => TransientId::of(a),
            Value::BytesConcat(a) => TransientId::of(a),
            Value::Record(a) => TransientId::of(a),
            Value::Tuple(a) => TransientId::of(a),
            Value::KeyList(a) => TransientId::of(a),
            Value::Pattern(p) => return p.transient_id(),
            Value::PatternNamespace(a) => TransientId::of(a),
            Value::Markup(a) => TransientId::of(a),
            Value::Event(a) => TransientId::of(a),
            Value::Mutation(a) => TransientId::of(a),
            Value::Watcher(a) => TransientId::of(a),
            Value::EventSource(a) => TransientId::of(a),
            Value::Subscription(a) => TransientId::of(a),
            Value::Publication(a) => TransientId::of(a),
            Value::Message(a) => TransientId::of(a),
            Value::Function(a) => TransientId::of(a),
            Value::Struct(a) => TransientId::of(a),
            Value::ModuleArgs(a) => TransientId::of(a),
            Value::Opaque(a) => TransientId::of(a),
            Value::AstNode(a) => TransientId::of(a),
            _ => return None,
        };
        Some(id)
    }

    /// Non-owning handle on pointer-bearing values; `None` for atomic values.
    pub fn downgrade(&self) -> Option<WeakValue> {
        let weak = match self {
            Value::CheckedString(a) => WeakValue::of(a),
            Value::QuantityRange(a) => WeakValue::of(a),
            Value::Option(a) => WeakValue::of(a),
            Value::Object(a) => WeakValue::of(a),
            Value::List(a) => WeakValue::of(a),
            Value::Dictionary(a) => WeakValue::of(a),
            Value::RuneSlice(a) => WeakValue::of(a),
            Value::ByteSlice(a) => WeakValue::of(a),
            Value::StringConcat(a) => WeakValue::of(a),
            Value::BytesConcat(a) => WeakValue::of(a),
            Value::Record(a) => WeakValue::of(a),
            Value::Tuple(a) => WeakValue::of(a),
            Value::KeyList(a) => WeakValue::of(a),
            Value::Pattern(p) => p.downgrade(),
            Value::PatternNamespace(a) => WeakValue::of(a),
            Value::Markup(a) => WeakValue::of(a),
            Value::Event(a) => WeakValue::of(a),
            Value::Mutation(a) => WeakValue::of(a),
            Value::Watcher(a) => WeakValue::of(a),
            Value::EventSource(a) => WeakValue::of(a),
            Value::Subscription(a) => WeakValue::of(a),
            Value::Publication(a) => WeakValue::of(a),
            Value::Message(a) => WeakValue::of(a),
            Value::Function(a) => WeakValue::of(a),
            Value::Struct(a) => WeakValue::of(a),
            Value::ModuleArgs(a) => WeakValue::of(a),
            Value::Opaque(a) => WeakValue::of(a),
            Value::AstNode(a) => WeakValue::of(a),
            _ => return None,
        };
        Some(weak)
    }

    /// Check whether the value can change after creation.
    pub fn is_mutable(&self) -> bool {
        match self {
            Value::Object(_)
            | Value::List(_)
            | Value::Dictionary(_)
            | Value::RuneSlice(_)
            | Value::Struct(_)
            | Value::Watcher(_)
            | Value::EventSource(_)
            | Value::Subscription(_)
            | Value::Opaque(_) => true,
            Value::ByteSlice(b) => b.is_mutable(),
            Value::BytesConcat(c) => c.is_mutable(),
            Value::Option(o) => o.value.is_mutable(),
            Value::ModuleArgs(args) => args.values().any(|v| v.is_mutable()),
            _ => false,
        }
    }

    /// Check whether the value may be shared between threads and states.
    pub fn is_sharable(&self) -> bool {
        match self {
            Value::Struct(_) | Value::Opaque(_) => false,
            Value::Function(f) => !f.assigns_globals,
            Value::Option(o) => o.value.is_sharable(),
            _ => true,
        }
    }

    /// Mark the value (and what it contains) as shared: from now on its smart
    /// lock is effective.
    pub fn share(&self, state: Option<StateId>) {
        match self {
            Value::Object(o) => o.share(state),
            Value::List(l) => l.share(state),
            Value::Dictionary(d) => d.share(state),
            Value::RuneSlice(s) => s.lock().share(),
            Value::ByteSlice(s) => s.lock().share(),
            Value::Option(o) => o.value.share(state),
            _ => {}
        }
    }

    /// Check whether the value is shared.
    pub fn is_shared(&self) -> bool {
        match self {
            Value::Object(o) => o.lock().is_shared(),
            Value::List(l) => l.lock().is_shared(),
            Value::Dictionary(d) => d.lock().is_shared(),
            Value::RuneSlice(s) => s.lock().is_shared(),
            Value::ByteSlice(s) => s.lock().is_shared(),
            _ => !self.is_mutable(),
        }
    }

    /// The watchable interface of the value, if any.
    pub fn as_watchable(&self) -> Option<&dyn Watchable> {
        match self {
            Value::Object(o) => Some(o.as_ref()),
            Value::List(l) => Some(l.as_ref()),
            Value::Dictionary(d) => Some(d.as_ref()),
            _ => None,
        }
    }
}
