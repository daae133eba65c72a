//! Actor Message Envelopes
//!
//! Immutable message records exchanged between actors. An envelope carries
//! its own identity, an optional causal link to the envelope it answers,
//! addressing, and a kind-specific body:
//!
//! | Kind    | Body                                   |
//! |---------|----------------------------------------|
//! | DEFAULT | arbitrary payload for `on_message`     |
//! | CALL    | [`CallRequest`] naming an operation    |
//! | RETURN  | `Result` of a prior CALL               |
//! | ACK     | nothing                                |
//! | SET     | [`SetRequest`] writing one attribute   |
//!
//! Payloads are moved between actors, never shared.

use crate::attributes::AttributeKey;
use crate::error::{ActorError, Result};
use crate::registry::ActorId;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque message data, transferred by ownership
pub type Payload = Box<dyn Any + Send>;

/// Downcast a payload to the concrete type the receiver expects
pub fn downcast<T: 'static>(payload: Payload) -> Result<T> {
    payload
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| ActorError::payload_type::<T>())
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Unique envelope identifier
///
/// A monotonic per-process sequence number paired with the process id, so
/// two envelopes created in the same run can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvelopeId {
    origin: u32,
    sequence: u64,
}

impl EnvelopeId {
    fn next() -> Self {
        Self {
            origin: std::process::id(),
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Process that minted this id
    pub fn origin(&self) -> u32 {
        self.origin
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin, self.sequence)
    }
}

/// Envelope kind, derived from the body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Default,
    Call,
    Return,
    Ack,
    Set,
}

/// Arguments of a CALL
///
/// Positional and named arguments are both optional; an empty `CallArgs`
/// is a valid call with no arguments.
#[derive(Default)]
pub struct CallArgs {
    positional: Vec<Payload>,
    named: HashMap<String, Payload>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg<T: Any + Send>(mut self, value: T) -> Self {
        self.positional.push(Box::new(value));
        self
    }

    /// Add a named argument
    pub fn named<T: Any + Send>(mut self, key: impl Into<String>, value: T) -> Self {
        self.named.insert(key.into(), Box::new(value));
        self
    }

    /// Number of positional arguments
    pub fn positional_len(&self) -> usize {
        self.positional.len()
    }

    pub fn named_keys(&self) -> impl Iterator<Item = &str> {
        self.named.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Remove and downcast a named argument; `Ok(None)` if absent
    pub fn take_named<T: 'static>(&mut self, key: &str) -> Result<Option<T>> {
        self.named.remove(key).map(downcast::<T>).transpose()
    }

    /// Split into positional and named arguments
    pub fn into_parts(self) -> (Vec<Payload>, HashMap<String, Payload>) {
        (self.positional, self.named)
    }
}

impl fmt::Debug for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallArgs")
            .field("positional", &self.positional.len())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// CALL body: invoke `operation` on the receiver
#[derive(Debug)]
pub struct CallRequest {
    operation: String,
    args: CallArgs,
    want_return: bool,
}

impl CallRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            args: CallArgs::new(),
            want_return: true,
        }
    }

    pub fn with_args(mut self, args: CallArgs) -> Self {
        self.args = args;
        self
    }

    /// Append a positional argument
    pub fn arg<T: Any + Send>(mut self, value: T) -> Self {
        self.args = self.args.arg(value);
        self
    }

    /// Add a named argument
    pub fn named<T: Any + Send>(mut self, key: impl Into<String>, value: T) -> Self {
        self.args = self.args.named(key, value);
        self
    }

    /// Suppress the RETURN envelope
    pub fn without_return(mut self) -> Self {
        self.want_return = false;
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn args(&self) -> &CallArgs {
        &self.args
    }

    pub fn want_return(&self) -> bool {
        self.want_return
    }

    pub fn into_parts(self) -> (String, CallArgs, bool) {
        (self.operation, self.args, self.want_return)
    }
}

/// SET body: write `value` under `key` in the receiver's attribute store
pub struct SetRequest {
    key: &'static str,
    value: Payload,
}

impl SetRequest {
    pub fn new<T: Any + Send>(key: &AttributeKey<T>, value: T) -> Self {
        Self {
            key: key.name(),
            value: Box::new(value),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Type of the carried value
    pub fn value_type(&self) -> TypeId {
        self.value.as_ref().type_id()
    }

    pub fn into_parts(self) -> (&'static str, Payload) {
        (self.key, self.value)
    }
}

impl fmt::Debug for SetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetRequest").field("key", &self.key).finish()
    }
}

/// Kind-specific envelope body
pub enum Body {
    Default(Payload),
    Call(CallRequest),
    Return(Result<Payload>),
    Ack,
    Set(SetRequest),
}

impl Body {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Body::Default(_) => EnvelopeKind::Default,
            Body::Call(_) => EnvelopeKind::Call,
            Body::Return(_) => EnvelopeKind::Return,
            Body::Ack => EnvelopeKind::Ack,
            Body::Set(_) => EnvelopeKind::Set,
        }
    }
}

/// Immutable message envelope
pub struct Envelope {
    id: EnvelopeId,
    cause_id: Option<EnvelopeId>,
    sender: Option<ActorId>,
    receiver: ActorId,
    body: Body,
}

impl Envelope {
    /// Create an envelope with a freshly minted id
    pub fn new(receiver: ActorId, body: Body) -> Self {
        Self {
            id: EnvelopeId::next(),
            cause_id: None,
            sender: None,
            receiver,
            body,
        }
    }

    /// DEFAULT envelope carrying `payload`
    pub fn message<T: Any + Send>(receiver: ActorId, payload: T) -> Self {
        Self::new(receiver, Body::Default(Box::new(payload)))
    }

    pub fn call(receiver: ActorId, request: CallRequest) -> Self {
        Self::new(receiver, Body::Call(request))
    }

    pub fn set(receiver: ActorId, request: SetRequest) -> Self {
        Self::new(receiver, Body::Set(request))
    }

    pub fn ack(receiver: ActorId) -> Self {
        Self::new(receiver, Body::Ack)
    }

    /// RETURN envelope answering the CALL identified by `cause`
    pub fn reply(cause: EnvelopeId, from: ActorId, to: ActorId, result: Result<Payload>) -> Self {
        Self::new(to, Body::Return(result))
            .with_sender(from)
            .with_cause(cause)
    }

    pub fn with_sender(mut self, sender: ActorId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_cause(mut self, cause: EnvelopeId) -> Self {
        self.cause_id = Some(cause);
        self
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn cause_id(&self) -> Option<EnvelopeId> {
        self.cause_id
    }

    pub fn sender(&self) -> Option<&ActorId> {
        self.sender.as_ref()
    }

    pub fn receiver(&self) -> &ActorId {
        &self.receiver
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.body.kind()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Borrow a DEFAULT payload as `T`
    pub fn payload_ref<T: 'static>(&self) -> Option<&T> {
        match &self.body {
            Body::Default(payload) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("cause_id", &self.cause_id)
            .field("sender", &self.sender.as_ref().map(ToString::to_string))
            .field("receiver", &self.receiver.to_string())
            .field("kind", &self.kind())
            .finish()
    }
}
