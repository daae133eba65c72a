//! Actor Message-Passing Runtime
//!
//! Thread-per-actor runtime in which independent actors talk only through
//! envelopes delivered to per-actor mailboxes, plus a topology manager that
//! wires actors together and drives their concurrent execution. On top of
//! it sits a bounded worker pool performing an ordered parallel `map`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │      TopologyManager         │  runs inline on the caller's thread
//! │  ┌────────────────────────┐  │
//! │  │ ActorCell<A>           │  │
//! │  │  Mailbox + Context     │  │
//! │  └──────────┬─────────────┘  │
//! └─────────────┼────────────────┘
//!       star / full-mesh edges (MailboxHandle)
//!   ┌───────────┼───────────┐
//! ┌─▼──────┐ ┌──▼─────┐ ┌───▼────┐
//! │member 0│ │member 1│ │member 2│  one OS thread each
//! └────────┘ └────────┘ └────────┘
//! ```
//!
//! # Envelope kinds
//!
//! | Kind    | Payload                       | Handled by               |
//! |---------|-------------------------------|--------------------------|
//! | DEFAULT | anything `Any + Send`         | `on_message`             |
//! | CALL    | [`CallRequest`]               | operation registry       |
//! | RETURN  | `Result<Payload>`             | `on_return`              |
//! | ACK     | none                          | `on_ack`                 |
//! | SET     | [`SetRequest`]                | attribute store          |
//!
//! # Examples
//!
//! ```rust
//! use actor_mesh::WorkerPool;
//!
//! let pool = WorkerPool::new(4)?;
//! let out = pool.map(|x: i32| x + 1, vec![1, 2, 3, 5, 6, 7, 8])?;
//! assert_eq!(out, vec![2, 3, 4, 6, 7, 8, 9]);
//! # Ok::<(), actor_mesh::ActorError>(())
//! ```

pub mod actor;
pub mod attributes;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod messages;
pub mod operations;
pub mod pool;
pub mod registry;
pub mod system;
pub mod telemetry;
pub mod transport;

pub use actor::{Actor, ActorCell, Context, Passive};
pub use attributes::{AttributeKey, Attributes, KeySpec};
pub use config::{PoolConfig, RuntimeConfig, ENV_PREFIX};
pub use dispatch::{MessageActor, MessageHandler};
pub use error::{ActorError, Result};
pub use messages::{
    downcast, Body, CallArgs, CallRequest, Envelope, EnvelopeId, EnvelopeKind, Payload,
    SetRequest,
};
pub use operations::{Arity, Operation, Operations};
pub use pool::{MapReport, WorkerPool};
pub use registry::{ActorId, AddressBook};
pub use system::{RunSummary, TopologyManager, Wiring};
pub use telemetry::init_tracing;
pub use transport::{CancellationToken, Delivery, Mailbox, MailboxHandle, ReceiveOptions};
