//! Actor Registry
//!
//! Actor identities and the per-actor address book that maps peer
//! identities to live mailbox handles.

use crate::transport::MailboxHandle;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Unique actor identifier
///
/// Equality and hashing use the UUID only; the optional label is for logs
/// and thread names.
#[derive(Debug, Clone)]
pub struct ActorId {
    id: Uuid,
    label: Option<Arc<str>>,
}

impl ActorId {
    /// Create new actor ID
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            label: None,
        }
    }

    /// Create new actor ID carrying a human-readable label
    pub fn named(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: Some(Arc::from(label.into())),
        }
    }

    /// Create from UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self { id, label: None }
    }

    /// Get UUID
    pub fn uuid(&self) -> Uuid {
        self.id
    }

    /// Get the label, if any
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl PartialEq for ActorId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActorId {}

impl Hash for ActorId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}", label),
            None => write!(f, "actor-{}", self.id.simple()),
        }
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound address book: peer identity -> live mailbox handle
///
/// Iteration follows insertion order so that callers walking their peers
/// (e.g. to hand out initial work) behave deterministically.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    order: Vec<ActorId>,
    handles: HashMap<ActorId, MailboxHandle>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or refresh) a directed edge to `handle`'s owner
    pub fn insert(&mut self, handle: MailboxHandle) {
        let id = handle.owner().clone();
        if self.handles.insert(id.clone(), handle).is_none() {
            self.order.push(id);
        }
    }

    /// Remove the edge to `id`; returns whether it existed
    pub fn remove(&mut self, id: &ActorId) -> bool {
        if self.handles.remove(id).is_some() {
            self.order.retain(|known| known != id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: &ActorId) -> Option<&MailboxHandle> {
        self.handles.get(id)
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.handles.contains_key(id)
    }

    /// Peer identities in insertion order
    pub fn ids(&self) -> impl Iterator<Item = &ActorId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
