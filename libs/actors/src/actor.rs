//! Actor Capability and Run Loop
//!
//! An [`Actor`] is anything that can handle an envelope and decide when it
//! is done. [`ActorCell`] pairs an actor with its identity, mailbox and
//! [`Context`] and drives it through `Idle -> Running -> Stopped`:
//!
//! - `on_start` runs once inside the actor's own execution unit,
//! - `should_stop` is checked at the top of every iteration, never while an
//!   envelope is being handled,
//! - `on_stop` runs once after the loop exits normally.
//!
//! An error returned from any hook stops the actor and is reported to
//! whoever joins it. Envelopes still buffered when an actor stops are never
//! processed.

use crate::attributes::Attributes;
use crate::error::{ActorError, Result};
use crate::messages::Envelope;
use crate::registry::{ActorId, AddressBook};
use crate::transport::{Delivery, Mailbox, MailboxHandle, ReceiveOptions};
use std::any::Any;
use std::time::Instant;
use tracing::{debug, trace};

/// Behaviour of a single actor
pub trait Actor: Send + 'static {
    /// Called once before the first receive
    fn on_start(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Handle one envelope
    fn on_message(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<()>;

    /// Checked before every receive; `true` ends the loop
    fn should_stop(&self, ctx: &Context) -> bool;

    /// Called once after the loop exits normally
    fn on_stop(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }
}

impl<A: Actor + ?Sized> Actor for Box<A> {
    fn on_start(&mut self, ctx: &mut Context) -> Result<()> {
        (**self).on_start(ctx)
    }

    fn on_message(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<()> {
        (**self).on_message(ctx, envelope)
    }

    fn should_stop(&self, ctx: &Context) -> bool {
        (**self).should_stop(ctx)
    }

    fn on_stop(&mut self, ctx: &mut Context) -> Result<()> {
        (**self).on_stop(ctx)
    }
}

/// Actor that never enters its loop
///
/// Used for topology managers that only wire, start and join their members.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passive;

impl Actor for Passive {
    fn on_message(&mut self, _ctx: &mut Context, _envelope: Envelope) -> Result<()> {
        Ok(())
    }

    fn should_stop(&self, _ctx: &Context) -> bool {
        true
    }
}

/// Everything an actor may touch while handling an envelope
#[derive(Debug)]
pub struct Context {
    id: ActorId,
    address_book: AddressBook,
    attributes: Attributes,
    processed: u64,
}

impl Context {
    fn new(id: ActorId) -> Self {
        Self {
            id,
            address_book: AddressBook::new(),
            attributes: Attributes::new(),
            processed: 0,
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    /// Peers this actor can address, in connection order
    pub fn peers(&self) -> impl Iterator<Item = &ActorId> {
        self.address_book.ids()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Envelopes handled so far
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Deliver `envelope` to its receiver's mailbox
    ///
    /// Delivery to an actor that has already stopped is not an error; the
    /// envelope is dropped unprocessed.
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        let handle = self
            .address_book
            .get(envelope.receiver())
            .ok_or_else(|| ActorError::UnknownReceiver {
                actor: self.id.clone(),
                receiver: envelope.receiver().clone(),
            })?;

        let envelope_id = envelope.id();
        let kind = envelope.kind();
        match handle.deliver(envelope) {
            Delivery::Delivered => {
                trace!(actor_id = %self.id, to = %handle.owner(), %envelope_id, ?kind, "Envelope sent");
            }
            Delivery::ReceiverStopped => {
                debug!(actor_id = %self.id, to = %handle.owner(), %envelope_id, ?kind, "Receiver stopped; envelope dropped");
            }
        }
        Ok(())
    }

    /// Send a DEFAULT envelope from this actor
    pub fn tell<T: Any + Send>(&self, receiver: &ActorId, payload: T) -> Result<()> {
        self.send(Envelope::message(receiver.clone(), payload).with_sender(self.id.clone()))
    }
}

/// An actor bundled with its identity, mailbox and context
pub struct ActorCell<A: Actor> {
    mailbox: Mailbox,
    ctx: Context,
    actor: A,
}

impl<A: Actor> ActorCell<A> {
    pub fn new(actor: A) -> Self {
        Self::with_id(ActorId::new(), actor)
    }

    /// Cell whose identity carries `label` for logs and thread names
    pub fn named(label: impl Into<String>, actor: A) -> Self {
        Self::with_id(ActorId::named(label), actor)
    }

    pub fn with_id(id: ActorId, actor: A) -> Self {
        Self {
            mailbox: Mailbox::new(id.clone()),
            ctx: Context::new(id),
            actor,
        }
    }

    /// Replace the attribute store (e.g. with a schema-restricted one)
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.ctx.attributes = attributes;
        self
    }

    pub fn id(&self) -> &ActorId {
        &self.ctx.id
    }

    /// Sending handle for other actors' address books
    pub fn handle(&self) -> MailboxHandle {
        self.mailbox.handle()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn actor(&self) -> &A {
        &self.actor
    }

    pub fn actor_mut(&mut self) -> &mut A {
        &mut self.actor
    }

    /// Envelopes waiting in the mailbox
    pub fn pending(&self) -> usize {
        self.mailbox.len()
    }

    /// Add a directed edge from this actor to each peer
    pub fn connect(&mut self, peers: impl IntoIterator<Item = MailboxHandle>) {
        for peer in peers {
            self.ctx.address_book.insert(peer);
        }
    }

    /// Remove the edges to each peer; unknown peers are ignored
    pub fn disconnect<'a>(&mut self, peers: impl IntoIterator<Item = &'a ActorId>) {
        for peer in peers {
            self.ctx.address_book.remove(peer);
        }
    }

    /// Erase the actor type so cells of different actors can be managed together
    pub fn boxed(self) -> ActorCell<Box<dyn Actor>> {
        ActorCell {
            mailbox: self.mailbox,
            ctx: self.ctx,
            actor: Box::new(self.actor),
        }
    }

    pub fn into_actor(self) -> A {
        self.actor
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        debug!(actor_id = %self.ctx.id, peers = self.ctx.address_book.len(), "Actor starting");
        self.actor.on_start(&mut self.ctx)
    }

    /// Receive/dispatch until `should_stop`; `on_idle` runs on every empty poll
    pub(crate) fn process(
        &mut self,
        options: &ReceiveOptions,
        on_idle: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        while !self.actor.should_stop(&self.ctx) {
            let envelope = self.mailbox.receive_with(options, on_idle)?;
            self.ctx.processed += 1;
            self.actor.on_message(&mut self.ctx, envelope)?;
        }
        Ok(())
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        self.actor.on_stop(&mut self.ctx)?;
        let leftover = self.mailbox.len();
        debug!(
            actor_id = %self.ctx.id,
            processed = self.ctx.processed,
            leftover,
            "Actor stopped"
        );
        Ok(())
    }

    /// Full lifecycle on the calling thread
    pub fn run(&mut self, options: &ReceiveOptions) -> Result<()> {
        let started = Instant::now();
        let outcome = self
            .start()
            .and_then(|_| self.process(options, &mut || -> Result<()> { Ok(()) }))
            .and_then(|_| self.finish());
        if let Err(e) = &outcome {
            debug!(
                actor_id = %self.ctx.id,
                error = %e,
                runtime_ms = started.elapsed().as_millis(),
                "Actor exited with error"
            );
        }
        outcome
    }
}

impl<A: Actor> std::fmt::Debug for ActorCell<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorCell")
            .field("id", &self.ctx.id.to_string())
            .field("peers", &self.ctx.address_book.len())
            .field("pending", &self.mailbox.len())
            .finish()
    }
}
