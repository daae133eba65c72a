//! Actor Mailbox Transport
//!
//! Every actor owns one unbounded multiple-producer / single-consumer
//! mailbox backed by a `crossbeam-channel`. Peers hold [`MailboxHandle`]s,
//! which are live sending ends rather than copies of the queue.
//!
//! Sending never blocks. Envelopes from one sender to one receiver arrive in
//! send order; nothing is promised across interleaved senders.
//!
//! Receiving blocks, but wakes every `poll_interval` to observe the shared
//! [`CancellationToken`], an optional deadline, and an idle callback the
//! topology manager uses for member liveness checks.

use crate::error::{ActorError, Result};
use crate::messages::Envelope;
use crate::registry::ActorId;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Default granularity of blocking receives
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cooperative cancellation flag shared by a manager and its members
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// How a blocking receive waits
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Give up after this long without an envelope
    pub timeout: Option<Duration>,
    /// Wake-up granularity for cancellation and idle checks
    pub poll_interval: Duration,
    pub cancel: CancellationToken,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }
}

/// Outcome of handing an envelope to a mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The receiving actor has stopped and released its mailbox
    ReceiverStopped,
}

/// Sending end of an actor's mailbox
#[derive(Debug, Clone)]
pub struct MailboxHandle {
    owner: ActorId,
    sender: Sender<Envelope>,
}

impl MailboxHandle {
    /// Identity of the actor owning the mailbox
    pub fn owner(&self) -> &ActorId {
        &self.owner
    }

    /// Enqueue without blocking
    pub fn deliver(&self, envelope: Envelope) -> Delivery {
        match self.sender.send(envelope) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::ReceiverStopped,
        }
    }
}

/// Receiving end of an actor's mailbox, owned by the actor
#[derive(Debug)]
pub struct Mailbox {
    owner: ActorId,
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
}

impl Mailbox {
    pub fn new(owner: ActorId) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            owner,
            sender,
            receiver,
        }
    }

    pub fn owner(&self) -> &ActorId {
        &self.owner
    }

    /// New sending handle for a peer's address book
    pub fn handle(&self) -> MailboxHandle {
        MailboxHandle {
            owner: self.owner.clone(),
            sender: self.sender.clone(),
        }
    }

    /// Envelopes buffered but not yet received
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Non-blocking receive
    pub fn try_receive(&self) -> Result<Option<Envelope>> {
        match self.receiver.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ActorError::MailboxClosed {
                actor: self.owner.clone(),
            }),
        }
    }

    /// Blocking receive honouring `options`
    pub fn receive(&self, options: &ReceiveOptions) -> Result<Envelope> {
        self.receive_with(options, &mut || -> Result<()> { Ok(()) })
    }

    /// Blocking receive that runs `on_idle` each time a poll interval
    /// elapses without an envelope; an error from `on_idle` aborts the wait
    pub fn receive_with(
        &self,
        options: &ReceiveOptions,
        on_idle: &mut dyn FnMut() -> Result<()>,
    ) -> Result<Envelope> {
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if options.cancel.is_cancelled() {
                return Err(ActorError::Cancelled {
                    actor: self.owner.clone(),
                });
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let timeout_ms = options
                            .timeout
                            .map(|t| t.as_millis() as u64)
                            .unwrap_or_default();
                        return Err(ActorError::timeout(
                            format!("receive on {}", self.owner),
                            timeout_ms,
                        ));
                    }
                    (deadline - now).min(options.poll_interval)
                }
                None => options.poll_interval,
            };

            match self.receiver.recv_timeout(wait) {
                Ok(envelope) => {
                    trace!(actor_id = %self.owner, envelope_id = %envelope.id(), "Envelope received");
                    return Ok(envelope);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !options.cancel.is_cancelled() {
                        on_idle()?;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ActorError::MailboxClosed {
                        actor: self.owner.clone(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Envelope;

    fn quick_options() -> ReceiveOptions {
        ReceiveOptions {
            timeout: Some(Duration::from_millis(50)),
            poll_interval: Duration::from_millis(5),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_fifo_per_sender() {
        let mailbox = Mailbox::new(ActorId::named("inbox"));
        let handle = mailbox.handle();

        for i in 0..10_u32 {
            assert_eq!(
                handle.deliver(Envelope::message(mailbox.owner().clone(), i)),
                Delivery::Delivered
            );
        }
        assert_eq!(mailbox.len(), 10);

        let options = quick_options();
        for i in 0..10_u32 {
            let envelope = mailbox.receive(&options).unwrap();
            assert_eq!(envelope.payload_ref::<u32>(), Some(&i));
        }
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_receive_timeout() {
        let mailbox = Mailbox::new(ActorId::new());
        let started = Instant::now();
        let err = mailbox.receive(&quick_options()).unwrap_err();
        assert!(matches!(err, ActorError::Timeout { timeout_ms: 50, .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_receive_observes_cancellation() {
        let mailbox = Mailbox::new(ActorId::new());
        let mut options = quick_options();
        options.timeout = None;

        let token = options.cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            token.cancel();
        });

        let err = mailbox.receive(&options).unwrap_err();
        assert!(matches!(err, ActorError::Cancelled { .. }));
        canceller.join().unwrap();
    }

    #[test]
    fn test_idle_callback_can_abort() {
        let mailbox = Mailbox::new(ActorId::new());
        let mut options = quick_options();
        options.timeout = None;

        let mut ticks = 0;
        let err = mailbox
            .receive_with(&options, &mut || {
                ticks += 1;
                if ticks == 3 {
                    Err(ActorError::protocol("liveness check failed"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(matches!(err, ActorError::ProtocolViolation { .. }));
        assert_eq!(ticks, 3);
    }

    #[test]
    fn test_deliver_to_stopped_receiver() {
        let mailbox = Mailbox::new(ActorId::new());
        let handle = mailbox.handle();
        let owner = mailbox.owner().clone();
        drop(mailbox);
        assert_eq!(
            handle.deliver(Envelope::ack(owner)),
            Delivery::ReceiverStopped
        );
    }
}
