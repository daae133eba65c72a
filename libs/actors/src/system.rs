//! Topology Manager
//!
//! A [`TopologyManager`] is itself an actor. It owns a set of member actors,
//! wires their address books, runs each member on its own OS thread, runs
//! its own receive/dispatch loop inline, and joins every member before
//! returning.
//!
//! # Wiring
//!
//! Every member connected through the manager gets a bidirectional edge to
//! the manager. With [`Wiring::FullMesh`] every pair inside the connected
//! batch is also linked both ways (`2 * C(k, 2)` directed edges for `k`
//! members); with [`Wiring::Star`] members only know the manager. Full mesh
//! is quadratic and meant for small batches.
//!
//! # Lifecycle
//!
//! 1. manager `on_start` (bootstrap sends happen here)
//! 2. start one thread per member, each exactly once
//! 3. manager loop until its `should_stop`; while idle it checks whether a
//!    member has died with an error
//! 4. manager `on_stop`
//! 5. join every member exactly once
//!
//! If any step fails the shared cancellation token is raised so members
//! leave their receive loops, and joins are bounded by `join_timeout_ms`.

use crate::actor::{Actor, ActorCell};
use crate::config::RuntimeConfig;
use crate::error::{panic_message, ActorError, Result};
use crate::registry::{ActorId, AddressBook};
use crate::transport::{CancellationToken, MailboxHandle, ReceiveOptions};
use std::collections::{HashMap, HashSet};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How a batch of members is wired among itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wiring {
    /// Every pair in the batch can address each other
    #[default]
    FullMesh,
    /// Members only address the manager
    Star,
}

/// Execution unit of one member
enum ExecutionHandle {
    /// Wired but not yet started
    Pending(ActorCell<Box<dyn Actor>>),
    Running(JoinHandle<Result<()>>),
    /// Joined; the outcome has been consumed
    Joined,
}

/// What a completed run hands back
#[derive(Debug)]
pub struct RunSummary<A> {
    /// The manager's own actor, with whatever state it accumulated
    pub actor: A,
    /// Members joined, in connection order
    pub members: Vec<ActorId>,
    pub elapsed: Duration,
}

impl<A> RunSummary<A> {
    pub fn into_actor(self) -> A {
        self.actor
    }
}

/// Actor that owns, wires, starts and joins a set of member actors
pub struct TopologyManager<A: Actor> {
    cell: ActorCell<A>,
    members: Vec<ActorId>,
    handles: HashMap<ActorId, ExecutionHandle>,
    config: RuntimeConfig,
    cancel: CancellationToken,
}

impl<A: Actor> TopologyManager<A> {
    pub fn new(actor: A) -> Self {
        Self::from_cell(ActorCell::new(actor))
    }

    pub fn named(label: impl Into<String>, actor: A) -> Self {
        Self::from_cell(ActorCell::named(label, actor))
    }

    pub fn from_cell(cell: ActorCell<A>) -> Self {
        Self {
            cell,
            members: Vec::new(),
            handles: HashMap::new(),
            config: RuntimeConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> &ActorId {
        self.cell.id()
    }

    /// Sending handle for the manager's own mailbox
    pub fn handle(&self) -> MailboxHandle {
        self.cell.handle()
    }

    pub fn address_book(&self) -> &AddressBook {
        self.cell.context().address_book()
    }

    /// Token that stops every actor in this topology when raised
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Managed members in connection order
    pub fn member_ids(&self) -> &[ActorId] {
        &self.members
    }

    /// Peers of a member that has not been started yet
    pub fn peers_of(&self, id: &ActorId) -> Option<Vec<ActorId>> {
        match self.handles.get(id)? {
            ExecutionHandle::Pending(cell) => Some(cell.context().peers().cloned().collect()),
            _ => None,
        }
    }

    /// Register `cells` as members and wire them according to `wiring`
    pub fn connect<B: Actor>(
        &mut self,
        cells: impl IntoIterator<Item = ActorCell<B>>,
        wiring: Wiring,
    ) -> Result<()> {
        let mut batch: Vec<ActorCell<Box<dyn Actor>>> =
            cells.into_iter().map(ActorCell::boxed).collect();

        let mut seen = HashSet::new();
        for cell in &batch {
            let duplicate = cell.id() == self.id()
                || self.handles.contains_key(cell.id())
                || !seen.insert(cell.id().clone());
            if duplicate {
                return Err(ActorError::configuration(
                    format!("actor {} is already managed", cell.id()),
                    Some("members"),
                ));
            }
        }

        let manager = self.cell.handle();
        for cell in &mut batch {
            self.cell.connect([cell.handle()]);
            cell.connect([manager.clone()]);
        }

        if wiring == Wiring::FullMesh {
            let handles: Vec<MailboxHandle> = batch.iter().map(ActorCell::handle).collect();
            for (i, cell) in batch.iter_mut().enumerate() {
                cell.connect(
                    handles
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, handle)| handle.clone()),
                );
            }
        }

        debug!(
            manager = %self.id(),
            batch = batch.len(),
            ?wiring,
            "Members connected"
        );
        for cell in batch {
            let id = cell.id().clone();
            self.members.push(id.clone());
            self.handles.insert(id, ExecutionHandle::Pending(cell));
        }
        Ok(())
    }

    /// Start every member, run the manager loop, then join every member
    pub fn run(mut self) -> Result<RunSummary<A>> {
        let started = Instant::now();
        let options = self.config.receive_options(self.cancel.clone());
        info!(
            manager = %self.id(),
            members = self.members.len(),
            "Starting topology"
        );

        let outcome = self.drive(&options);
        if let Err(e) = &outcome {
            error!(manager = %self.id(), error = %e, "Topology manager failed; cancelling members");
            self.cancel.cancel();
        }

        let joined = self.join_all();

        let elapsed = started.elapsed();
        match (outcome, joined) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                info!(
                    manager = %self.id(),
                    members = self.members.len(),
                    elapsed_ms = elapsed.as_millis(),
                    "Topology quiesced"
                );
                Ok(RunSummary {
                    actor: self.cell.into_actor(),
                    members: self.members,
                    elapsed,
                })
            }
        }
    }

    fn drive(&mut self, options: &ReceiveOptions) -> Result<()> {
        self.cell.start()?;
        self.start_members(options)?;

        let Self {
            cell,
            members,
            handles,
            ..
        } = self;
        cell.process(options, &mut || reap_finished(members, handles))?;
        cell.finish()
    }

    fn start_members(&mut self, options: &ReceiveOptions) -> Result<()> {
        for id in &self.members {
            let Some(slot) = self.handles.get_mut(id) else {
                continue;
            };
            let mut cell = match std::mem::replace(slot, ExecutionHandle::Joined) {
                ExecutionHandle::Pending(cell) => cell,
                other => {
                    *slot = other;
                    continue;
                }
            };

            let member_options = options.clone();
            let handle = std::thread::Builder::new()
                .name(id.to_string())
                .spawn(move || cell.run(&member_options))
                .map_err(|source| ActorError::Spawn {
                    actor: id.clone(),
                    source,
                })?;
            *slot = ExecutionHandle::Running(handle);
        }
        Ok(())
    }

    /// Join every started member; the first failure is reported
    fn join_all(&mut self) -> Result<()> {
        let timeout = self.config.join_timeout();
        let poll = self.config.poll_interval();
        let mut first_error: Option<ActorError> = None;

        for id in &self.members {
            let Some(slot) = self.handles.get_mut(id) else {
                continue;
            };
            match std::mem::replace(slot, ExecutionHandle::Joined) {
                ExecutionHandle::Running(handle) => {
                    if let Err(e) = join_member(id, handle, timeout, poll) {
                        if !matches!(e, ActorError::Cancelled { .. }) {
                            warn!(member = %id, error = %e, "Member finished with error");
                        }
                        first_error.get_or_insert_with(|| ActorError::MemberFailed {
                            actor: id.clone(),
                            message: e.to_string(),
                        });
                    }
                }
                ExecutionHandle::Pending(_) => {
                    debug!(member = %id, "Member was never started");
                }
                ExecutionHandle::Joined => {}
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl<A: Actor> std::fmt::Debug for TopologyManager<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyManager")
            .field("id", &self.id().to_string())
            .field("members", &self.members.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Join members that already exited; a member that exited with an error
/// fails the manager's loop
fn reap_finished(members: &[ActorId], handles: &mut HashMap<ActorId, ExecutionHandle>) -> Result<()> {
    for id in members {
        let Some(slot) = handles.get_mut(id) else {
            continue;
        };
        let finished = matches!(slot, ExecutionHandle::Running(handle) if handle.is_finished());
        if !finished {
            continue;
        }
        if let ExecutionHandle::Running(handle) = std::mem::replace(slot, ExecutionHandle::Joined) {
            match join_member(id, handle, None, Duration::ZERO) {
                Ok(()) => debug!(member = %id, "Member exited"),
                Err(e) => {
                    error!(member = %id, error = %e, "Member died while manager was running");
                    return Err(ActorError::MemberFailed {
                        actor: id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn join_member(
    id: &ActorId,
    handle: JoinHandle<Result<()>>,
    timeout: Option<Duration>,
    poll: Duration,
) -> Result<()> {
    if let Some(timeout) = timeout {
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(member = %id, "Join deadline exceeded; detaching member thread");
                return Err(ActorError::timeout(
                    format!("join {}", id),
                    timeout.as_millis() as u64,
                ));
            }
            std::thread::sleep(poll);
        }
    }

    match handle.join() {
        Ok(outcome) => outcome,
        Err(panic) => Err(ActorError::Panicked {
            actor: id.clone(),
            message: panic_message(panic.as_ref()),
        }),
    }
}
