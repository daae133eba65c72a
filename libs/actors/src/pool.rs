//! Worker Pool
//!
//! Ordered parallel `map` built from one coordinator and `min(N, P)` worker
//! actors wired in a star around it.
//!
//! The coordinator installs the mapped function into every worker with a
//! SET, then hands each worker one `(index, item)` CALL. Every RETURN is
//! matched to its index through the CALL id, written into its slot, and the
//! worker that answered is given the next item, or told to stop once the
//! source is exhausted. Faster workers therefore take more items.
//!
//! A failed invocation comes back as an error RETURN: the coordinator stops
//! handing out work, drains the calls still in flight, and `map` returns the
//! first error.

use crate::actor::{ActorCell, Context};
use crate::attributes::{AttributeKey, Attributes};
use crate::config::{PoolConfig, RuntimeConfig};
use crate::dispatch::{MessageActor, MessageHandler};
use crate::error::{ActorError, Result};
use crate::messages::{downcast, Body, CallRequest, Envelope, EnvelopeId, SetRequest};
use crate::operations::Operation;
use crate::registry::ActorId;
use crate::system::{TopologyManager, Wiring};
use std::any::Any;
use std::collections::HashMap;
use std::iter::Enumerate;
use std::vec;
use tracing::{debug, info, warn};

/// Function installed into each worker
pub const MAP_FN: AttributeKey<Operation> = AttributeKey::new("map_fn");

/// Worker stop flag, raised by the coordinator
pub const STOP: AttributeKey<bool> = AttributeKey::new("stop");

/// Results of a `map` plus how the work was spread
#[derive(Debug)]
pub struct MapReport<R> {
    /// One result per input, in input order
    pub results: Vec<R>,
    /// Items handled by each worker, in start order
    pub assignments: Vec<(ActorId, usize)>,
    pub workers_started: usize,
}

/// Worker: runs whatever `MAP_FN` currently holds until `STOP` is raised
#[derive(Debug, Default)]
struct MapWorker;

impl MessageHandler for MapWorker {
    fn should_stop(&self, ctx: &Context) -> bool {
        ctx.attributes().get(&STOP).copied().unwrap_or(false)
    }
}

struct MapCoordinator<T, R> {
    operation: Operation,
    source: Enumerate<vec::IntoIter<T>>,
    /// Outstanding CALL id -> (index, worker)
    in_flight: HashMap<EnvelopeId, (usize, ActorId)>,
    /// Worker -> its single outstanding CALL
    outstanding: HashMap<ActorId, EnvelopeId>,
    remaining: usize,
    results: Vec<Option<R>>,
    assignments: HashMap<ActorId, usize>,
    failure: Option<ActorError>,
}

impl<T, R> MapCoordinator<T, R>
where
    T: Any + Send,
    R: Any + Send,
{
    fn new(operation: Operation, items: Vec<T>) -> Self {
        let len = items.len();
        Self {
            operation,
            source: items.into_iter().enumerate(),
            in_flight: HashMap::new(),
            outstanding: HashMap::new(),
            remaining: len,
            results: std::iter::repeat_with(|| None).take(len).collect(),
            assignments: HashMap::new(),
            failure: None,
        }
    }

    /// Give `worker` its next item, or stop it
    fn assign_next(&mut self, ctx: &Context, worker: &ActorId) -> Result<()> {
        let next = if self.failure.is_some() {
            None
        } else {
            self.source.next()
        };

        let Some((index, item)) = next else {
            debug!(coordinator = %ctx.id(), worker = %worker, "Stopping worker");
            return ctx.send(
                Envelope::set(worker.clone(), SetRequest::new(&STOP, true))
                    .with_sender(ctx.id().clone()),
            );
        };

        if let Some(pending) = self.outstanding.get(worker) {
            return Err(ActorError::protocol(format!(
                "worker {} already has outstanding call {}",
                worker, pending
            )));
        }

        let call = Envelope::call(worker.clone(), CallRequest::new(MAP_FN.name()).arg(item))
            .with_sender(ctx.id().clone());
        let call_id = call.id();
        ctx.send(call)?;

        self.in_flight.insert(call_id, (index, worker.clone()));
        self.outstanding.insert(worker.clone(), call_id);
        *self.assignments.entry(worker.clone()).or_default() += 1;
        Ok(())
    }

    fn record(&mut self, index: usize, outcome: Result<R>) -> Result<()> {
        match outcome {
            Ok(value) => {
                let slot = self
                    .results
                    .get_mut(index)
                    .ok_or_else(|| ActorError::protocol(format!("index {} out of range", index)))?;
                if slot.is_some() {
                    return Err(ActorError::protocol(format!("result {} written twice", index)));
                }
                *slot = Some(value);
            }
            Err(e) => {
                if self.failure.is_none() {
                    warn!(index, error = %e, "Map item failed; draining pool");
                    self.failure = Some(e);
                }
            }
        }
        Ok(())
    }
}

impl<T, R> MessageHandler for MapCoordinator<T, R>
where
    T: Any + Send,
    R: Any + Send,
{
    fn on_start(&mut self, ctx: &mut Context) -> Result<()> {
        let workers: Vec<ActorId> = ctx.peers().cloned().collect();
        for worker in &workers {
            ctx.send(
                Envelope::set(worker.clone(), SetRequest::new(&MAP_FN, self.operation.clone()))
                    .with_sender(ctx.id().clone()),
            )?;
            self.assign_next(ctx, worker)?;
        }
        debug!(
            coordinator = %ctx.id(),
            workers = workers.len(),
            in_flight = self.in_flight.len(),
            "Initial work assigned"
        );
        Ok(())
    }

    fn should_stop(&self, _ctx: &Context) -> bool {
        self.remaining == 0 || (self.failure.is_some() && self.in_flight.is_empty())
    }

    fn on_return(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<()> {
        let cause = envelope
            .cause_id()
            .ok_or_else(|| ActorError::protocol("RETURN without cause id"))?;
        let (index, worker) = self
            .in_flight
            .remove(&cause)
            .ok_or(ActorError::UnknownCorrelation { cause })?;
        self.outstanding.remove(&worker);
        self.remaining -= 1;

        let outcome = match envelope.into_body() {
            Body::Return(result) => result.and_then(downcast::<R>),
            _ => Err(ActorError::protocol("RETURN handler received another kind")),
        };
        self.record(index, outcome)?;
        self.assign_next(ctx, &worker)
    }
}

/// Fixed-size pool performing ordered parallel `map`
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    runtime: RuntimeConfig,
}

impl WorkerPool {
    /// Pool of at most `workers` concurrent workers
    pub fn new(workers: usize) -> Result<Self> {
        Self::from_config(PoolConfig::with_workers(workers))
    }

    pub fn from_config(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            workers: config.workers,
            runtime: config.runtime,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// `[f(x) for x in items]`, computed in parallel, in input order
    pub fn map<T, R, F>(&self, f: F, items: Vec<T>) -> Result<Vec<R>>
    where
        T: Any + Send,
        R: Any + Send,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.map_report(f, items).map(|report| report.results)
    }

    /// Like [`WorkerPool::map`], also reporting per-worker assignments
    pub fn map_report<T, R, F>(&self, f: F, items: Vec<T>) -> Result<MapReport<R>>
    where
        T: Any + Send,
        R: Any + Send,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let total = items.len();
        let worker_count = total.min(self.workers);
        info!(items = total, workers = worker_count, "Starting map");

        let coordinator = MapCoordinator::<T, R>::new(Operation::unary(f), items);
        let mut manager = TopologyManager::named("pool-coordinator", MessageActor::new(coordinator))
            .with_config(self.runtime.clone());

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let mut attributes = Attributes::with_schema([MAP_FN.spec(), STOP.spec()]);
            attributes.set(&STOP, false)?;
            workers.push(
                ActorCell::named(format!("pool-worker-{i}"), MessageActor::new(MapWorker))
                    .with_attributes(attributes),
            );
        }
        manager.connect(workers, Wiring::Star)?;

        let summary = manager.run()?;
        let mut coordinator = summary.actor.into_handler();
        if let Some(failure) = coordinator.failure.take() {
            return Err(failure);
        }

        let results = coordinator
            .results
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| ActorError::protocol(format!("result {} never written", index)))
            })
            .collect::<Result<Vec<R>>>()?;

        let assignments = summary
            .members
            .iter()
            .map(|id| (id.clone(), coordinator.assignments.get(id).copied().unwrap_or(0)))
            .collect();

        info!(
            items = total,
            workers = worker_count,
            elapsed_ms = summary.elapsed.as_millis(),
            "Map complete"
        );
        Ok(MapReport {
            results,
            assignments,
            workers_started: summary.members.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Payload;
    use crate::transport::ReceiveOptions;

    fn coordinator(items: Vec<u32>) -> MapCoordinator<u32, u32> {
        MapCoordinator::new(Operation::unary(|x: u32| x * 10), items)
    }

    #[test]
    fn test_new_rejects_zero_workers() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(ActorError::Configuration { .. })
        ));
        assert_eq!(WorkerPool::new(3).unwrap().workers(), 3);
    }

    #[test]
    fn test_single_outstanding_call_per_worker() {
        let mut worker = ActorCell::named("w", MessageActor::new(MapWorker));
        let mut manager = ActorCell::named("c", MessageActor::new(coordinator(vec![1, 2, 3])));
        manager.connect([worker.handle()]);
        worker.connect([manager.handle()]);

        let mut state = coordinator(vec![1, 2, 3]);
        state.assign_next(manager.context(), worker.id()).unwrap();
        let err = state.assign_next(manager.context(), worker.id()).unwrap_err();
        assert!(matches!(err, ActorError::ProtocolViolation { .. }));
        assert_eq!(state.in_flight.len(), 1);
        assert_eq!(worker.pending(), 1);
    }

    #[test]
    fn test_unknown_correlation_is_rejected() {
        let mut manager = ActorCell::named("c", MessageActor::new(coordinator(vec![1])));
        let stray = Envelope::reply(
            Envelope::ack(ActorId::new()).id(),
            ActorId::new(),
            manager.id().clone(),
            Ok(Box::new(5_u32) as Payload),
        );
        manager.handle().deliver(stray);

        let err = manager.run(&ReceiveOptions::default()).unwrap_err();
        assert!(matches!(err, ActorError::UnknownCorrelation { .. }));
    }

    #[test]
    fn test_slots_are_written_once() {
        let mut state = coordinator(vec![1, 2]);
        state.record(1, Ok(20)).unwrap();
        assert!(state.record(1, Ok(20)).is_err());
        assert!(state.record(7, Ok(70)).is_err());
    }

    #[test]
    fn test_first_failure_is_kept() {
        let mut state = coordinator(vec![1, 2]);
        state
            .record(0, Err(ActorError::invocation("map_fn", "first")))
            .unwrap();
        state
            .record(1, Err(ActorError::invocation("map_fn", "second")))
            .unwrap();
        assert!(matches!(
            state.failure,
            Some(ActorError::Invocation { ref message, .. }) if message == "first"
        ));
    }

    #[test]
    fn test_worker_stops_on_flag() {
        let mut worker = ActorCell::new(MessageActor::new(MapWorker)).with_attributes({
            let mut attributes = Attributes::with_schema([MAP_FN.spec(), STOP.spec()]);
            attributes.set(&STOP, false).unwrap();
            attributes
        });
        worker
            .handle()
            .deliver(Envelope::set(worker.id().clone(), SetRequest::new(&STOP, true)));
        worker.run(&ReceiveOptions::default()).unwrap();
        assert_eq!(worker.context().processed(), 1);
    }

    #[test]
    fn test_map_small_pool() {
        let pool = WorkerPool::new(2).unwrap();
        let report = pool
            .map_report(|x: u32| x * 10, vec![1, 2, 3, 4, 5])
            .unwrap();
        assert_eq!(report.results, vec![10, 20, 30, 40, 50]);
        assert_eq!(report.workers_started, 2);
        assert_eq!(report.assignments.iter().map(|(_, n)| n).sum::<usize>(), 5);
    }
}
