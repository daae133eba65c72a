//! Envelope Dispatcher
//!
//! [`MessageActor`] is the generic message-capable actor: it interprets each
//! envelope's kind and routes it to a [`MessageHandler`] hook.
//!
//! - DEFAULT -> `on_message`
//! - CALL    -> resolve the operation (registry first, then callable
//!   attributes), invoke it, and answer with a RETURN when the caller asked
//!   for one and is known
//! - RETURN  -> `on_return`
//! - ACK     -> `on_ack`
//! - SET     -> write into the attribute store
//!
//! `should_ignore` is consulted before any of the above. Resolution and
//! invocation failures are answered with an error RETURN instead of stopping
//! the actor.

use crate::actor::{Actor, Context};
use crate::error::{ActorError, Result};
use crate::messages::{Body, CallArgs, Envelope, EnvelopeKind, Payload};
use crate::operations::{guarded, Operation, Operations};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Overridable hooks of a message-capable actor
pub trait MessageHandler: Send + 'static {
    /// Called once before the first receive
    fn on_start(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Application-level (DEFAULT) envelope
    fn on_message(&mut self, _ctx: &mut Context, _envelope: Envelope) -> Result<()> {
        Ok(())
    }

    /// Checked before every receive; `true` ends the loop
    fn should_stop(&self, ctx: &Context) -> bool;

    /// Drop an envelope before dispatch when this returns `true`
    fn should_ignore(&self, _ctx: &Context, _envelope: &Envelope) -> bool {
        false
    }

    /// Result of a CALL this actor made
    fn on_return(&mut self, _ctx: &mut Context, _envelope: Envelope) -> Result<()> {
        Ok(())
    }

    fn on_ack(&mut self, _ctx: &mut Context, _envelope: Envelope) -> Result<()> {
        Ok(())
    }

    /// Called once after the loop exits normally
    fn on_stop(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }
}

/// Generic message actor wrapping a [`MessageHandler`]
pub struct MessageActor<H: MessageHandler> {
    handler: H,
    operations: Operations<H>,
}

impl<H: MessageHandler> MessageActor<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            operations: Operations::new(),
        }
    }

    pub fn with_operations(handler: H, operations: Operations<H>) -> Self {
        Self {
            handler,
            operations,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn operations(&self) -> &Operations<H> {
        &self.operations
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Resolve `operation` and run it
    fn invoke(&mut self, ctx: &mut Context, operation: &str, args: CallArgs) -> Result<Payload> {
        if let Some(registered) = self.operations.get(operation) {
            registered.arity.check(operation, &args)?;
            let handler = Arc::clone(&registered.handler);
            let state = &mut self.handler;
            return guarded(operation, || handler(state, ctx, args));
        }

        let callable = ctx
            .attributes()
            .get_raw(operation)
            .and_then(|value| value.downcast_ref::<Operation>())
            .cloned();
        match callable {
            Some(callable) => callable.invoke(operation, args),
            None => Err(ActorError::unknown_operation(ctx.id(), operation)),
        }
    }

    fn handle_call(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<()> {
        let call_id = envelope.id();
        let caller = envelope.sender().cloned();
        let Body::Call(request) = envelope.into_body() else {
            return Err(ActorError::protocol("CALL handler received another kind"));
        };
        let (operation, args, want_return) = request.into_parts();

        let result = self.invoke(ctx, &operation, args);
        if let Err(e) = &result {
            warn!(
                actor_id = %ctx.id(),
                operation = %operation,
                error = %e,
                "Call failed"
            );
        }

        match caller {
            Some(caller) if want_return => {
                ctx.send(Envelope::reply(call_id, ctx.id().clone(), caller, result))
            }
            _ => {
                debug!(actor_id = %ctx.id(), operation = %operation, "Call result discarded");
                Ok(())
            }
        }
    }
}

impl<H: MessageHandler> Actor for MessageActor<H> {
    fn on_start(&mut self, ctx: &mut Context) -> Result<()> {
        self.handler.on_start(ctx)
    }

    fn on_message(&mut self, ctx: &mut Context, envelope: Envelope) -> Result<()> {
        if self.handler.should_ignore(ctx, &envelope) {
            trace!(actor_id = %ctx.id(), envelope_id = %envelope.id(), "Envelope ignored");
            return Ok(());
        }

        trace!(
            actor_id = %ctx.id(),
            envelope_id = %envelope.id(),
            kind = ?envelope.kind(),
            "Dispatching envelope"
        );
        match envelope.kind() {
            EnvelopeKind::Default => self.handler.on_message(ctx, envelope),
            EnvelopeKind::Call => self.handle_call(ctx, envelope),
            EnvelopeKind::Return => self.handler.on_return(ctx, envelope),
            EnvelopeKind::Ack => self.handler.on_ack(ctx, envelope),
            EnvelopeKind::Set => match envelope.into_body() {
                Body::Set(request) => ctx.attributes_mut().apply(request),
                _ => Err(ActorError::protocol("SET handler received another kind")),
            },
        }
    }

    fn should_stop(&self, ctx: &Context) -> bool {
        self.handler.should_stop(ctx)
    }

    fn on_stop(&mut self, ctx: &mut Context) -> Result<()> {
        self.handler.on_stop(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorCell;
    use crate::attributes::AttributeKey;
    use crate::messages::{downcast, CallRequest, EnvelopeId, SetRequest};
    use crate::operations::Arity;
    use crate::registry::ActorId;
    use crate::transport::{Mailbox, ReceiveOptions};
    use std::time::Duration;

    const TOTAL: AttributeKey<i64> = AttributeKey::new("total");
    const DOUBLE: AttributeKey<Operation> = AttributeKey::new("double");

    /// Stops after a fixed number of envelopes; records hook activity
    #[derive(Default)]
    struct Probe {
        budget: u64,
        defaults: Vec<String>,
        returns: usize,
        acks: usize,
        ignore_text: bool,
    }

    impl MessageHandler for Probe {
        fn on_message(&mut self, _ctx: &mut Context, envelope: Envelope) -> Result<()> {
            if let Some(text) = envelope.payload_ref::<String>() {
                self.defaults.push(text.clone());
            }
            Ok(())
        }

        fn should_stop(&self, ctx: &Context) -> bool {
            ctx.processed() >= self.budget
        }

        fn should_ignore(&self, _ctx: &Context, envelope: &Envelope) -> bool {
            self.ignore_text && envelope.payload_ref::<String>().is_some()
        }

        fn on_return(&mut self, _ctx: &mut Context, _envelope: Envelope) -> Result<()> {
            self.returns += 1;
            Ok(())
        }

        fn on_ack(&mut self, _ctx: &mut Context, _envelope: Envelope) -> Result<()> {
            self.acks += 1;
            Ok(())
        }
    }

    fn probe_operations() -> Operations<Probe> {
        let mut ops = Operations::<Probe>::new();
        ops.register("add", Arity::Exact(2), |_probe, ctx, args| {
            let (positional, _) = args.into_parts();
            let mut sum = 0_i64;
            for value in positional {
                sum += downcast::<i64>(value)?;
            }
            ctx.attributes_mut().set(&TOTAL, sum)?;
            Ok(Box::new(sum) as Payload)
        })
        .unwrap();
        ops.register("budget", Arity::Exact(0), |probe, _ctx, _args| {
            Ok(Box::new(probe.budget) as Payload)
        })
        .unwrap();
        ops.register("explode", Arity::Any, |_probe, _ctx, _args| -> Result<Payload> {
            panic!("kaboom")
        })
        .unwrap();
        ops
    }

    fn options() -> ReceiveOptions {
        ReceiveOptions {
            timeout: Some(Duration::from_secs(5)),
            poll_interval: Duration::from_millis(5),
            ..ReceiveOptions::default()
        }
    }

    /// Cell under test plus a caller mailbox connected both ways
    fn harness(budget: u64) -> (ActorCell<MessageActor<Probe>>, Mailbox) {
        let probe = Probe {
            budget,
            ..Probe::default()
        };
        let mut cell = ActorCell::named(
            "probe",
            MessageActor::with_operations(probe, probe_operations()),
        );
        let caller = Mailbox::new(ActorId::named("caller"));
        cell.connect([caller.handle()]);
        (cell, caller)
    }

    fn call(
        cell: &ActorCell<MessageActor<Probe>>,
        caller: &Mailbox,
        request: CallRequest,
    ) -> EnvelopeId {
        let envelope =
            Envelope::call(cell.id().clone(), request).with_sender(caller.owner().clone());
        let id = envelope.id();
        cell.handle().deliver(envelope);
        id
    }

    #[test]
    fn test_call_with_registered_operation() {
        let (mut cell, caller) = harness(1);
        let call_id = call(&cell, &caller, CallRequest::new("add").arg(40_i64).arg(2_i64));

        cell.run(&options()).unwrap();

        let reply = caller.receive(&options()).unwrap();
        assert_eq!(reply.kind(), EnvelopeKind::Return);
        assert_eq!(reply.cause_id(), Some(call_id));
        assert_eq!(reply.sender(), Some(cell.id()));
        match reply.into_body() {
            Body::Return(Ok(value)) => assert_eq!(downcast::<i64>(value).unwrap(), 42),
            _ => panic!("expected successful RETURN"),
        }
        assert_eq!(cell.context().attributes().get(&TOTAL), Some(&42));
    }

    #[test]
    fn test_call_handler_sees_actor_state() {
        let (mut cell, caller) = harness(1);
        call(&cell, &caller, CallRequest::new("budget"));
        cell.run(&options()).unwrap();

        match caller.receive(&options()).unwrap().into_body() {
            Body::Return(Ok(value)) => assert_eq!(downcast::<u64>(value).unwrap(), 1),
            _ => panic!("expected successful RETURN"),
        }
    }

    #[test]
    fn test_call_resolves_callable_attribute_installed_by_set() {
        let (mut cell, caller) = harness(2);
        cell.handle().deliver(Envelope::set(
            cell.id().clone(),
            SetRequest::new(&DOUBLE, Operation::unary(|x: u32| x * 2)),
        ));
        call(&cell, &caller, CallRequest::new("double").arg(21_u32));

        cell.run(&options()).unwrap();

        match caller.receive(&options()).unwrap().into_body() {
            Body::Return(Ok(value)) => assert_eq!(downcast::<u32>(value).unwrap(), 42),
            _ => panic!("expected successful RETURN"),
        }
    }

    #[test]
    fn test_resolution_failures_are_returned() {
        let (mut cell, caller) = harness(3);
        call(&cell, &caller, CallRequest::new("missing"));
        call(&cell, &caller, CallRequest::new("add").arg(1_i64));
        call(&cell, &caller, CallRequest::new("explode").named("why", "test"));

        cell.run(&options()).unwrap();

        let mut errors = Vec::new();
        for _ in 0..3 {
            match caller.receive(&options()).unwrap().into_body() {
                Body::Return(Err(e)) => errors.push(e),
                _ => panic!("expected error RETURN"),
            }
        }
        assert!(matches!(errors[0], ActorError::UnknownOperation { .. }));
        assert!(matches!(errors[1], ActorError::Arity { .. }));
        assert!(matches!(errors[2], ActorError::Invocation { .. }));
    }

    #[test]
    fn test_call_without_return_or_sender() {
        let (mut cell, caller) = harness(2);
        cell.handle().deliver(Envelope::call(
            cell.id().clone(),
            CallRequest::new("add").arg(1_i64).arg(1_i64),
        ));
        cell.handle().deliver(
            Envelope::call(
                cell.id().clone(),
                CallRequest::new("add").arg(2_i64).arg(2_i64).without_return(),
            )
            .with_sender(caller.owner().clone()),
        );

        cell.run(&options()).unwrap();
        assert!(caller.is_empty());
        assert_eq!(cell.context().attributes().get(&TOTAL), Some(&4));
    }

    #[test]
    fn test_default_return_ack_and_ignore() {
        let (mut cell, _caller) = harness(4);
        let id = cell.id().clone();
        cell.actor_mut().handler.ignore_text = false;
        cell.handle().deliver(Envelope::message(id.clone(), "hello".to_string()));
        cell.handle()
            .deliver(Envelope::new(id.clone(), Body::Return(Ok(Box::new(())))));
        cell.handle().deliver(Envelope::ack(id.clone()));
        cell.handle().deliver(Envelope::message(id, 5_u8));

        cell.run(&options()).unwrap();
        let probe = cell.actor().handler();
        assert_eq!(probe.defaults, vec!["hello".to_string()]);
        assert_eq!(probe.returns, 1);
        assert_eq!(probe.acks, 1);
    }

    #[test]
    fn test_ignored_envelopes_have_no_effect() {
        let (mut cell, _caller) = harness(2);
        let id = cell.id().clone();
        cell.actor_mut().handler.ignore_text = true;
        cell.handle().deliver(Envelope::message(id.clone(), "dropped".to_string()));
        cell.handle().deliver(Envelope::ack(id));

        cell.run(&options()).unwrap();
        let probe = cell.actor().handler();
        assert!(probe.defaults.is_empty());
        assert_eq!(probe.acks, 1);
    }

    #[test]
    fn test_schema_violation_stops_actor() {
        use crate::attributes::Attributes;

        let mut cell = ActorCell::new(MessageActor::new(Probe {
            budget: 1,
            ..Probe::default()
        }))
        .with_attributes(Attributes::with_schema([TOTAL.spec()]));
        cell.handle().deliver(Envelope::set(
            cell.id().clone(),
            SetRequest::new(&DOUBLE, Operation::unary(|x: u32| x)),
        ));

        let err = cell.run(&options()).unwrap_err();
        assert!(matches!(err, ActorError::Configuration { .. }));
    }
}
