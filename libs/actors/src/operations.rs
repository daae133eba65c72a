//! Named operations resolvable by CALL envelopes.
//!
//! Two sources are consulted, in order: the actor's [`Operations`] registry
//! (handlers with access to the actor's own state, validated when they are
//! registered) and callable [`Operation`] values stored in the attribute
//! store, which is how a worker receives its mapped function over SET.

use crate::actor::Context;
use crate::error::{panic_message, ActorError, Result};
use crate::messages::{downcast, CallArgs, Payload};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Accepted number of positional arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    /// Reject `args` whose positional count this arity does not accept
    pub fn check(&self, operation: &str, args: &CallArgs) -> Result<()> {
        let positional = args.positional_len();
        let accepted = match *self {
            Arity::Exact(n) => positional == n,
            Arity::AtLeast(n) => positional >= n,
            Arity::Any => true,
        };
        if accepted {
            Ok(())
        } else {
            Err(ActorError::Arity {
                operation: operation.to_string(),
                expected: self.to_string(),
                positional,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Any => write!(f, "any number"),
        }
    }
}

/// Run `f`, converting a panic into an invocation error
pub(crate) fn guarded<F>(operation: &str, f: F) -> Result<Payload>
where
    F: FnOnce() -> Result<Payload>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(ActorError::invocation(operation, panic_message(panic.as_ref()))),
    }
}

type Callable = dyn Fn(CallArgs) -> Result<Payload> + Send + Sync;

/// Stateless callable that can travel inside a SET envelope
#[derive(Clone)]
pub struct Operation {
    arity: Arity,
    callable: Arc<Callable>,
}

impl Operation {
    pub fn new<F>(arity: Arity, f: F) -> Self
    where
        F: Fn(CallArgs) -> Result<Payload> + Send + Sync + 'static,
    {
        Self {
            arity,
            callable: Arc::new(f),
        }
    }

    /// Wrap a one-argument function
    pub fn unary<T, R, F>(f: F) -> Self
    where
        T: Any + Send,
        R: Any + Send,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Self::new(Arity::Exact(1), move |args: CallArgs| {
            let (mut positional, _) = args.into_parts();
            let value = positional
                .pop()
                .ok_or_else(|| ActorError::protocol("unary operation invoked without argument"))?;
            let input = downcast::<T>(value)?;
            Ok(Box::new(f(input)) as Payload)
        })
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    /// Validate arity and invoke; panics become invocation errors
    pub fn invoke(&self, name: &str, args: CallArgs) -> Result<Payload> {
        self.arity.check(name, &args)?;
        guarded(name, || (self.callable)(args))
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("arity", &self.arity).finish()
    }
}

type Handler<H> = dyn Fn(&mut H, &mut Context, CallArgs) -> Result<Payload> + Send + Sync;

pub(crate) struct Registered<H> {
    pub(crate) arity: Arity,
    pub(crate) handler: Arc<Handler<H>>,
}

/// Per-actor registry of operations with access to the actor's state
pub struct Operations<H> {
    entries: HashMap<String, Registered<H>>,
}

impl<H> Default for Operations<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<H> Operations<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`; names must be unique
    pub fn register<F>(&mut self, name: impl Into<String>, arity: Arity, handler: F) -> Result<()>
    where
        F: Fn(&mut H, &mut Context, CallArgs) -> Result<Payload> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(ActorError::configuration("operation name is empty", None));
        }
        if self.entries.contains_key(&name) {
            return Err(ActorError::DuplicateOperation { operation: name });
        }
        self.entries.insert(
            name,
            Registered {
                arity,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Registered<H>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_check() {
        let two = CallArgs::new().arg(1_i32).arg(2_i32);
        assert!(Arity::Exact(2).check("add", &two).is_ok());
        assert!(Arity::AtLeast(1).check("add", &two).is_ok());
        assert!(Arity::Any.check("add", &two).is_ok());

        let err = Arity::Exact(1).check("add", &two).unwrap_err();
        match err {
            ActorError::Arity {
                operation,
                positional,
                ..
            } => {
                assert_eq!(operation, "add");
                assert_eq!(positional, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unary_operation() {
        let op = Operation::unary(|x: i64| x * 10);
        let out = op.invoke("times_ten", CallArgs::new().arg(4_i64)).unwrap();
        assert_eq!(downcast::<i64>(out).unwrap(), 40);

        let err = op.invoke("times_ten", CallArgs::new()).unwrap_err();
        assert!(matches!(err, ActorError::Arity { .. }));

        let err = op
            .invoke("times_ten", CallArgs::new().arg("text"))
            .unwrap_err();
        assert!(matches!(err, ActorError::PayloadType { .. }));
    }

    #[test]
    fn test_named_only_operation() {
        let op = Operation::new(Arity::Exact(0), |mut args: CallArgs| {
            let base = args.take_named::<u32>("base")?.unwrap_or(1);
            Ok(Box::new(base + 1) as Payload)
        });
        let out = op
            .invoke("bump", CallArgs::new().named("base", 41_u32))
            .unwrap();
        assert_eq!(downcast::<u32>(out).unwrap(), 42);

        let out = op.invoke("bump", CallArgs::new()).unwrap();
        assert_eq!(downcast::<u32>(out).unwrap(), 2);
    }

    #[test]
    fn test_panic_becomes_invocation_error() {
        let op = Operation::unary(|x: u32| -> u32 {
            if x == 0 {
                panic!("zero is not allowed");
            }
            x
        });
        let err = op.invoke("checked", CallArgs::new().arg(0_u32)).unwrap_err();
        match err {
            ActorError::Invocation { operation, message } => {
                assert_eq!(operation, "checked");
                assert!(message.contains("zero is not allowed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        struct Counter;
        let mut ops: Operations<Counter> = Operations::new();
        ops.register("get", Arity::Exact(0), |_, _, _| Ok(Box::new(0_u32) as Payload))
            .unwrap();
        let err = ops
            .register("get", Arity::Exact(0), |_, _, _| Ok(Box::new(1_u32) as Payload))
            .unwrap_err();
        assert!(matches!(err, ActorError::DuplicateOperation { .. }));
        assert!(ops
            .register("", Arity::Any, |_, _, _| Ok(Box::new(()) as Payload))
            .is_err());
        assert_eq!(ops.len(), 1);
        assert!(ops.contains("get"));
    }
}
