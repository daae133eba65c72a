//! Typed per-actor attribute store, written by SET envelopes.

use crate::error::{ActorError, Result};
use crate::messages::{Payload, SetRequest};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Typed attribute key
pub struct AttributeKey<T> {
    name: &'static str,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: 'static> AttributeKey<T> {
    /// Schema entry for this key
    pub fn spec(&self) -> KeySpec {
        KeySpec {
            name: self.name,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeKey({})", self.name)
    }
}

/// Allowed key name and value type
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    name: &'static str,
    type_id: TypeId,
    type_name: &'static str,
}

/// Key/value store owned by one actor
///
/// Without a schema any key is accepted. With a schema, SETs for unknown
/// keys or values of the wrong type are rejected.
#[derive(Default)]
pub struct Attributes {
    values: HashMap<&'static str, Payload>,
    schema: Option<HashMap<&'static str, KeySpec>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store restricted to `keys`
    pub fn with_schema(keys: impl IntoIterator<Item = KeySpec>) -> Self {
        Self {
            values: HashMap::new(),
            schema: Some(keys.into_iter().map(|spec| (spec.name, spec)).collect()),
        }
    }

    fn check(&self, name: &'static str, type_id: TypeId) -> Result<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        match schema.get(name) {
            Some(spec) if spec.type_id == type_id => Ok(()),
            Some(spec) => Err(ActorError::configuration(
                format!("attribute '{}' holds {}", name, spec.type_name),
                Some(name),
            )),
            None => Err(ActorError::configuration(
                format!("attribute '{}' is not in the schema", name),
                Some(name),
            )),
        }
    }

    pub fn set<T: Any + Send>(&mut self, key: &AttributeKey<T>, value: T) -> Result<()> {
        self.check(key.name(), TypeId::of::<T>())?;
        self.values.insert(key.name(), Box::new(value));
        Ok(())
    }

    /// Apply the body of a SET envelope
    pub fn apply(&mut self, request: SetRequest) -> Result<()> {
        self.check(request.key(), request.value_type())?;
        let (key, value) = request.into_parts();
        self.values.insert(key, value);
        Ok(())
    }

    pub fn get<T: 'static>(&self, key: &AttributeKey<T>) -> Option<&T> {
        self.values.get(key.name()).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: 'static>(&mut self, key: &AttributeKey<T>) -> Option<&mut T> {
        self.values
            .get_mut(key.name())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Untyped lookup by name, used when resolving CALL operations
    pub(crate) fn get_raw(&self, name: &str) -> Option<&(dyn Any + Send)> {
        self.values.get(name).map(|v| v.as_ref())
    }

    pub fn remove<T: 'static>(&mut self, key: &AttributeKey<T>) -> Option<T> {
        let value = self.values.remove(key.name())?;
        match value.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(value) => {
                self.values.insert(key.name(), value);
                None
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .field("schema", &self.schema.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOP: AttributeKey<bool> = AttributeKey::new("stop");
    const LABEL: AttributeKey<String> = AttributeKey::new("label");

    #[test]
    fn test_set_get_remove() {
        let mut attrs = Attributes::new();
        assert!(attrs.get(&STOP).is_none());

        attrs.set(&STOP, false).unwrap();
        assert_eq!(attrs.get(&STOP), Some(&false));

        *attrs.get_mut(&STOP).unwrap() = true;
        assert_eq!(attrs.get(&STOP), Some(&true));

        assert_eq!(attrs.remove(&STOP), Some(true));
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_apply_set_request() {
        let mut attrs = Attributes::new();
        attrs
            .apply(SetRequest::new(&LABEL, "worker".to_string()))
            .unwrap();
        assert_eq!(attrs.get(&LABEL).map(String::as_str), Some("worker"));
        assert!(attrs.contains("label"));
    }

    #[test]
    fn test_wrong_type_lookup_is_none() {
        const AS_NUMBER: AttributeKey<u64> = AttributeKey::new("label");
        let mut attrs = Attributes::new();
        attrs.set(&LABEL, "x".to_string()).unwrap();
        assert!(attrs.get(&AS_NUMBER).is_none());
        assert!(attrs.remove(&AS_NUMBER).is_none());
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_schema_validation() {
        let mut attrs = Attributes::with_schema([STOP.spec()]);
        attrs.apply(SetRequest::new(&STOP, true)).unwrap();

        let err = attrs
            .apply(SetRequest::new(&LABEL, "nope".to_string()))
            .unwrap_err();
        assert!(matches!(err, ActorError::Configuration { .. }));

        const STOP_AS_TEXT: AttributeKey<String> = AttributeKey::new("stop");
        assert!(attrs.set(&STOP_AS_TEXT, "yes".to_string()).is_err());
        assert_eq!(attrs.get(&STOP), Some(&true));
    }
}
