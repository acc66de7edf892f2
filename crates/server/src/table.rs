//! Keyed handler tables with persistent and single-fire slots.

use std::collections::HashMap;
use std::sync::Arc;

use crate::invoker::EventHandler;

/// Identifies one registration slot: (channel name, event name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct HandlerKey {
    pub channel: String,
    pub event: String,
}

impl HandlerKey {
    pub fn new(channel: impl Into<String>, event: impl Into<String>) -> Self {
        HandlerKey {
            channel: channel.into(),
            event: event.into(),
        }
    }
}

/// One owner's registrations. Guarded by the owner's mutex; the lock is
/// never held across a handler invocation.
#[derive(Default)]
pub(crate) struct HandlerTable {
    on: HashMap<HandlerKey, Arc<dyn EventHandler>>,
    once: HashMap<HandlerKey, Arc<dyn EventHandler>>,
}

impl HandlerTable {
    /// Registers a handler, overwriting any previous entry for the key.
    pub fn insert(&mut self, key: HandlerKey, handler: Arc<dyn EventHandler>, once: bool) {
        if once {
            self.once.insert(key, handler);
        } else {
            self.on.insert(key, handler);
        }
    }

    /// Removes any registration for the key, in both slots.
    pub fn remove(&mut self, key: &HandlerKey) {
        self.on.remove(key);
        self.once.remove(key);
    }

    /// Resolves a handler for dispatch. A single-fire match is removed
    /// atomically; a persistent match is returned untouched.
    pub fn take(&mut self, key: &HandlerKey) -> Option<Arc<dyn EventHandler>> {
        if let Some(handler) = self.once.remove(key) {
            return Some(handler);
        }
        self.on.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use crate::client::Client;
    use serde_json::Value;
    use serde_json::value::RawValue;

    struct Nop;

    impl EventHandler for Nop {
        fn call(
            &self,
            _caller: Arc<Client>,
            _args: &[Box<RawValue>],
        ) -> BoxFuture<'static, Result<Value, crate::InvokeError>> {
            Box::pin(async { Ok(Value::Null) })
        }
    }

    #[test]
    fn once_entries_are_taken() {
        let mut table = HandlerTable::default();
        let key = HandlerKey::new("", "tick");
        table.insert(key.clone(), Arc::new(Nop), true);

        assert!(table.take(&key).is_some());
        assert!(table.take(&key).is_none());
    }

    #[test]
    fn once_shadows_persistent_until_taken() {
        let mut table = HandlerTable::default();
        let key = HandlerKey::new("", "tick");
        let persistent: Arc<dyn EventHandler> = Arc::new(Nop);
        table.insert(key.clone(), Arc::clone(&persistent), false);
        table.insert(key.clone(), Arc::new(Nop), true);

        let first = table.take(&key).unwrap();
        assert!(!Arc::ptr_eq(&first, &persistent));

        let second = table.take(&key).unwrap();
        assert!(Arc::ptr_eq(&second, &persistent));
        // Persistent entries survive any number of dispatches.
        assert!(table.take(&key).is_some());
    }

    #[test]
    fn reregistration_overwrites() {
        let mut table = HandlerTable::default();
        let key = HandlerKey::new("chat", "say");
        let first: Arc<dyn EventHandler> = Arc::new(Nop);
        let second: Arc<dyn EventHandler> = Arc::new(Nop);
        table.insert(key.clone(), Arc::clone(&first), false);
        table.insert(key.clone(), Arc::clone(&second), false);

        assert!(Arc::ptr_eq(&table.take(&key).unwrap(), &second));
    }

    #[test]
    fn remove_clears_both_slots() {
        let mut table = HandlerTable::default();
        let key = HandlerKey::new("", "tick");
        table.insert(key.clone(), Arc::new(Nop), false);
        table.insert(key.clone(), Arc::new(Nop), true);
        table.remove(&key);
        assert!(table.take(&key).is_none());
    }
}
