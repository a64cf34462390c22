//! Registration tables for application event callbacks.
//!
//! Each entity keeps one [`EventTable`] per argument type. Registering a
//! handler for a kind replaces any earlier handler for that kind, and firing
//! a kind nobody registered for does nothing.

use std::{collections::HashMap, fmt, hash::Hash};

/// Boxed callback invoked with a shared reference to the event subject.
pub type EventHandler<T> = Box<dyn FnMut(&T) + Send + 'static>;

/// Maps an event kind to at most one callback.
pub struct EventTable<K, T: ?Sized> {
    handlers: HashMap<K, EventHandler<T>>,
}

impl<K, T: ?Sized> Default for EventTable<K, T> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy, T: ?Sized> EventTable<K, T> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `handler` for `kind`, replacing any previous handler.
    pub fn register<F>(&mut self, kind: K, handler: F)
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
    }

    /// Remove the handler for `kind`, returning whether one was registered.
    pub fn unregister(&mut self, kind: K) -> bool { self.handlers.remove(&kind).is_some() }

    /// Whether a handler is registered for `kind`.
    #[must_use]
    pub fn is_registered(&self, kind: K) -> bool { self.handlers.contains_key(&kind) }

    /// Invoke the handler for `kind`. Returns `false` when none is registered.
    pub fn fire(&mut self, kind: K, subject: &T) -> bool {
        match self.handlers.get_mut(&kind) {
            Some(handler) => {
                handler(subject);
                true
            }
            None => false,
        }
    }
}

impl<K: fmt::Debug, T: ?Sized> fmt::Debug for EventTable<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
