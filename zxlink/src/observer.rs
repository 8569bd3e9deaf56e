//! Ordered observer lists for transport and executor notifications.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A registered handler.
type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handlers invoked in registration order.
///
/// Handlers run synchronously on the notifying task and must not block.
pub struct Observers<T: ?Sized> {
    /// Registered handlers, oldest first.
    handlers: Mutex<Vec<Handler<T>>>,
}

impl<T: ?Sized> Observers<T> {
    /// Creates an empty list.
    pub(crate) const fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Appends a handler.
    pub(crate) fn add(&self, handler: impl Fn(&T) + Send + Sync + 'static) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Invokes every handler with `value`.
    ///
    /// The list is snapshotted first, so a handler may register others.
    pub(crate) fn notify(&self, value: &T) {
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(value);
        }
    }

    /// Number of registered handlers.
    pub(crate) fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: ?Sized> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observers: Observers<u8> = Observers::new();
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            observers.add(move |v| seen.lock().unwrap_or_else(PoisonError::into_inner).push((tag, *v)));
        }
        observers.notify(&7);
        let seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(*seen, vec![("first", 7), ("second", 7), ("third", 7)]);
    }

    #[test]
    fn unsized_payloads() {
        let observers: Observers<[u8]> = Observers::new();
        let total = Arc::new(Mutex::new(0usize));
        let t = Arc::clone(&total);
        observers.add(move |chunk| *t.lock().unwrap_or_else(PoisonError::into_inner) += chunk.len());
        observers.notify(b"abc");
        observers.notify(b"de");
        assert_eq!(*total.lock().unwrap_or_else(PoisonError::into_inner), 5);
        assert_eq!(observers.len(), 1);
    }
}
