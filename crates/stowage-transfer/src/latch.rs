use std::io;
use std::sync::{Arc, OnceLock};

/// One-shot error slot shared between concurrent tasks.
///
/// The first call to [`set`](Self::set) wins; later errors are dropped.
/// Clones share the same slot.
#[derive(Debug)]
pub struct ErrorLatch<E> {
    slot: Arc<OnceLock<E>>,
}

impl<E> ErrorLatch<E> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// Record `err` unless an error is already latched. Returns `true` if
    /// this call won.
    pub fn set(&self, err: E) -> bool {
        self.slot.set(err).is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }

    pub fn get(&self) -> Option<&E> {
        self.slot.get()
    }

    /// Take the latched error out, if this is the last handle to the slot.
    ///
    /// Returns `None` when nothing was latched or other clones are alive.
    pub fn into_error(self) -> Option<E> {
        Arc::try_unwrap(self.slot).ok().and_then(OnceLock::into_inner)
    }
}

impl ErrorLatch<io::Error> {
    /// A fresh `io::Error` mirroring the latched one, so every caller can be
    /// handed its own copy.
    pub fn io_error(&self) -> Option<io::Error> {
        self.get().map(|err| io::Error::new(err.kind(), err.to_string()))
    }
}

impl<E> Clone for ErrorLatch<E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<E> Default for ErrorLatch<E> {
    fn default() -> Self {
        Self::new()
    }
}
