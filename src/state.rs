//! Observable state holders
//!
//! [`Observable`] is a small wrapper over [`tokio::sync::watch`] used for the
//! process-wide reactive values (session, feed read model, status line). It
//! gives each value an explicit owner with subscribe, update and teardown,
//! instead of ambient globals.

use std::sync::Mutex;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A reactive value with an owner and any number of observers.
///
/// Observers unsubscribe by dropping their receiver. [`Observable::close`]
/// tears the value down: further updates are ignored and every observer's
/// `changed()` resolves with an error.
#[derive(Debug)]
pub struct Observable<T> {
    sender: Mutex<Option<watch::Sender<T>>>,
    receiver: watch::Receiver<T>,
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Create a holder starting at `initial`.
    pub fn new(initial: T) -> Self {
        let (sender, receiver) = watch::channel(initial);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Replace the value and notify observers.
    ///
    /// Returns `false` once the holder has been closed.
    pub fn set(&self, value: T) -> bool {
        self.update(|slot| {
            *slot = value;
            true
        })
    }

    /// Mutate the value in place; observers are notified only when `f`
    /// returns `true`.
    pub fn update(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(sender) => {
                sender.send_if_modified(f);
                true
            }
            None => false,
        }
    }

    /// Subscribe to changes. The receiver sees the current value immediately.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.receiver.clone()
    }

    /// Subscribe as a stream that yields the current value, then every change.
    pub fn stream(&self) -> WatchStream<T> {
        WatchStream::new(self.receiver.clone())
    }

    /// Tear the value down.
    pub fn close(&self) {
        let mut guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }

    /// Whether [`Observable::close`] has been called.
    pub fn is_closed(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}
