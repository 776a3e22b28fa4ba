//! Typed listener registry.
//!
//! A small explicit pub/sub primitive: one registry per event kind,
//! listeners invoked in registration order, unsubscribe via the handle
//! returned from `on`. Used by `Chunk` and the chunked codec decoder.

use std::sync::Mutex;

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Identifies a registered listener for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

/// An ordered set of listeners for one event kind.
pub struct Listeners<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
    /// Emits currently running; their entries are checked out of `entries`.
    emitting: usize,
    /// Handles removed while checked out, applied when the emit restores.
    removed: Vec<u64>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                entries: Vec::new(),
                emitting: 0,
                removed: Vec::new(),
            }),
        }
    }

    /// Registers a listener, returning a handle for `off`.
    pub fn on(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerHandle {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, Box::new(callback)));
        ListenerHandle(id)
    }

    /// Removes a previously registered listener. Unknown handles are ignored.
    pub fn off(&self, handle: ListenerHandle) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.retain(|(id, _)| *id != handle.0);
        if inner.emitting > 0 {
            // The entry may be checked out by a running emit; record the
            // removal so the restore honors it.
            inner.removed.push(handle.0);
        }
    }

    /// Invokes every listener in registration order.
    pub fn emit(&self, event: &T) {
        // Callbacks run outside the lock so a listener may subscribe or
        // unsubscribe without deadlocking.
        let callbacks: Vec<_> = {
            let mut inner = self.inner.lock().unwrap();
            inner.emitting += 1;
            std::mem::take(&mut inner.entries)
        };
        for (_, callback) in &callbacks {
            callback(event);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.emitting -= 1;
        let mut restored = callbacks;
        restored.retain(|(id, _)| !inner.removed.contains(id));
        // Listeners added during emit stay registered after the originals.
        restored.extend(inner.entries.drain(..));
        inner.entries = restored;
        if inner.emitting == 0 {
            inner.removed.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every listener.
    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }
}
