//! Push notifications of the available-note set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::note::Note;

/// Called with the full available-note set after every change.
pub type NotesCallback = Arc<dyn Fn(&[Note]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registry shared between the discovery engine and the withdrawal flow.
#[derive(Default)]
pub struct NoteListeners {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, NotesCallback)>>,
}

impl NoteListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, callback: NotesCallback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, callback));
        id
    }

    /// Returns whether a listener was removed.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Callbacks run on the caller's thread, outside the registry lock, so
    /// a callback may register or remove listeners.
    pub fn notify(&self, available: &[Note]) {
        let callbacks: Vec<NotesCallback> = self
            .listeners
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(available);
        }
    }
}
