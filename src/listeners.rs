// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Listener registry with panic isolation.
//!
//! Callers never hold a lock while listeners run, so a listener may freely
//! call back into the component that notified it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct ListenerSet<L: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Arc<L>)>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Call every listener in registration order. Returns how many panicked.
    pub fn notify(&self, channel: &'static str, call: impl Fn(&L)) -> usize {
        let snapshot: Vec<(ListenerId, Arc<L>)> = self.entries.lock().clone();
        let mut panicked = 0;
        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| call(&listener))).is_err() {
                panicked += 1;
                error!(channel, listener = id.0, "Listener panicked; continuing with the rest");
            }
        }
        panicked
    }
}
