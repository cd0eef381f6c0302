// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Asynchronous FIFO event delivery.
//!
//! Events are queued by the mutation that produced them and delivered by a
//! single drain task, after the mutating call has returned. Listeners see
//! events in production order, each with a fresh state snapshot.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Arc;

use tracing::trace;

use super::{Inner, StateEvent, StateOrchestrator};

#[derive(Default)]
pub(crate) struct EventQueue {
    queue: VecDeque<StateEvent>,
    draining: bool,
}

impl EventQueue {
    fn is_idle(&self) -> bool {
        !self.draining && self.queue.is_empty()
    }
}

impl StateOrchestrator {
    pub(super) fn enqueue_events(&self, events: Vec<StateEvent>) {
        if events.is_empty() {
            return;
        }
        let start_drain = {
            let mut q = self.inner.events.lock();
            q.queue.extend(events);
            !std::mem::replace(&mut q.draining, true)
        };
        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }
    }

    /// Wait until every queued event has been delivered
    pub async fn wait_for_events(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if self.inner.events.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.inner.events.lock().queue.len()
    }
}

async fn drain(inner: Arc<Inner>) {
    // Let the mutating caller finish before anyone hears about it
    tokio::task::yield_now().await;

    loop {
        let next = {
            let mut q = inner.events.lock();
            match q.queue.pop_front() {
                Some(event) => event,
                None => {
                    q.draining = false;
                    break;
                }
            }
        };

        let snapshot = inner.state.lock().clone();
        trace!(kind = ?next.kind, source = %next.source, "Delivering state event");
        inner.listeners.notify("state", |listener| listener(&next, &snapshot));
    }

    inner.idle.notify_waiters();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::super::tests::orchestrator;
    use super::super::{ChangeSource, CourseChange, EventKind};

    #[tokio::test(start_paused = true)]
    async fn test_events_delivered_after_call_in_order() {
        let o = orchestrator();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        o.add_listener(move |event, state| {
            s.lock().push((event.kind.clone(), state.selected_courses.len()));
        });

        o.select_course("CS1101", false, ChangeSource::User).unwrap();
        o.select_course("MA1021", false, ChangeSource::User).unwrap();
        assert!(seen.lock().is_empty());

        o.wait_for_events().await;
        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, EventKind::SaveStateChanged { has_unsaved_changes: true });
        assert!(matches!(
            &seen[1].0,
            EventKind::CoursesChanged(CourseChange::Selected { course_id, .. }) if course_id == "CS1101"
        ));
        assert!(matches!(
            &seen[2].0,
            EventKind::CoursesChanged(CourseChange::Selected { course_id, .. }) if course_id == "MA1021"
        ));
        // Snapshot is taken at delivery time
        assert_eq!(seen[1].1, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_listener_does_not_block_others() {
        let o = orchestrator();
        let count = Arc::new(Mutex::new(0));
        o.add_listener(|_, _| panic!("listener failure"));
        let c = count.clone();
        o.add_listener(move |_, _| *c.lock() += 1);

        o.clear_all_selections(ChangeSource::User);
        o.wait_for_events().await;
        assert_eq!(*count.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_can_reenter() {
        let o = orchestrator();
        let reentrant = o.clone();
        let reads = Arc::new(Mutex::new(Vec::new()));
        let r = reads.clone();
        let id = o.add_listener(move |_, _| r.lock().push(reentrant.selected_courses().len()));

        o.select_course("CS2102", true, ChangeSource::User).unwrap();
        o.wait_for_events().await;
        assert!(o.remove_listener(id));
        assert_eq!(*reads.lock(), vec![1, 1]);
    }
}
