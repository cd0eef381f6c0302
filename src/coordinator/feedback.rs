// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Save-state broadcast: a `watch` channel plus registered indicator hooks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use super::types::{SaveIndicator, SaveState};
use crate::listeners::{ListenerId, ListenerSet};
use crate::timer::DelayedTask;

struct Shared {
    state: watch::Sender<SaveState>,
    indicators: ListenerSet<dyn SaveIndicator>,
}

impl Shared {
    fn set(&self, next: SaveState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Save state changed");
            self.indicators.notify("save_indicator", |indicator| indicator.on_save_state(next));
        }
    }
}

pub(crate) struct Feedback {
    shared: Arc<Shared>,
    reset: DelayedTask,
}

impl Feedback {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SaveState::Idle);
        Self {
            shared: Arc::new(Shared {
                state,
                indicators: ListenerSet::new(),
            }),
            reset: DelayedTask::new("save_state_reset"),
        }
    }

    pub fn current(&self) -> SaveState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.shared.state.subscribe()
    }

    pub fn add_indicator(&self, indicator: Arc<dyn SaveIndicator>) -> ListenerId {
        self.shared.indicators.add(indicator)
    }

    pub fn remove_indicator(&self, id: ListenerId) -> bool {
        self.shared.indicators.remove(id)
    }

    /// Enter `Saving`, cancelling any pending return to idle
    pub fn saving(&self) {
        self.reset.cancel();
        self.shared.set(SaveState::Saving);
    }

    /// Enter `Saved` or `Error`, returning to `Idle` after `hold`
    pub fn settle(&self, success: bool, hold: Duration) {
        self.shared.set(if success { SaveState::Saved } else { SaveState::Error });
        let shared = Arc::clone(&self.shared);
        self.reset.schedule(hold, async move {
            shared.set(SaveState::Idle);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_returns_to_idle() {
        let feedback = Feedback::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        feedback.add_indicator(Arc::new(move |state: SaveState| s.lock().push(state)));
        let rx = feedback.subscribe();

        feedback.saving();
        feedback.settle(true, Duration::from_millis(1500));
        assert_eq!(*rx.borrow(), SaveState::Saved);

        tokio::time::sleep(Duration::from_millis(1499)).await;
        assert_eq!(feedback.current(), SaveState::Saved);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(feedback.current(), SaveState::Idle);

        assert_eq!(*seen.lock(), vec![SaveState::Saving, SaveState::Saved, SaveState::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_pass_cancels_pending_reset() {
        let feedback = Feedback::new();
        feedback.settle(false, Duration::from_millis(3000));
        assert_eq!(feedback.current(), SaveState::Error);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        feedback.saving();
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(feedback.current(), SaveState::Saving);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_indicator_isolated() {
        let feedback = Feedback::new();
        feedback.add_indicator(Arc::new(|_: SaveState| panic!("indicator failure")));
        feedback.saving();
        assert_eq!(feedback.current(), SaveState::Saving);
    }
}
