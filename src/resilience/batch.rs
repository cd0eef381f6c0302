// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded-concurrency batch retry.
//!
//! Items are processed in chunks of `max_concurrency`; each item runs its own
//! retry loop. A chunk always runs to completion. With
//! `stop_on_first_failure`, no further chunk starts once a chunk contains a
//! failure.

use std::fmt;
use std::future::Future;

use futures::future::join_all;
use tracing::{debug, warn};

use super::retry::{Classify, RetryError, RetryManager};

#[derive(Debug, Clone)]
pub struct BatchRetryOptions {
    pub max_concurrency: usize,
    pub stop_on_first_failure: bool,
}

impl Default for BatchRetryOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            stop_on_first_failure: false,
        }
    }
}

/// Per-item results in input order. Items never started are absent.
#[derive(Debug)]
pub struct BatchRetryOutcome<R, E> {
    pub results: Vec<Result<R, RetryError<E>>>,
    pub total_attempts: u32,
    pub success_count: usize,
    pub stopped_early: bool,
}

impl<R, E> BatchRetryOutcome<R, E> {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        !self.stopped_early && self.success_count == self.results.len()
    }
}

impl RetryManager {
    /// Retry `operation` over every item with bounded concurrency.
    ///
    /// `operation` receives the item and its index in `items`.
    pub async fn retry_batch<I, F, Fut, R, E>(
        &self,
        name: &str,
        items: &[I],
        operation: F,
        options: BatchRetryOptions,
    ) -> BatchRetryOutcome<R, E>
    where
        F: Fn(&I, usize) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Classify + fmt::Display,
    {
        let chunk_size = options.max_concurrency.max(1);
        let mut outcome = BatchRetryOutcome {
            results: Vec::with_capacity(items.len()),
            total_attempts: 0,
            success_count: 0,
            stopped_early: false,
        };

        for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
            let offset = chunk_index * chunk_size;
            let operation = &operation;
            let pending = chunk.iter().enumerate().map(|(i, item)| {
                let index = offset + i;
                let label = format!("{name} [{index}]");
                async move {
                    self.execute_with_retry(&label, || operation(item, index))
                        .await
                }
            });

            let mut chunk_failed = false;
            for item_outcome in join_all(pending).await {
                outcome.total_attempts += item_outcome.attempts;
                if item_outcome.is_success() {
                    outcome.success_count += 1;
                } else {
                    chunk_failed = true;
                }
                outcome.results.push(item_outcome.result);
            }

            debug!(batch = name, chunk = chunk_index, size = chunk.len(), "Batch chunk finished");

            if chunk_failed && options.stop_on_first_failure {
                let remaining = items.len() - outcome.results.len();
                if remaining > 0 {
                    outcome.stopped_early = true;
                    warn!(batch = name, remaining, "Stopping batch after failure");
                }
                break;
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::retry::tests::TestError;
    use crate::resilience::{ErrorClass, RetryPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_batch_continues_past_failures() {
        let manager = RetryManager::new(RetryPolicy::test().with_max_attempts(2));
        let items: Vec<u32> = (0..7).collect();

        let outcome = manager
            .retry_batch(
                "batch",
                &items,
                |item, _| {
                    let item = *item;
                    async move {
                        if item % 3 == 0 {
                            Err(TestError("bad", ErrorClass::TransientStorage))
                        } else {
                            Ok(item * 10)
                        }
                    }
                },
                BatchRetryOptions::default(),
            )
            .await;

        assert_eq!(outcome.results.len(), 7);
        assert_eq!(outcome.success_count, 4);
        // 4 successes at 1 attempt, 3 failures at 2 attempts
        assert_eq!(outcome.total_attempts, 10);
        assert_eq!(*outcome.results[1].as_ref().unwrap(), 10);
        assert!(outcome.results[3].is_err());
        assert!(!outcome.stopped_early);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_first_failure_skips_later_chunks() {
        let manager = RetryManager::new(RetryPolicy::test().with_max_attempts(1));
        let items: Vec<u32> = (0..6).collect();
        let started = Arc::new(AtomicUsize::new(0));

        let s = started.clone();
        let outcome = manager
            .retry_batch(
                "batch",
                &items,
                move |item, _| {
                    let item = *item;
                    let s = s.clone();
                    async move {
                        s.fetch_add(1, Ordering::SeqCst);
                        if item == 1 {
                            Err(TestError("bad", ErrorClass::Permanent))
                        } else {
                            Ok(item)
                        }
                    }
                },
                BatchRetryOptions {
                    max_concurrency: 2,
                    stop_on_first_failure: true,
                },
            )
            .await;

        assert!(outcome.stopped_early);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert!(!outcome.all_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_members_run_concurrently() {
        let manager = RetryManager::new(RetryPolicy::test());
        let items = vec![(); 4];

        let start = tokio::time::Instant::now();
        let outcome: BatchRetryOutcome<(), TestError> = manager
            .retry_batch(
                "batch",
                &items,
                |_, _| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                },
                BatchRetryOptions {
                    max_concurrency: 2,
                    stop_on_first_failure: false,
                },
            )
            .await;

        assert!(outcome.all_succeeded());
        // two chunks of two, each chunk ~100ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let manager = RetryManager::default();
        let items: Vec<u8> = Vec::new();
        let outcome: BatchRetryOutcome<u8, TestError> = manager
            .retry_batch("empty", &items, |i, _| {
                let i = *i;
                async move { Ok(i) }
            }, BatchRetryOptions::default())
            .await;

        assert!(outcome.results.is_empty());
        assert!(outcome.all_succeeded());
    }
}
