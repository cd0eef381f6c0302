// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Named boolean health probes, each given a quick two-attempt retry.

use std::fmt;
use std::time::Duration;

use tracing::warn;

use super::retry::{Classify, ErrorClass, RetryCondition, RetryManager, RetryPolicy};

/// A named probe returning `true` when healthy
pub struct HealthProbe {
    pub name: String,
    check: Box<dyn Fn() -> bool + Send + Sync>,
}

impl HealthProbe {
    pub fn new(name: impl Into<String>, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }
}

impl fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthProbe").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub name: String,
    pub healthy: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: Vec<ProbeResult>,
}

impl HealthReport {
    /// Names of the probes that failed
    pub fn failing(&self) -> impl Iterator<Item = &str> {
        self.checks.iter().filter(|c| !c.healthy).map(|c| c.name.as_str())
    }
}

#[derive(Debug)]
struct ProbeFailed;

impl fmt::Display for ProbeFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("probe reported unhealthy")
    }
}

impl Classify for ProbeFailed {
    fn class(&self) -> ErrorClass {
        ErrorClass::TransientStorage
    }
}

impl RetryManager {
    /// Run every probe in order with a two-attempt retry; healthy iff all pass.
    pub async fn health_check(checks: &[HealthProbe]) -> HealthReport {
        let quick = RetryManager::new(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
            exponential_backoff: false,
            jitter: false,
            timeout: None,
            retry_condition: RetryCondition::Always,
        });

        let mut results = Vec::with_capacity(checks.len());
        for probe in checks {
            let outcome = quick
                .execute_with_retry(&probe.name, || async {
                    if (probe.check)() {
                        Ok(())
                    } else {
                        Err(ProbeFailed)
                    }
                })
                .await;
            if !outcome.is_success() {
                warn!(probe = %probe.name, "Health probe failed");
            }
            results.push(ProbeResult {
                name: probe.name.clone(),
                healthy: outcome.is_success(),
                attempts: outcome.attempts,
            });
        }

        HealthReport {
            healthy: results.iter().all(|r| r.healthy),
            checks: results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_all_healthy() {
        let probes = vec![HealthProbe::new("a", || true), HealthProbe::new("b", || true)];
        let report = RetryManager::health_check(&probes).await;

        assert!(report.healthy);
        assert_eq!(report.checks.len(), 2);
        assert_eq!(report.failing().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_probe_recovers_on_second_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let probes = vec![HealthProbe::new("flaky", move || c.fetch_add(1, Ordering::SeqCst) > 0)];

        let report = RetryManager::health_check(&probes).await;
        assert!(report.healthy);
        assert_eq!(report.checks[0].attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_probe_reported() {
        let probes = vec![HealthProbe::new("ok", || true), HealthProbe::new("down", || false)];
        let report = RetryManager::health_check(&probes).await;

        assert!(!report.healthy);
        assert_eq!(report.failing().collect::<Vec<_>>(), vec!["down"]);
        assert_eq!(report.checks[1].attempts, 2);
    }
}
