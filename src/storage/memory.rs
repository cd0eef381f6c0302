// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use dashmap::DashMap;

use super::traits::{KvMedium, MediumError};

/// DashMap-backed medium with an optional byte quota over keys plus values.
pub struct InMemoryMedium {
    data: DashMap<String, String>,
    quota: Option<usize>,
}

impl InMemoryMedium {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            quota: None,
        }
    }

    /// Medium that refuses writes once stored bytes would exceed `bytes`
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            data: DashMap::new(),
            quota: Some(bytes),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes currently stored (keys plus values)
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.data
            .iter()
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl KvMedium for InMemoryMedium {
    fn get(&self, key: &str) -> Result<Option<String>, MediumError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MediumError> {
        if let Some(quota) = self.quota {
            let existing = self.data.get(key).map_or(0, |v| key.len() + v.len());
            let used = self.used_bytes() - existing;
            let needed = key.len() + value.len();
            if used + needed > quota {
                return Err(MediumError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MediumError> {
        self.data.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
