// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use crate::resilience::{Classify, ErrorClass};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediumError {
    #[error("Storage medium unavailable: {0}")]
    Unavailable(String),
    #[error("Storage quota exceeded writing '{key}' ({needed} bytes, {available} available)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },
    #[error("Storage I/O error: {0}")]
    Io(String),
}

impl Classify for MediumError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable(_) | Self::QuotaExceeded { .. } => ErrorClass::TransientStorage,
            Self::Io(_) => ErrorClass::Permanent,
        }
    }
}

/// A synchronous string key/value medium.
///
/// Writes are visible to the next read on the same handle. Removing an
/// absent key is not an error.
pub trait KvMedium: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, MediumError>;
    fn set(&self, key: &str, value: &str) -> Result<(), MediumError>;
    fn remove(&self, key: &str) -> Result<(), MediumError>;

    /// Human-readable backend name for logs
    fn name(&self) -> &'static str {
        "medium"
    }
}
