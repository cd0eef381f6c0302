// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key/value media underneath the durable store.
//!
//! - [`InMemoryMedium`]: DashMap-backed, optional byte quota
//! - [`FileMedium`]: one file per key, atomic rename on write

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileMedium;
pub use memory::InMemoryMedium;
pub use traits::{KvMedium, MediumError};
