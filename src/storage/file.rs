// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-file-per-key medium rooted at a directory.
//!
//! Writes go to a temporary sibling and are renamed into place, so a reader
//! never observes a half-written value. Keys are escaped into file names:
//! ASCII alphanumerics, `-` and `_` pass through, every other byte becomes
//! `%XX`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::traits::{KvMedium, MediumError};

const VALUE_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";

pub struct FileMedium {
    root: PathBuf,
}

impl FileMedium {
    /// Open (creating if needed) a medium rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, MediumError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, &e))?;
        debug!(root = %root.display(), "Opened file medium");
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{VALUE_EXT}", escape_key(key)))
    }
}

fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn io_error(path: &Path, err: &io::Error) -> MediumError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            MediumError::Unavailable(format!("{}: {err}", path.display()))
        }
        _ => MediumError::Io(format!("{}: {err}", path.display())),
    }
}

impl KvMedium for FileMedium {
    fn get(&self, key: &str) -> Result<Option<String>, MediumError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MediumError> {
        let path = self.path_for(key);
        let temp = path.with_extension(TEMP_EXT);

        let mut file = fs::File::create(&temp).map_err(|e| io_error(&temp, &e))?;
        file.write_all(value.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| io_error(&temp, &e))?;
        drop(file);

        fs::rename(&temp, &path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            io_error(&path, &e)
        })
    }

    fn remove(&self, key: &str) -> Result<(), MediumError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("wpi-planner-schedules"), "wpi-planner-schedules");
        assert_eq!(escape_key("a/b.c"), "a%2Fb%2Ec");
        assert_eq!(escape_key("é"), "%C3%A9");
    }

    #[test]
    fn test_round_trip_and_remove() {
        let dir = TempDir::new().unwrap();
        let medium = FileMedium::open(dir.path()).unwrap();

        assert_eq!(medium.get("k").unwrap(), None);
        medium.set("k", r#"{"a":1}"#).unwrap();
        assert_eq!(medium.get("k").unwrap().as_deref(), Some(r#"{"a":1}"#));

        medium.remove("k").unwrap();
        assert_eq!(medium.get("k").unwrap(), None);
        medium.remove("k").unwrap();
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let medium = FileMedium::open(dir.path()).unwrap();
            medium.set("wpi-planner-theme", "\"dark\"").unwrap();
        }
        let reopened = FileMedium::open(dir.path()).unwrap();
        assert_eq!(reopened.get("wpi-planner-theme").unwrap().as_deref(), Some("\"dark\""));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let medium = FileMedium::open(dir.path()).unwrap();
        medium.set("a", "1").unwrap();
        medium.set("a", "2").unwrap();

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|x| x == TEMP_EXT))
            .count();
        assert_eq!(leftovers, 0);
    }
}
