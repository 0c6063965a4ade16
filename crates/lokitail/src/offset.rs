// SPDX-License-Identifier: Apache-2.0

//! Durable per-source read cursors: one plain-text file per tailed log
//! file, named from the source's base file name, holding a single
//! integer byte offset.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

#[derive(Debug, Clone)]
pub struct OffsetStore {
    state_dir: PathBuf,
}

impl OffsetStore {
    /// Creates the state directory if it does not exist yet.
    pub fn new(state_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;
        Ok(OffsetStore { state_dir })
    }

    /// State file for `source`, derived deterministically from its base
    /// file name.
    pub fn offset_path(&self, source: &Path) -> PathBuf {
        let base = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        self.state_dir.join(format!("{base}.offset"))
    }

    /// Returns the persisted offset for `source`, or 0 when no prior
    /// state exists. Unreadable or unparseable state is logged and
    /// also yields 0; reading from the top again only re-sends lines,
    /// which the at-least-once contract allows.
    pub fn load(&self, source: &Path) -> u64 {
        let path = self.offset_path(source);
        match fs::read_to_string(&path) {
            Ok(contents) => match contents.trim().parse::<u64>() {
                Ok(offset) => offset,
                Err(e) => {
                    warn!(
                        "Unparseable offset state in {}: {e}; starting from 0",
                        path.display()
                    );
                    0
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => {
                warn!(
                    "Failed to read offset state from {}: {e}; starting from 0",
                    path.display()
                );
                0
            }
        }
    }

    /// Persists the offset for `source`. Callers treat a failure as
    /// fail-soft: log it and retry on the next batch commit.
    pub fn save(&self, source: &Path, offset: u64) -> io::Result<()> {
        fs::write(self.offset_path(source), offset.to_string())
    }
}
