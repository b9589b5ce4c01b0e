//! Purpose: Expose best-effort archive-mutex probing for external callers.
//! Exports: `ArchiveProbe`, `probe_archive_mutex`.
//! Role: Thin wrapper over core archive mutex for CLI and rotation tooling.
//! Invariants: Probing never holds the mutex past the call.
//! Invariants: Unavailable named mutexes report `Unavailable`, never an error.

use crate::core::archive_mutex::open_for_path;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveProbe {
    Free,
    Held,
    Unavailable,
}

impl ArchiveProbe {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Held => "held",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Tries to take the archive mutex for `path` within `timeout` and releases it at once.
pub fn probe_archive_mutex(path: &Path, timeout: Duration) -> ArchiveProbe {
    match open_for_path(path) {
        Ok(mutex) => match mutex.try_lock(timeout) {
            Ok(Some(_guard)) => ArchiveProbe::Free,
            Ok(None) => ArchiveProbe::Held,
            Err(_) => ArchiveProbe::Unavailable,
        },
        Err(_) => ArchiveProbe::Unavailable,
    }
}
