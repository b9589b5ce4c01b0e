//! Purpose: Fixed-capacity, move-to-front cache of open appenders keyed by file name.
//! Exports: `FileAppenderCache`.
//! Role: Avoid reopening the same files under heavy append traffic; evict the LRU slot when full.
//! Invariants: Occupied slots are contiguous from index 0; index 0 is the most recently used.
//! Invariants: At most one appender per file name; never more than `size` occupied slots.
//! Invariants: File names are made absolute before lookup, so spellings of one path share a slot.
//! Invariants: A failed open leaves the slot array untouched.
//! Invariants: Methods take `&mut self`; share across threads through `SharedAppenderCache`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

use crate::core::appender::{AppenderFactory, FileAppender};
use crate::core::archive_watch::ArchiveWatcher;
use crate::core::error::{Error, ErrorKind};
use crate::core::params::CreateFileParameters;

/// Running counters since the cache was created.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub opens: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub expirations: u64,
}

pub struct FileAppenderCache<F: AppenderFactory> {
    slots: Vec<Option<F::Appender>>,
    factory: F,
    params: CreateFileParameters,
    archive_watcher: Option<ArchiveWatcher>,
    stats: CacheStats,
}

impl<F: AppenderFactory> FileAppenderCache<F> {
    /// A `size` of zero is bumped to one so allocation always has a slot.
    pub fn new(size: usize, factory: F, params: CreateFileParameters) -> Self {
        let size = size.max(1);
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Self {
            slots,
            factory,
            params,
            archive_watcher: None,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().take_while(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }

    pub fn params(&self) -> &CreateFileParameters {
        &self.params
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// File names in slot order, most recently used first.
    pub fn file_names(&self) -> Vec<PathBuf> {
        self.occupied()
            .map(|appender| appender.file_name().to_path_buf())
            .collect()
    }

    fn occupied(&self) -> impl Iterator<Item = &F::Appender> {
        self.slots.iter().map_while(Option::as_ref)
    }

    fn position(&self, file_name: &Path) -> Option<usize> {
        self.occupied()
            .position(|appender| appender.file_name() == file_name)
    }

    fn appender(&self, file_name: &Path) -> Option<&F::Appender> {
        self.occupied()
            .find(|appender| appender.file_name() == file_name)
    }

    /// Returns the appender for `file_name`, opening it (and evicting the LRU slot) when absent.
    pub fn allocate_appender(&mut self, file_name: &Path) -> Result<&mut F::Appender, Error> {
        let file_name = absolute_key(file_name)?;
        let file_name = file_name.as_path();
        if let Some(index) = self.position(file_name) {
            self.stats.hits += 1;
            if index > 0 {
                self.slots[..=index].rotate_right(1);
            }
            return self.slots[0].as_mut().ok_or_else(slot_error);
        }

        let target = self
            .slots
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.slots.len() - 1);

        let appender = self.factory.open(file_name, &self.params)?;
        self.stats.opens += 1;

        if let Some(mut evicted) = self.slots[target].take() {
            self.stats.evictions += 1;
            tracing::debug!(
                evicted = %evicted.file_name().display(),
                path = %file_name.display(),
                "evicting least recently used appender"
            );
            if let Err(err) = evicted.close() {
                tracing::warn!(
                    path = %evicted.file_name().display(),
                    error = %err,
                    "close of evicted appender failed"
                );
            }
        }

        self.slots[..=target].rotate_right(1);
        self.slots[0] = Some(appender);
        self.slots[0].as_mut().ok_or_else(slot_error)
    }

    /// Closes every cached appender. Calling it on an empty cache is a no-op.
    pub fn close_appenders(&mut self) -> Result<(), Error> {
        let mut first_err = None;
        for slot in &mut self.slots {
            let Some(mut appender) = slot.take() else {
                break;
            };
            if let Err(err) = appender.close() {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Closes the first appender opened before `expire_time` and every slot after it.
    pub fn close_expired_appenders(&mut self, expire_time: SystemTime) -> Result<usize, Error> {
        let Some(start) = self
            .occupied()
            .position(|appender| appender.open_time() < expire_time)
        else {
            return Ok(0);
        };

        let mut closed = 0;
        let mut first_err = None;
        for slot in &mut self.slots[start..] {
            let Some(mut appender) = slot.take() else {
                break;
            };
            tracing::debug!(path = %appender.file_name().display(), "closing expired appender");
            if let Err(err) = appender.close() {
                first_err.get_or_insert(err);
            }
            closed += 1;
        }
        self.stats.expirations += closed as u64;
        first_err.map_or(Ok(closed), Err)
    }

    pub fn flush_appenders(&mut self) -> Result<(), Error> {
        for slot in &mut self.slots {
            let Some(appender) = slot.as_mut() else {
                break;
            };
            appender.flush()?;
        }
        Ok(())
    }

    /// Closes the appender for `file_path` and compacts the slots behind it.
    pub fn invalidate_appender(&mut self, file_path: &Path) -> Result<bool, Error> {
        let file_path = absolute_key(file_path)?;
        let file_path = file_path.as_path();
        let Some(index) = self.position(file_path) else {
            return Ok(false);
        };
        let mut appender = self.slots[index].take().ok_or_else(slot_error)?;
        self.slots[index..].rotate_left(1);
        self.stats.invalidations += 1;
        tracing::debug!(path = %file_path.display(), "invalidated appender");
        appender.close()?;
        Ok(true)
    }

    /// Creation time from the cached appender, else from the filesystem when `fallback` is set.
    pub fn file_creation_time_utc(
        &self,
        file_path: &Path,
        fallback: bool,
    ) -> Result<Option<SystemTime>, Error> {
        if let Some(appender) = self.appender(&absolute_key(file_path)?) {
            return appender.creation_time();
        }
        if !fallback {
            return Ok(None);
        }
        match std::fs::metadata(file_path) {
            Ok(meta) => meta.created().map(Some).map_err(|err| {
                Error::from_io(err, file_path).with_message("creation time not available")
            }),
            Err(err) => missing_or_error(err, file_path),
        }
    }

    /// Last write time from the cached appender, else from the filesystem when `fallback` is set.
    pub fn file_last_write_time_utc(
        &self,
        file_path: &Path,
        fallback: bool,
    ) -> Result<Option<SystemTime>, Error> {
        if let Some(appender) = self.appender(&absolute_key(file_path)?) {
            return Ok(appender.last_write_time());
        }
        if !fallback {
            return Ok(None);
        }
        match std::fs::metadata(file_path) {
            Ok(meta) => meta
                .modified()
                .map(Some)
                .map_err(|err| Error::from_io(err, file_path)),
            Err(err) => missing_or_error(err, file_path),
        }
    }

    /// Length from the cached appender, else from the filesystem when `fallback` is set.
    pub fn file_length(&self, file_path: &Path, fallback: bool) -> Result<Option<u64>, Error> {
        if let Some(appender) = self.appender(&absolute_key(file_path)?) {
            return appender.file_length();
        }
        if !fallback {
            return Ok(None);
        }
        match std::fs::metadata(file_path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) => missing_or_error(err, file_path),
        }
    }

    /// Starts (or stops, with `None`) watching for archive files matching `pattern`.
    pub fn watch_archive_pattern(&mut self, pattern: Option<&Path>) -> Result<(), Error> {
        self.archive_watcher = match pattern {
            Some(pattern) => Some(ArchiveWatcher::new(pattern)?),
            None => None,
        };
        Ok(())
    }

    pub fn archive_watcher(&self) -> Option<&ArchiveWatcher> {
        self.archive_watcher.as_ref()
    }

    /// Closes every appender if an archive file appeared since the last check.
    pub fn close_appenders_if_archived(&mut self) -> Result<bool, Error> {
        let dirty = self
            .archive_watcher
            .as_ref()
            .is_some_and(ArchiveWatcher::take_dirty);
        if !dirty {
            return Ok(false);
        }
        tracing::info!(open = self.len(), "archive activity detected; closing cached appenders");
        self.close_appenders()?;
        Ok(true)
    }
}

impl<F: AppenderFactory> Drop for FileAppenderCache<F> {
    fn drop(&mut self) {
        if let Err(err) = self.close_appenders() {
            tracing::warn!(error = %err, "closing appenders on drop failed");
        }
    }
}

fn missing_or_error<T>(err: std::io::Error, path: &Path) -> Result<Option<T>, Error> {
    if err.kind() == std::io::ErrorKind::NotFound {
        return Ok(None);
    }
    Err(Error::from_io(err, path))
}

/// Slot key for `path`: absolute, without touching the filesystem.
fn absolute_key(path: &Path) -> Result<PathBuf, Error> {
    std::path::absolute(path).map_err(|err| {
        Error::from_io(err, path).with_message("cannot make file name absolute")
    })
}

fn slot_error() -> Error {
    Error::new(ErrorKind::Internal).with_message("appender slot unexpectedly empty")
}
