// Mutex-guarded cache for writers on several threads.
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use crate::core::appender::{AppenderFactory, FileAppender};
use crate::core::cache::FileAppenderCache;
use crate::core::error::{Error, ErrorKind};

/// Every slot mutation and the write it serves happen under one lock, so an
/// appender can never be evicted by another thread mid-write.
pub struct SharedAppenderCache<F: AppenderFactory> {
    inner: Mutex<FileAppenderCache<F>>,
}

impl<F: AppenderFactory> SharedAppenderCache<F> {
    pub fn new(cache: FileAppenderCache<F>) -> Self {
        Self {
            inner: Mutex::new(cache),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, FileAppenderCache<F>>, Error> {
        self.inner.lock().map_err(|_| {
            Error::new(ErrorKind::Internal).with_message("appender cache lock poisoned")
        })
    }

    /// Runs `f` against the appender for `file_name` while holding the cache lock.
    pub fn with_appender<T>(
        &self,
        file_name: &Path,
        f: impl FnOnce(&mut F::Appender) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut cache = self.lock()?;
        let appender = cache.allocate_appender(file_name)?;
        f(appender)
    }

    pub fn write(&self, file_name: &Path, bytes: &[u8]) -> Result<(), Error> {
        self.with_appender(file_name, |appender| appender.write(bytes))
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.lock()?.flush_appenders()
    }

    pub fn invalidate(&self, file_path: &Path) -> Result<bool, Error> {
        self.lock()?.invalidate_appender(file_path)
    }

    pub fn close_all(&self) -> Result<(), Error> {
        self.lock()?.close_appenders()
    }

    pub fn close_expired(&self, expire_time: SystemTime) -> Result<usize, Error> {
        self.lock()?.close_expired_appenders(expire_time)
    }

    pub fn close_if_archived(&self) -> Result<bool, Error> {
        self.lock()?.close_appenders_if_archived()
    }

    pub fn watch_archive_pattern(&self, pattern: Option<&Path>) -> Result<(), Error> {
        self.lock()?.watch_archive_pattern(pattern)
    }

    pub fn file_length(&self, file_path: &Path, fallback: bool) -> Result<Option<u64>, Error> {
        self.lock()?.file_length(file_path, fallback)
    }

    pub fn file_creation_time_utc(
        &self,
        file_path: &Path,
        fallback: bool,
    ) -> Result<Option<SystemTime>, Error> {
        self.lock()?.file_creation_time_utc(file_path, fallback)
    }

    pub fn file_last_write_time_utc(
        &self,
        file_path: &Path,
        fallback: bool,
    ) -> Result<Option<SystemTime>, Error> {
        self.lock()?.file_last_write_time_utc(file_path, fallback)
    }

    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.lock()?.is_empty())
    }

    pub fn size(&self) -> Result<usize, Error> {
        Ok(self.lock()?.size())
    }

    pub fn file_names(&self) -> Result<Vec<PathBuf>, Error> {
        Ok(self.lock()?.file_names())
    }

    pub fn into_inner(self) -> Result<FileAppenderCache<F>, Error> {
        self.inner.into_inner().map_err(|_| {
            Error::new(ErrorKind::Internal).with_message("appender cache lock poisoned")
        })
    }
}

impl<F: AppenderFactory> std::fmt::Debug for SharedAppenderCache<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedAppenderCache").finish_non_exhaustive()
    }
}
