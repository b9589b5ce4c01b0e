//! Purpose: Build ready-to-use appender caches from parameters and a slot count.
//! Exports: `CacheBuilder`, `AppenderCache`, `SharedCache`, `DEFAULT_CACHE_SIZE`.
//! Role: Single construction path shared by the CLI and library callers.
//! Invariants: The retry policy is derived from the parameters and injected, never global.
//! Invariants: Archive watching is opt-in and installed before the cache is handed out.

use std::path::PathBuf;

use crate::core::appender::FileAppenderFactory;
use crate::core::cache::FileAppenderCache;
use crate::core::error::Error;
use crate::core::opener::FileOpener;
use crate::core::params::CreateFileParameters;
use crate::core::retry::RetryPolicy;
use crate::core::shared::SharedAppenderCache;

pub const DEFAULT_CACHE_SIZE: usize = 5;

pub type AppenderCache = FileAppenderCache<FileAppenderFactory>;
pub type SharedCache = SharedAppenderCache<FileAppenderFactory>;

#[derive(Debug)]
pub struct CacheBuilder {
    size: usize,
    params: CreateFileParameters,
    retry_policy: Option<RetryPolicy>,
    opener: Option<Box<dyn FileOpener>>,
    archive_pattern: Option<PathBuf>,
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self {
            size: DEFAULT_CACHE_SIZE,
            params: CreateFileParameters::default(),
            retry_policy: None,
            opener: None,
            archive_pattern: None,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_params(mut self, params: CreateFileParameters) -> Self {
        self.params = params;
        self
    }

    /// Overrides the policy otherwise derived from the parameters.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_opener(mut self, opener: Box<dyn FileOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn with_archive_pattern(mut self, pattern: impl Into<PathBuf>) -> Self {
        self.archive_pattern = Some(pattern.into());
        self
    }

    pub fn build(self) -> Result<AppenderCache, Error> {
        let policy = self
            .retry_policy
            .unwrap_or_else(|| self.params.retry_policy());
        let opener = self
            .opener
            .unwrap_or_else(|| crate::core::opener::platform_opener(&self.params));
        let factory = FileAppenderFactory::with_parts(opener, policy);
        let mut cache = FileAppenderCache::new(self.size, factory, self.params);
        if let Some(pattern) = self.archive_pattern.as_deref() {
            cache.watch_archive_pattern(Some(pattern))?;
        }
        Ok(cache)
    }

    pub fn build_shared(self) -> Result<SharedCache, Error> {
        Ok(SharedAppenderCache::new(self.build()?))
    }
}
