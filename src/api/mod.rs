//! Purpose: Define the stable public Rust API boundary for appendcache.
//! Exports: Cache, appender, parameter, and error types plus the `CacheBuilder` entry point.
//! Role: Public, additive-only surface; hides internal module layout.
//! Invariants: This module is the supported path to cache primitives.
//! Invariants: Anything not re-exported here may move without notice.

mod archive;
mod client;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::appender::{AppenderFactory, BaseFileAppender, FileAppender, FileAppenderFactory};
pub use crate::core::archive_mutex::{MAX_MUTEX_NAME_LEN, archive_mutex_name};
pub use crate::core::archive_watch::ArchiveWatcher;
pub use crate::core::cache::{CacheStats, FileAppenderCache};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::opener::{FileOpener, PortableFileOpener, platform_opener};
pub use crate::core::params::{CreateFileParameters, DEFAULT_BUFFER_SIZE};
pub use crate::core::retry::{RetryPolicy, is_sharing_violation};
pub use crate::core::shared::SharedAppenderCache;
pub use archive::{ArchiveProbe, probe_archive_mutex};
pub use client::{AppenderCache, CacheBuilder, DEFAULT_CACHE_SIZE, SharedCache};
