// File creation parameters shared by every appender a cache opens.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreateFileParameters {
    pub concurrent_write_attempt_delay_ms: u64,
    pub concurrent_write_attempts: u32,
    pub concurrent_writes: bool,
    pub create_dirs: bool,
    pub enable_file_delete: bool,
    pub buffer_size: usize,
    pub force_managed: bool,
    /// Win32 `FILE_ATTRIBUTE_*` bits; ignored on other platforms.
    pub file_attributes: u32,
    pub capture_last_write_time: bool,
    pub archive_mutex: bool,
}

impl Default for CreateFileParameters {
    fn default() -> Self {
        Self {
            concurrent_write_attempt_delay_ms: 1,
            concurrent_write_attempts: 10,
            concurrent_writes: false,
            create_dirs: true,
            enable_file_delete: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            force_managed: false,
            file_attributes: 0,
            capture_last_write_time: false,
            archive_mutex: false,
        }
    }
}

impl CreateFileParameters {
    /// Lock contention is only retried when concurrent writes are expected.
    pub fn retry_policy(&self) -> RetryPolicy {
        if !self.concurrent_writes {
            return RetryPolicy::none();
        }
        RetryPolicy::new(
            self.concurrent_write_attempts,
            Duration::from_millis(self.concurrent_write_attempt_delay_ms),
        )
    }
}
