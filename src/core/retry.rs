// Injected retry/backoff policy for opening files under write contention.
use std::io;
use std::time::Duration;

use getrandom::fill as fill_random;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    attempts: u32,
    initial_delay: Duration,
}

impl RetryPolicy {
    /// `attempts` counts the first try; zero is treated as one.
    pub fn new(attempts: u32, initial_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay,
        }
    }

    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    /// Waits a uniform random time in `[0, delay)` between tries and doubles `delay` each time.
    pub fn run<T, E, R, F>(&self, is_retryable: R, mut op: F) -> Result<T, E>
    where
        R: Fn(&E) -> bool,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1u32;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.attempts || !is_retryable(&err) {
                        return Err(err);
                    }
                    let wait = jitter(delay);
                    tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, "retrying after contention");
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

fn jitter(delay: Duration) -> Duration {
    let span = delay.as_micros() as u64;
    if span == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    if fill_random(&mut bytes).is_err() {
        return delay / 2;
    }
    Duration::from_micros(u64::from_le_bytes(bytes) % span)
}

#[cfg(windows)]
const ERROR_SHARING_VIOLATION: i32 = 32;
#[cfg(windows)]
const ERROR_LOCK_VIOLATION: i32 = 33;

/// Reports whether `err` means another handle holds the file in a conflicting mode.
pub fn is_sharing_violation(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    let Some(code) = err.raw_os_error() else {
        return false;
    };
    #[cfg(unix)]
    {
        code == libc::EAGAIN || code == libc::EWOULDBLOCK || code == libc::EBUSY || code == libc::ETXTBSY
    }
    #[cfg(windows)]
    {
        code == ERROR_SHARING_VIOLATION || code == ERROR_LOCK_VIOLATION
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = code;
        false
    }
}
