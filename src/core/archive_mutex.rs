//! Purpose: Named cross-process mutex per log file, used to coordinate archiving with live writers.
//! Exports: `ArchiveMutex`, `ArchiveMutexGuard`, `MutexBackend`, `MutexError`, `archive_mutex_name`.
//! Role: Lets external rotation tools and appenders agree on who may move a file.
//! Invariants: Name derivation is deterministic for a path and never exceeds `MAX_MUTEX_NAME_LEN`.
//! Invariants: Platforms without named semaphores surface `MutexError::Unavailable`; callers proceed.
//! Invariants: The mutex never guards the in-process slot array.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::cell::Cell;
use std::time::Duration;

#[cfg(unix)]
use std::ffi::CString;
#[cfg(unix)]
use std::time::Instant;

const NAME_PREFIX: &str = "acarc-";
const HASH_CHARS: usize = 32;
const MIN_HASH_CHARS: usize = 16;
// Room kept for `-` plus the end of the path when the limit is tight.
const TAIL_RESERVE: usize = 8;

/// Longest name handed to the OS, excluding the leading `/` POSIX adds.
#[cfg(target_os = "macos")]
pub const MAX_MUTEX_NAME_LEN: usize = 30;
#[cfg(not(target_os = "macos"))]
pub const MAX_MUTEX_NAME_LEN: usize = 250;

#[derive(Debug)]
pub enum MutexError {
    Unavailable,
    Io(io::Error),
}

impl std::fmt::Display for MutexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "named mutex unavailable on this platform"),
            Self::Io(err) => write!(f, "named mutex error: {err}"),
        }
    }
}

impl std::error::Error for MutexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unavailable => None,
            Self::Io(err) => Some(err),
        }
    }
}

pub trait MutexBackend: Clone {
    type Handle;

    fn open(&self, name: &str) -> Result<Self::Handle, MutexError>;
    /// Returns `Ok(false)` when the timeout elapses without acquiring.
    fn try_acquire(&self, handle: &Self::Handle, timeout: Duration) -> Result<bool, MutexError>;
    fn release(&self, handle: &Self::Handle);
    fn close(&self, handle: &Self::Handle);
}

pub struct ArchiveMutex<B: MutexBackend> {
    name: String,
    handle: B::Handle,
    backend: B,
}

impl<B: MutexBackend> ArchiveMutex<B> {
    pub fn open_with_backend(name: String, backend: B) -> Result<Self, MutexError> {
        let handle = backend.open(&name)?;
        Ok(Self {
            name,
            handle,
            backend,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn try_lock(&self, timeout: Duration) -> Result<Option<ArchiveMutexGuard<'_, B>>, MutexError> {
        if self.backend.try_acquire(&self.handle, timeout)? {
            return Ok(Some(ArchiveMutexGuard { mutex: self }));
        }
        Ok(None)
    }
}

impl<B: MutexBackend> std::fmt::Debug for ArchiveMutex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveMutex").field("name", &self.name).finish()
    }
}

impl<B: MutexBackend> Drop for ArchiveMutex<B> {
    fn drop(&mut self) {
        self.backend.close(&self.handle);
    }
}

pub struct ArchiveMutexGuard<'a, B: MutexBackend> {
    mutex: &'a ArchiveMutex<B>,
}

impl<B: MutexBackend> Drop for ArchiveMutexGuard<'_, B> {
    fn drop(&mut self) {
        self.mutex.backend.release(&self.mutex.handle);
    }
}

#[cfg(unix)]
#[derive(Debug)]
pub struct SemHandle(*mut libc::sem_t);

// POSIX semaphores are safe to use from any thread.
#[cfg(unix)]
unsafe impl Send for SemHandle {}
#[cfg(unix)]
unsafe impl Sync for SemHandle {}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsMutexBackend;

#[cfg(unix)]
impl MutexBackend for OsMutexBackend {
    type Handle = SemHandle;

    fn open(&self, name: &str) -> Result<Self::Handle, MutexError> {
        let full = format!("/{name}");
        let c_name = CString::new(full).map_err(|_| MutexError::Unavailable)?;
        let mode = (libc::S_IRUSR | libc::S_IWUSR) as libc::mode_t;
        let handle =
            unsafe { libc::sem_open(c_name.as_ptr(), libc::O_CREAT, mode as libc::c_uint, 1) };
        if handle == libc::SEM_FAILED {
            return Err(map_sem_error(io::Error::last_os_error()));
        }
        Ok(SemHandle(handle))
    }

    fn try_acquire(&self, handle: &Self::Handle, timeout: Duration) -> Result<bool, MutexError> {
        let start = Instant::now();
        let poll = Duration::from_millis(5).min(timeout.max(Duration::from_millis(1)));
        loop {
            let rc = unsafe { libc::sem_trywait(handle.0) };
            if rc == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EAGAIN => {
                    if start.elapsed() >= timeout {
                        return Ok(false);
                    }
                    std::thread::sleep(poll);
                }
                Some(code) if code == libc::EINTR => continue,
                _ => return Err(map_sem_error(err)),
            }
        }
    }

    fn release(&self, handle: &Self::Handle) {
        unsafe {
            libc::sem_post(handle.0);
        }
    }

    fn close(&self, handle: &Self::Handle) {
        unsafe {
            libc::sem_close(handle.0);
        }
    }
}

#[cfg(not(unix))]
impl MutexBackend for OsMutexBackend {
    type Handle = ();

    fn open(&self, _name: &str) -> Result<Self::Handle, MutexError> {
        Err(MutexError::Unavailable)
    }

    fn try_acquire(&self, _handle: &Self::Handle, _timeout: Duration) -> Result<bool, MutexError> {
        Err(MutexError::Unavailable)
    }

    fn release(&self, _handle: &Self::Handle) {}

    fn close(&self, _handle: &Self::Handle) {}
}

pub type OsArchiveMutex = ArchiveMutex<OsMutexBackend>;

pub fn open_for_path(path: &Path) -> Result<OsArchiveMutex, MutexError> {
    #[cfg(test)]
    if FORCE_UNAVAILABLE.with(Cell::get) {
        return Err(MutexError::Unavailable);
    }
    ArchiveMutex::open_with_backend(archive_mutex_name(path), OsMutexBackend)
}

#[cfg(test)]
pub(crate) fn force_unavailable_for_tests(enabled: bool) {
    FORCE_UNAVAILABLE.with(|flag| flag.set(enabled));
}

#[cfg(test)]
thread_local! {
    static FORCE_UNAVAILABLE: Cell<bool> = const { Cell::new(false) };
}

pub fn archive_mutex_name(path: &Path) -> String {
    archive_mutex_name_with_limit(path, MAX_MUTEX_NAME_LEN)
}

fn archive_mutex_name_with_limit(path: &Path, max_len: usize) -> String {
    let canonical = canonical_path_string(path);
    let normalized: String = canonical
        .to_lowercase()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect();

    if NAME_PREFIX.len() + normalized.len() <= max_len {
        return format!("{NAME_PREFIX}{normalized}");
    }

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }

    let budget = max_len.saturating_sub(NAME_PREFIX.len());
    let hash_len = HASH_CHARS
        .min(budget.saturating_sub(TAIL_RESERVE))
        .max(MIN_HASH_CHARS)
        .min(budget);
    let mut name = format!("{NAME_PREFIX}{}", &hex[..hash_len]);
    let remaining = budget - hash_len;
    if remaining > 1 {
        name.push('-');
        name.push_str(trailing_slice(&normalized, remaining - 1));
    }
    name
}

fn trailing_slice(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut start = value.len() - max_bytes;
    while !value.is_char_boundary(start) {
        start += 1;
    }
    &value[start..]
}

fn canonical_path_string(path: &Path) -> String {
    resolve_path(path).to_string_lossy().into_owned()
}

/// Canonicalizes the deepest existing ancestor and re-appends the rest, so a
/// file gets the same name before and after it is created.
fn resolve_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut missing = Vec::new();
    let mut current = absolute.as_path();
    loop {
        if let Ok(mut resolved) = std::fs::canonicalize(current) {
            resolved.extend(missing.iter().rev());
            return resolved;
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                current = parent;
            }
            _ => return absolute.clone(),
        }
    }
}

#[cfg(unix)]
fn map_sem_error(err: io::Error) -> MutexError {
    match err.raw_os_error() {
        Some(code) if code == libc::ENOSYS || code == libc::ENOTSUP => MutexError::Unavailable,
        _ => MutexError::Io(err),
    }
}
