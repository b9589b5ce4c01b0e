// Platform file-open capability plus the open-with-retry protocol used for new appenders.
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use crate::core::error::{Error, ErrorKind};
use crate::core::params::CreateFileParameters;
use crate::core::retry::{RetryPolicy, is_sharing_violation};

/// Opens a file for appending, creating it when missing.
pub trait FileOpener: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, path: &Path, params: &CreateFileParameters) -> io::Result<File>;

    fn is_portable(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PortableFileOpener;

impl FileOpener for PortableFileOpener {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn open(&self, path: &Path, params: &CreateFileParameters) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(windows)]
        {
            use std::os::windows::fs::OpenOptionsExt;
            options.share_mode(windows_share_mode(params));
        }
        #[cfg(not(windows))]
        let _ = params;
        options.open(path)
    }

    fn is_portable(&self) -> bool {
        true
    }
}

#[cfg(unix)]
#[derive(Clone, Copy, Debug, Default)]
pub struct UnixFileOpener;

#[cfg(unix)]
impl FileOpener for UnixFileOpener {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn open(&self, path: &Path, _params: &CreateFileParameters) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new()
            .append(true)
            .create(true)
            .mode(0o644)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
    }
}

#[cfg(windows)]
#[derive(Clone, Copy, Debug, Default)]
pub struct WindowsFileOpener;

#[cfg(windows)]
impl FileOpener for WindowsFileOpener {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn open(&self, path: &Path, params: &CreateFileParameters) -> io::Result<File> {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_ATTRIBUTE_NORMAL: u32 = 0x80;
        let attributes = if params.file_attributes == 0 {
            FILE_ATTRIBUTE_NORMAL
        } else {
            params.file_attributes
        };
        OpenOptions::new()
            .append(true)
            .create(true)
            .share_mode(windows_share_mode(params))
            .attributes(attributes)
            .open(path)
    }
}

#[cfg(windows)]
fn windows_share_mode(params: &CreateFileParameters) -> u32 {
    const FILE_SHARE_READ: u32 = 0x1;
    const FILE_SHARE_WRITE: u32 = 0x2;
    const FILE_SHARE_DELETE: u32 = 0x4;
    let mut mode = FILE_SHARE_READ;
    if params.concurrent_writes {
        mode |= FILE_SHARE_WRITE;
    }
    if params.enable_file_delete {
        mode |= FILE_SHARE_DELETE;
    }
    mode
}

/// Picks the opener for this platform; `force_managed` always selects the portable one.
pub fn platform_opener(params: &CreateFileParameters) -> Box<dyn FileOpener> {
    if params.force_managed {
        return Box::new(PortableFileOpener);
    }
    #[cfg(unix)]
    {
        Box::new(UnixFileOpener)
    }
    #[cfg(windows)]
    {
        Box::new(WindowsFileOpener)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Box::new(PortableFileOpener)
    }
}

pub(crate) fn open_append(
    path: &Path,
    params: &CreateFileParameters,
    policy: &RetryPolicy,
    opener: &dyn FileOpener,
) -> Result<File, Error> {
    let retryable = |err: &io::Error| params.concurrent_writes && is_sharing_violation(err);
    policy
        .run(retryable, |attempt| {
            if attempt > 1 {
                tracing::debug!(path = %path.display(), attempt, "reopening after contention");
            }
            open_creating_dirs(path, params, opener)
        })
        .map_err(|err| {
            let err = Error::from_io(err, path).with_message("failed to open file for append");
            match err.kind() {
                ErrorKind::Busy => err.with_hint(format!(
                    "Another writer holds the file. Retry attempts: {}.",
                    policy.attempts()
                )),
                ErrorKind::NotFound if !params.create_dirs => {
                    err.with_hint("Parent directory is missing; enable create_dirs or create it.")
                }
                _ => err,
            }
        })
}

fn open_creating_dirs(
    path: &Path,
    params: &CreateFileParameters,
    opener: &dyn FileOpener,
) -> io::Result<File> {
    match open_with_fallback(path, params, opener) {
        Err(err) if err.kind() == io::ErrorKind::NotFound && params.create_dirs => {
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                tracing::debug!(dir = %parent.display(), "creating missing directory");
                fs::create_dir_all(parent)?;
            }
            open_with_fallback(path, params, opener)
        }
        other => other,
    }
}

fn open_with_fallback(
    path: &Path,
    params: &CreateFileParameters,
    opener: &dyn FileOpener,
) -> io::Result<File> {
    match opener.open(path, params) {
        Ok(file) => Ok(file),
        Err(err) if err.kind() == io::ErrorKind::NotFound || opener.is_portable() => Err(err),
        Err(err) => {
            tracing::debug!(
                path = %path.display(),
                opener = opener.name(),
                error = %err,
                "native open failed; trying portable path"
            );
            PortableFileOpener.open(path, params)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug)]
    struct FailingOpener {
        errors: Mutex<Vec<io::ErrorKind>>,
        calls: Mutex<u32>,
    }

    impl FailingOpener {
        fn new(errors: Vec<io::ErrorKind>) -> Self {
            Self {
                errors: Mutex::new(errors),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("lock")
        }
    }

    impl FileOpener for FailingOpener {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn open(&self, path: &Path, params: &CreateFileParameters) -> io::Result<File> {
            *self.calls.lock().expect("lock") += 1;
            let mut errors = self.errors.lock().expect("lock");
            if errors.is_empty() {
                return PortableFileOpener.open(path, params);
            }
            Err(io::Error::from(errors.remove(0)))
        }

        fn is_portable(&self) -> bool {
            true
        }
    }

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a").join("b").join("app.log");
        let params = CreateFileParameters::default();
        let opener = platform_opener(&params);
        let mut file =
            open_append(&path, &params, &RetryPolicy::none(), opener.as_ref()).expect("open");
        file.write_all(b"hello\n").expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"hello\n");
    }

    #[test]
    fn missing_directory_without_create_dirs_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("app.log");
        let params = CreateFileParameters {
            create_dirs: false,
            ..CreateFileParameters::default()
        };
        let err = open_append(&path, &params, &RetryPolicy::none(), &PortableFileOpener)
            .expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.hint().is_some());
    }

    #[test]
    fn opens_in_append_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        fs::write(&path, b"first\n").expect("seed");
        let params = CreateFileParameters::default();
        let opener = platform_opener(&params);
        let mut file =
            open_append(&path, &params, &RetryPolicy::none(), opener.as_ref()).expect("open");
        file.write_all(b"second\n").expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"first\nsecond\n");
    }

    #[test]
    fn contention_is_retried_when_concurrent_writes_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let params = CreateFileParameters {
            concurrent_writes: true,
            ..CreateFileParameters::default()
        };
        let opener = FailingOpener::new(vec![io::ErrorKind::WouldBlock, io::ErrorKind::WouldBlock]);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        open_append(&path, &params, &policy, &opener).expect("third attempt succeeds");
        assert_eq!(opener.calls(), 3);
    }

    #[test]
    fn contention_exhaustion_surfaces_busy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let params = CreateFileParameters {
            concurrent_writes: true,
            ..CreateFileParameters::default()
        };
        let opener = FailingOpener::new(vec![io::ErrorKind::WouldBlock; 4]);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let err = open_append(&path, &params, &policy, &opener).expect_err("exhausted");
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert_eq!(opener.calls(), 2);
        assert!(err.hint().unwrap_or("").contains("Retry attempts: 2"));
    }

    #[test]
    fn contention_is_not_retried_without_concurrent_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let params = CreateFileParameters::default();
        let opener = FailingOpener::new(vec![io::ErrorKind::WouldBlock]);
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let err = open_append(&path, &params, &policy, &opener).expect_err("no retry");
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert_eq!(opener.calls(), 1);
    }

    #[test]
    fn force_managed_selects_portable_opener() {
        let params = CreateFileParameters {
            force_managed: true,
            ..CreateFileParameters::default()
        };
        assert!(platform_opener(&params).is_portable());
    }
}
