// Append-only file handle owner plus the factory the cache uses to open new ones.
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs2::FileExt;

use crate::core::archive_mutex::{self, MutexError, OsArchiveMutex};
use crate::core::error::{Error, ErrorKind};
use crate::core::opener::{FileOpener, open_append, platform_opener};
use crate::core::params::CreateFileParameters;
use crate::core::retry::RetryPolicy;

/// What the cache needs from an open appender.
pub trait FileAppender {
    fn file_name(&self) -> &Path;
    fn open_time(&self) -> SystemTime;
    fn last_write_time(&self) -> Option<SystemTime>;
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;
    fn flush(&mut self) -> Result<(), Error>;
    /// Releases the handle. Closing an already closed appender is a no-op.
    fn close(&mut self) -> Result<(), Error>;
    fn creation_time(&self) -> Result<Option<SystemTime>, Error>;
    fn file_length(&self) -> Result<Option<u64>, Error>;
}

/// Opens appenders on behalf of the cache.
pub trait AppenderFactory {
    type Appender: FileAppender;

    fn open(&self, file_name: &Path, params: &CreateFileParameters) -> Result<Self::Appender, Error>;
}

enum Sink {
    Buffered(BufWriter<File>),
    Direct(File),
}

impl Sink {
    fn file(&self) -> &File {
        match self {
            Self::Buffered(writer) => writer.get_ref(),
            Self::Direct(file) => file,
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Buffered(writer) => writer.write_all(bytes),
            Self::Direct(file) => file.write_all(bytes),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Buffered(writer) => writer.flush(),
            Self::Direct(file) => file.flush(),
        }
    }
}

pub struct BaseFileAppender {
    file_name: PathBuf,
    open_time: SystemTime,
    last_write_time: Option<SystemTime>,
    capture_last_write_time: bool,
    concurrent_writes: bool,
    sink: Option<Sink>,
    archive_mutex: Option<OsArchiveMutex>,
}

impl BaseFileAppender {
    pub fn open(
        file_name: impl Into<PathBuf>,
        params: &CreateFileParameters,
        policy: &RetryPolicy,
        opener: &dyn FileOpener,
    ) -> Result<Self, Error> {
        let file_name = file_name.into();
        let archive_mutex = if params.archive_mutex {
            match archive_mutex::open_for_path(&file_name) {
                Ok(mutex) => Some(mutex),
                Err(MutexError::Unavailable) => None,
                Err(err) => {
                    tracing::warn!(path = %file_name.display(), error = %err, "archive mutex not created");
                    None
                }
            }
        } else {
            None
        };

        let file = open_append(&file_name, params, policy, opener)?;
        let sink = if params.buffer_size > 0 && !params.concurrent_writes {
            Sink::Buffered(BufWriter::with_capacity(params.buffer_size, file))
        } else {
            Sink::Direct(file)
        };
        let open_time = SystemTime::now();
        tracing::debug!(path = %file_name.display(), "opened appender");

        Ok(Self {
            file_name,
            open_time,
            last_write_time: params.capture_last_write_time.then_some(open_time),
            capture_last_write_time: params.capture_last_write_time,
            concurrent_writes: params.concurrent_writes,
            sink: Some(sink),
            archive_mutex,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }

    pub fn archive_mutex(&self) -> Option<&OsArchiveMutex> {
        self.archive_mutex.as_ref()
    }

    fn sink(&self) -> Result<&Sink, Error> {
        self.sink.as_ref().ok_or_else(|| closed_error(&self.file_name))
    }
}

fn closed_error(path: &Path) -> Error {
    Error::new(ErrorKind::Closed)
        .with_message("appender is closed")
        .with_path(path)
}

impl FileAppender for BaseFileAppender {
    fn file_name(&self) -> &Path {
        &self.file_name
    }

    fn open_time(&self) -> SystemTime {
        self.open_time
    }

    fn last_write_time(&self) -> Option<SystemTime> {
        self.last_write_time
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let path = self.file_name.clone();
        let concurrent = self.concurrent_writes;
        let Some(sink) = self.sink.as_mut() else {
            return Err(closed_error(&path));
        };
        let io_err = |err: std::io::Error| Error::from_io(err, &path).with_message("write failed");
        if concurrent {
            sink.file().lock_exclusive().map_err(io_err)?;
            let result = sink.write_all(bytes).and_then(|()| sink.flush());
            if let Err(err) = FileExt::unlock(sink.file()) {
                tracing::warn!(path = %path.display(), error = %err, "file unlock failed");
            }
            result.map_err(io_err)?;
        } else {
            sink.write_all(bytes).map_err(io_err)?;
        }
        if self.capture_last_write_time {
            self.last_write_time = Some(SystemTime::now());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        let path = &self.file_name;
        match self.sink.as_mut() {
            Some(sink) => sink
                .flush()
                .map_err(|err| Error::from_io(err, path).with_message("flush failed")),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };
        tracing::debug!(path = %self.file_name.display(), "closing appender");
        self.archive_mutex = None;
        sink.flush()
            .map_err(|err| Error::from_io(err, &self.file_name).with_message("flush on close failed"))
    }

    fn creation_time(&self) -> Result<Option<SystemTime>, Error> {
        let meta = self
            .sink()?
            .file()
            .metadata()
            .map_err(|err| Error::from_io(err, &self.file_name))?;
        match meta.created() {
            Ok(time) => Ok(Some(time)),
            Err(err) if err.kind() == std::io::ErrorKind::Unsupported => Ok(Some(self.open_time)),
            Err(err) => Err(Error::from_io(err, &self.file_name)),
        }
    }

    fn file_length(&self) -> Result<Option<u64>, Error> {
        let sink = self.sink()?;
        let pending = match sink {
            Sink::Buffered(writer) => writer.buffer().len() as u64,
            Sink::Direct(_) => 0,
        };
        let meta = sink
            .file()
            .metadata()
            .map_err(|err| Error::from_io(err, &self.file_name))?;
        Ok(Some(meta.len() + pending))
    }
}

impl fmt::Debug for BaseFileAppender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseFileAppender")
            .field("file_name", &self.file_name)
            .field("open_time", &self.open_time)
            .field("closed", &self.is_closed())
            .field("archive_mutex", &self.archive_mutex)
            .finish()
    }
}

impl Drop for BaseFileAppender {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "appender close on drop failed");
        }
    }
}

/// Production factory: platform opener plus an injected retry policy.
#[derive(Debug)]
pub struct FileAppenderFactory {
    opener: Box<dyn FileOpener>,
    policy: RetryPolicy,
}

impl FileAppenderFactory {
    pub fn new(params: &CreateFileParameters) -> Self {
        Self::with_parts(platform_opener(params), params.retry_policy())
    }

    pub fn with_parts(opener: Box<dyn FileOpener>, policy: RetryPolicy) -> Self {
        Self { opener, policy }
    }

    pub fn opener_name(&self) -> &'static str {
        self.opener.name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl AppenderFactory for FileAppenderFactory {
    type Appender = BaseFileAppender;

    fn open(&self, file_name: &Path, params: &CreateFileParameters) -> Result<BaseFileAppender, Error> {
        BaseFileAppender::open(file_name, params, &self.policy, self.opener.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn open(path: &Path, params: &CreateFileParameters) -> BaseFileAppender {
        FileAppenderFactory::new(params)
            .open(path, params)
            .expect("open appender")
    }

    #[test]
    fn write_flush_and_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let params = CreateFileParameters::default();
        let mut appender = open(&path, &params);

        appender.write(b"hello\n").expect("write");
        assert_eq!(appender.file_length().expect("len"), Some(6));
        appender.flush().expect("flush");
        assert_eq!(fs::read(&path).expect("read"), b"hello\n");
    }

    #[test]
    fn unbuffered_writes_reach_disk_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let params = CreateFileParameters {
            buffer_size: 0,
            ..CreateFileParameters::default()
        };
        let mut appender = open(&path, &params);
        appender.write(b"abc").expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"abc");
    }

    #[test]
    fn close_is_idempotent_and_blocks_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let params = CreateFileParameters::default();
        let mut appender = open(&path, &params);

        appender.write(b"x").expect("write");
        appender.close().expect("close");
        appender.close().expect("second close");
        assert!(appender.is_closed());
        assert_eq!(fs::read(&path).expect("read"), b"x");

        let err = appender.write(b"y").expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert_eq!(appender.file_length().expect_err("closed").kind(), ErrorKind::Closed);
    }

    #[test]
    fn last_write_time_is_captured_when_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");

        let plain = open(&path, &CreateFileParameters::default());
        assert_eq!(plain.last_write_time(), None);

        let params = CreateFileParameters {
            capture_last_write_time: true,
            ..CreateFileParameters::default()
        };
        let mut appender = open(&path, &params);
        let before = appender.last_write_time().expect("initial stamp");
        std::thread::sleep(std::time::Duration::from_millis(2));
        appender.write(b"x").expect("write");
        assert!(appender.last_write_time().expect("stamp") >= before);
    }

    #[test]
    fn concurrent_writes_lock_and_flush_each_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let params = CreateFileParameters {
            concurrent_writes: true,
            ..CreateFileParameters::default()
        };
        let mut first = open(&path, &params);
        let mut second = open(&path, &params);
        first.write(b"a\n").expect("write");
        second.write(b"b\n").expect("write");
        first.write(b"c\n").expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"a\nb\nc\n");

        // Each write releases its lock, so an outside handle can take it.
        let outside = File::open(&path).expect("open outside");
        FileExt::try_lock_exclusive(&outside).expect("lock released after write");
        FileExt::unlock(&outside).expect("unlock");
    }

    #[test]
    fn missing_appender_mutex_does_not_block_open() {
        archive_mutex::force_unavailable_for_tests(true);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let params = CreateFileParameters {
            archive_mutex: true,
            ..CreateFileParameters::default()
        };
        let appender = open(&path, &params);
        archive_mutex::force_unavailable_for_tests(false);
        assert!(appender.archive_mutex().is_none());
    }
}
