// Watches for archive files created next to live logs so cached handles can be dropped.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use globset::{Glob, GlobMatcher};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::core::error::{Error, ErrorKind};

pub struct ArchiveWatcher {
    pattern: PathBuf,
    dirty: Arc<AtomicBool>,
    _watcher: RecommendedWatcher,
}

impl ArchiveWatcher {
    /// `pattern` is a path whose file-name component may contain glob syntax,
    /// e.g. `/var/log/app.*.log`. Only its parent directory is watched.
    pub fn new(pattern: &Path) -> Result<Self, Error> {
        let file_pattern = pattern
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message("archive pattern must end in a file name")
                    .with_path(pattern)
            })?;
        let matcher = Glob::new(file_pattern)
            .map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid archive pattern")
                    .with_path(pattern)
                    .with_source(err)
            })?
            .compile_matcher();
        let dir = match pattern.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let dirty = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dirty);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if is_archive_event(&event, &matcher) {
                        tracing::debug!(paths = ?event.paths, "archive file observed");
                        flag.store(true, Ordering::SeqCst);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "archive watcher error"),
            },
            Config::default(),
        )
        .map_err(|err| watch_error(err, &dir))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|err| watch_error(err, &dir))?;
        tracing::debug!(dir = %dir.display(), pattern = file_pattern, "watching for archive files");

        Ok(Self {
            pattern: pattern.to_path_buf(),
            dirty,
            _watcher: watcher,
        })
    }

    pub fn pattern(&self) -> &Path {
        &self.pattern
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Clears the flag and reports whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ArchiveWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWatcher")
            .field("pattern", &self.pattern)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

fn is_archive_event(event: &Event, matcher: &GlobMatcher) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both | RenameMode::Any))
    );
    relevant
        && event
            .paths
            .iter()
            .filter_map(|path| path.file_name())
            .any(|name| matcher.is_match(name))
}

fn watch_error(err: notify::Error, dir: &Path) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to watch archive directory")
        .with_path(dir)
        .with_source(err)
}
