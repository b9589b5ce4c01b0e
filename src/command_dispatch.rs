//! Purpose: Hold top-level CLI command dispatch for `appendcache`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command emits exactly one JSON document on success.
//! Invariants: Cached appenders are flushed before any length is reported.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::CommandFactory;

use appendcache::api::{FileAppender, archive_mutex_name, probe_archive_mutex};

use super::*;

pub(super) fn dispatch_command(cli: Cli, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match &cli.command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(*shell, &mut cmd, "appendcache", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_json(
                json!({
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::Write { files, lines } => {
            let mut cache = build_cache(&cli)?;
            let lines = if lines.is_empty() {
                read_stdin_lines()?
            } else {
                lines.clone()
            };

            let mut counts = vec![(0u64, 0u64); files.len()];
            for (index, line) in lines.iter().enumerate() {
                let slot = index % files.len();
                let bytes = line_bytes(line);
                cache.allocate_appender(&files[slot])?.write(&bytes)?;
                counts[slot].0 += 1;
                counts[slot].1 += bytes.len() as u64;
            }
            cache.flush_appenders()?;

            let mut written = Vec::with_capacity(files.len());
            for (path, (line_count, byte_count)) in files.iter().zip(counts) {
                written.push(json!({
                    "path": path.display().to_string(),
                    "lines": line_count,
                    "bytes": byte_count,
                    "length": cache.file_length(path, true)?,
                    "last_write": format_time(cache.file_last_write_time_utc(path, true)?),
                }));
            }
            emit_json(
                json!({ "written": written, "cache": cache_json(&cache) }),
                color_mode,
            );
            cache.close_appenders()?;
            Ok(RunOutcome::ok())
        }
        Command::Route {
            dir,
            ext,
            archive_pattern,
        } => {
            let mut cache = build_cache(&cli)?;
            if let Some(pattern) = archive_pattern.as_deref() {
                cache.watch_archive_pattern(Some(pattern))?;
            }

            let mut routed: BTreeMap<String, (PathBuf, u64, u64)> = BTreeMap::new();
            let mut reopened = 0u64;
            for (index, line) in read_stdin_lines()?.iter().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let (name, text) = split_route_line(line, index + 1)?;
                let path = route_path(dir, name, ext)?;
                if cache.close_appenders_if_archived()? {
                    reopened += 1;
                }
                let bytes = line_bytes(text);
                cache.allocate_appender(&path)?.write(&bytes)?;
                let entry = routed
                    .entry(name.to_string())
                    .or_insert_with(|| (path.clone(), 0, 0));
                entry.1 += 1;
                entry.2 += bytes.len() as u64;
            }
            cache.flush_appenders()?;

            let files = routed
                .iter()
                .map(|(name, (path, line_count, byte_count))| {
                    json!({
                        "name": name,
                        "path": path.display().to_string(),
                        "lines": line_count,
                        "bytes": byte_count,
                    })
                })
                .collect::<Vec<_>>();
            emit_json(
                json!({
                    "files": files,
                    "archive_reopens": reopened,
                    "cache": cache_json(&cache),
                }),
                color_mode,
            );
            cache.close_appenders()?;
            Ok(RunOutcome::ok())
        }
        Command::Stat { paths } => {
            let cache = build_cache(&cli)?;
            let mut stats = Vec::with_capacity(paths.len());
            for path in paths {
                let created = match cache.file_creation_time_utc(path, true) {
                    Ok(created) => created,
                    Err(err) if err.kind() == ErrorKind::Unsupported => None,
                    Err(err) => return Err(err),
                };
                let length = cache.file_length(path, true)?;
                stats.push(json!({
                    "path": path.display().to_string(),
                    "exists": length.is_some(),
                    "length": length,
                    "created": format_time(created),
                    "last_write": format_time(cache.file_last_write_time_utc(path, true)?),
                }));
            }
            emit_json(json!({ "files": stats }), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::MutexName { path, probe_ms } => {
            let name = archive_mutex_name(path);
            let mut value = json!({
                "path": path.display().to_string(),
                "name": name,
                "len": name.len(),
            });
            if let Some(ms) = probe_ms {
                let probe = probe_archive_mutex(path, Duration::from_millis(*ms));
                value["probe"] = json!(probe.as_str());
            }
            emit_json(value, color_mode);
            Ok(RunOutcome::ok())
        }
    }
}

fn line_bytes(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(line.len() + 1);
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    bytes
}

fn read_stdin_lines() -> Result<Vec<String>, Error> {
    io::stdin()
        .lock()
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read stdin")
                .with_source(err)
        })
}

fn split_route_line(line: &str, line_no: usize) -> Result<(&str, &str), Error> {
    match line.split_once('\t') {
        Some((name, text)) if !name.is_empty() => Ok((name, text)),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("line {line_no}: expected name<TAB>text"))
            .with_hint("Separate the target name from the text with a tab.")),
    }
}

fn route_path(dir: &Path, name: &str, ext: &str) -> Result<PathBuf, Error> {
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!("route name `{name}` must not contain path separators")));
    }
    if ext.is_empty() {
        return Ok(dir.join(name));
    }
    Ok(dir.join(format!("{name}.{ext}")))
}

#[cfg(test)]
mod tests {
    use super::{line_bytes, route_path, split_route_line};
    use appendcache::api::ErrorKind;
    use std::path::{Path, PathBuf};

    #[test]
    fn route_lines_split_on_first_tab() {
        assert_eq!(
            split_route_line("web\tGET /\tHTTP", 1).expect("split"),
            ("web", "GET /\tHTTP")
        );
        let err = split_route_line("no tab here", 3).expect_err("missing tab");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.message().unwrap_or("").starts_with("line 3"));
        assert!(split_route_line("\ttext", 1).is_err());
    }

    #[test]
    fn route_names_cannot_escape_the_directory() {
        let dir = Path::new("/logs");
        assert_eq!(
            route_path(dir, "web", "log").expect("path"),
            PathBuf::from("/logs/web.log")
        );
        assert_eq!(route_path(dir, "raw", "").expect("path"), PathBuf::from("/logs/raw"));
        assert!(route_path(dir, "../etc", "log").is_err());
        assert!(route_path(dir, "..", "").is_err());
    }

    #[test]
    fn line_bytes_appends_newline() {
        assert_eq!(line_bytes("abc"), b"abc\n");
    }
}
