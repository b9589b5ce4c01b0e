//! Purpose: Resolve `CreateFileParameters` for the CLI from a JSON file, the environment, and flags.
//! Exports: `ParamOverrides`, `load_params`, `CONFIG_ENV`.
//! Role: Keep config precedence in one place: defaults < config file < explicit flags.
//! Invariants: `--config` wins over `APPENDCACHE_CONFIG`; a missing explicit file is an error.
//! Invariants: Unknown keys in a config file are rejected rather than ignored.

use std::path::{Path, PathBuf};

use appendcache::api::{CreateFileParameters, Error, ErrorKind};

pub(crate) const CONFIG_ENV: &str = "APPENDCACHE_CONFIG";

#[derive(Clone, Debug, Default)]
pub(crate) struct ParamOverrides {
    pub concurrent_writes: bool,
    pub no_create_dirs: bool,
    pub capture_last_write_time: bool,
    pub archive_mutex: bool,
    pub force_managed: bool,
    pub buffer_size: Option<usize>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

impl ParamOverrides {
    fn apply(&self, params: &mut CreateFileParameters) {
        if self.concurrent_writes {
            params.concurrent_writes = true;
        }
        if self.no_create_dirs {
            params.create_dirs = false;
        }
        if self.capture_last_write_time {
            params.capture_last_write_time = true;
        }
        if self.archive_mutex {
            params.archive_mutex = true;
        }
        if self.force_managed {
            params.force_managed = true;
        }
        if let Some(size) = self.buffer_size {
            params.buffer_size = size;
        }
        if let Some(attempts) = self.retry_attempts {
            params.concurrent_write_attempts = attempts;
        }
        if let Some(delay) = self.retry_delay_ms {
            params.concurrent_write_attempt_delay_ms = delay;
        }
    }
}

pub(crate) fn load_params(
    config: Option<&Path>,
    overrides: &ParamOverrides,
) -> Result<CreateFileParameters, Error> {
    let from_env = std::env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    let path = config.map(Path::to_path_buf).or(from_env);

    let mut params = match path {
        Some(path) => read_config(&path)?,
        None => CreateFileParameters::default(),
    };
    overrides.apply(&mut params);
    Ok(params)
}

fn read_config(path: &Path) -> Result<CreateFileParameters, Error> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        Error::from_io(err, path)
            .with_message("failed to read config file")
            .with_hint(format!("Pass --config with an existing file or unset {CONFIG_ENV}."))
    })?;
    serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid config file: {err}"))
            .with_path(path)
            .with_hint("Config is a JSON object of create-file parameters.")
    })
}
