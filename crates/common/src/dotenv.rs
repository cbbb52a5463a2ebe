//! Local `.env` loader.
//!
//! Reads `KEY=VALUE` lines into the process environment without overriding
//! anything already exported. The file is developer-managed and gitignored;
//! only key names are ever logged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors from reading a `.env` file.
///
/// A missing file is not an error; see [`DotenvOutcome::NotFound`].
#[derive(Debug, Error)]
pub enum DotenvError {
    #[error("{0} is a directory, expected a file")]
    IsDirectory(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What happened when loading a `.env` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DotenvOutcome {
    /// No file at the path.
    NotFound,
    /// File parsed; `applied` keys were set, `skipped` were already present.
    Loaded { applied: usize, skipped: usize },
}

/// Destination for parsed variables.
///
/// The process environment is the production sink; tests use a `HashMap`.
pub trait EnvSink {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSink for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set(&mut self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}

impl EnvSink for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), value.to_string());
    }
}

/// Parse `.env` contents into ordered key/value pairs.
///
/// Blank lines, `#` comments, lines without `=` and lines with an empty key
/// are skipped. An `export ` prefix is dropped and one layer of matching
/// single or double quotes is stripped from the value.
#[must_use]
pub fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter_map(|raw| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }

            Some((key.to_string(), strip_quotes(value.trim()).to_string()))
        })
        .collect()
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value
                .strip_prefix(quote)
                .and_then(|v| v.strip_suffix(quote))
                .unwrap_or(value);
        }
    }
    value
}

/// Apply pairs to `sink`, keeping any value that is already set.
///
/// A variable holding the empty string counts as unset. Returns
/// `(applied, skipped)`.
pub fn apply_missing(pairs: &[(String, String)], sink: &mut impl EnvSink) -> (usize, usize) {
    let mut applied = 0;
    let mut skipped = 0;

    for (key, value) in pairs {
        if sink.get(key).is_some_and(|existing| !existing.is_empty()) {
            debug!(key = %key, "keeping value already present in environment");
            skipped += 1;
            continue;
        }
        sink.set(key, value);
        debug!(key = %key, "loaded from .env");
        applied += 1;
    }

    (applied, skipped)
}

/// Load `path` into the process environment if it exists.
///
/// # Errors
///
/// Returns `DotenvError::IsDirectory` when the path is a directory and
/// `DotenvError::Io` when it exists but cannot be read.
pub fn load_dotenv_if_present(path: &Path) -> Result<DotenvOutcome, DotenvError> {
    load_into(path, &mut ProcessEnv)
}

/// Load `path` into an arbitrary sink.
///
/// # Errors
///
/// See [`load_dotenv_if_present`].
pub fn load_into(path: &Path, sink: &mut impl EnvSink) -> Result<DotenvOutcome, DotenvError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no .env file");
            return Ok(DotenvOutcome::NotFound);
        }
        Err(source) => {
            return Err(DotenvError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if metadata.is_dir() {
        return Err(DotenvError::IsDirectory(path.to_path_buf()));
    }

    let contents = std::fs::read_to_string(path).map_err(|source| DotenvError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (applied, skipped) = apply_missing(&parse_dotenv(&contents), sink);
    debug!(path = %path.display(), applied, skipped, "loaded .env");

    Ok(DotenvOutcome::Loaded { applied, skipped })
}
