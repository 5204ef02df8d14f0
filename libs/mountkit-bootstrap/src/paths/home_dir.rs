//! Resolution of the server home directory (logs and other runtime state).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("{0} environment variable is not set")]
    EnvMissing(&'static str),
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("failed to create home_dir {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Variable holding the user's home directory (`~`).
#[cfg(target_os = "windows")]
const USER_HOME_VAR: &str = "USERPROFILE";
#[cfg(not(target_os = "windows"))]
const USER_HOME_VAR: &str = "HOME";

/// Variable holding the parent of the default home directory.
#[cfg(target_os = "windows")]
const DEFAULT_BASE_VAR: &str = "APPDATA";
#[cfg(not(target_os = "windows"))]
const DEFAULT_BASE_VAR: &str = "HOME";

fn env_path(var: &'static str) -> Result<PathBuf, HomeDirError> {
    env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or(HomeDirError::EnvMissing(var))
}

/// Expand a leading `~` (`~`, `~/x`, and `~\x` on Windows).
fn expand_tilde(raw: &str) -> Result<PathBuf, HomeDirError> {
    if raw == "~" {
        return env_path(USER_HOME_VAR);
    }
    let rest = raw
        .strip_prefix("~/")
        .or_else(|| cfg!(target_os = "windows").then(|| raw.strip_prefix("~\\")).flatten());
    match rest {
        Some(rest) => Ok(env_path(USER_HOME_VAR)?.join(rest)),
        None => Ok(PathBuf::from(raw)),
    }
}

/// Resolve the configured home directory.
///
/// - `Some(path)`: `~` is expanded and the result must be absolute.
/// - `None` (or blank): `$HOME/<default_subdir>`, `%APPDATA%\<default_subdir>`
///   on Windows.
///
/// With `create`, the directory is created when missing.
pub fn resolve_home_dir(
    configured: Option<&str>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            let expanded = expand_tilde(raw)?;
            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(raw.to_string()));
            }
            expanded
        }
        None => env_path(DEFAULT_BASE_VAR)?.join(default_subdir),
    };

    if create {
        ensure_dir(&path)?;
    }
    Ok(path)
}

fn ensure_dir(path: &Path) -> Result<(), HomeDirError> {
    fs::create_dir_all(path).map_err(|source| HomeDirError::Create {
        path: path.to_path_buf(),
        source,
    })
}
