use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::discovery::FileClassification;

/// A directory could not be listed. The subtree is treated as empty.
#[derive(Debug, Error)]
#[error("failed to read directory '{}'", path.display())]
pub struct ScanError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// A single unit failed to load. Never fatal: the unit is excluded and the
/// walk continues.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read unit '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid unit '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("unsupported unit format '{}'", path.display())]
    Unsupported { path: PathBuf },
    #[error("unit '{}' is a {found} unit, expected {expected}", path.display())]
    KindMismatch {
        path: PathBuf,
        expected: FileClassification,
        found: FileClassification,
    },
    #[error("setup of unit '{}' failed", path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("route '{}' cannot be mounted at '{mount_path}': path already taken", path.display())]
    MountConflict { path: PathBuf, mount_path: String },
    #[error("{} errors while loading unit '{}'", causes.len(), path.display())]
    Aggregate { path: PathBuf, causes: Vec<LoadError> },
}

impl LoadError {
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        LoadError::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn setup(path: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        LoadError::Setup {
            path: path.into(),
            source,
        }
    }

    /// Collapse a list of failures: one stays as is, several become an aggregate.
    pub fn from_many(path: impl Into<PathBuf>, mut causes: Vec<LoadError>) -> Option<Self> {
        match causes.len() {
            0 => None,
            1 => causes.pop(),
            _ => Some(LoadError::Aggregate {
                path: path.into(),
                causes,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            LoadError::Io { path, .. }
            | LoadError::Parse { path, .. }
            | LoadError::Unsupported { path }
            | LoadError::KindMismatch { path, .. }
            | LoadError::Setup { path, .. }
            | LoadError::MountConflict { path, .. }
            | LoadError::Aggregate { path, .. } => path,
        }
    }

    /// Leaf causes, with nested aggregates flattened.
    pub fn causes(&self) -> Vec<&LoadError> {
        match self {
            LoadError::Aggregate { causes, .. } => {
                causes.iter().flat_map(|c| c.causes()).collect()
            }
            other => vec![other],
        }
    }
}

/// A unit excluded from the boot, with the reason.
#[derive(Debug)]
pub struct UnitFailure {
    pub path: PathBuf,
    pub classification: FileClassification,
    pub error: LoadError,
}

impl UnitFailure {
    pub fn new(path: impl Into<PathBuf>, classification: FileClassification, error: LoadError) -> Self {
        Self {
            path: path.into(),
            classification,
            error,
        }
    }
}

/// Startup failures that abort the boot. Unit failures never end up here.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("REST prepare failed for ingress host")]
    RestPrepare {
        #[source]
        source: anyhow::Error,
    },
    #[error("REST finalize failed for ingress host")]
    RestFinalize {
        #[source]
        source: anyhow::Error,
    },
}

/// `err: cause: cause` in one line, for log fields.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Log a load failure; aggregates are logged cause by cause.
pub(crate) fn log_load_failure(err: &LoadError) {
    if let LoadError::Aggregate { path, causes } = err {
        tracing::error!(
            path = %path.display(),
            causes = causes.len(),
            "Unit failed to load with multiple errors"
        );
    }
    for cause in err.causes() {
        tracing::error!(
            path = %cause.path().display(),
            error = %error_chain(cause),
            "Unit failed to load; skipping"
        );
    }
}
