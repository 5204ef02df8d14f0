//! Naming-convention classifier.
//!
//! A file's role comes from two signals only: the folder it lives in and the
//! role suffix in its name (`auth.middleware.yaml` inside `middlewares/`).
//! Content is never inspected.

use std::fmt;
use std::path::Path;

/// Folder whose whole subtree is served as static assets.
pub const PUBLIC_DIR: &str = "public";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileClassification {
    Middleware,
    Listener,
    Consumer,
    CronJob,
    Route,
    StaticFolder,
    Ignored,
}

/// (folder, role suffix, classification), checked in priority order.
const CONVENTIONS: [(&str, &str, FileClassification); 5] = [
    ("middlewares", "middleware", FileClassification::Middleware),
    ("listeners", "listener", FileClassification::Listener),
    ("consumers", "consumer", FileClassification::Consumer),
    ("crons", "cron", FileClassification::CronJob),
    ("routes", "router", FileClassification::Route),
];

impl FileClassification {
    /// Folder name that carries this role, if it is file-based.
    pub fn folder(self) -> Option<&'static str> {
        CONVENTIONS
            .iter()
            .find(|(_, _, c)| *c == self)
            .map(|(folder, _, _)| *folder)
    }

    /// Role suffix (without dots), if it is file-based.
    pub fn suffix(self) -> Option<&'static str> {
        CONVENTIONS
            .iter()
            .find(|(_, _, c)| *c == self)
            .map(|(_, suffix, _)| *suffix)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileClassification::Middleware => "middleware",
            FileClassification::Listener => "listener",
            FileClassification::Consumer => "consumer",
            FileClassification::CronJob => "cron",
            FileClassification::Route => "route",
            FileClassification::StaticFolder => "static",
            FileClassification::Ignored => "ignored",
        }
    }
}

impl fmt::Display for FileClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the walker should do with a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Walk into the directory.
    Descend,
    Unit(FileClassification),
}

pub fn classify_entry(name: &str, parent: &str, is_dir: bool) -> EntryKind {
    if is_dir {
        if name == PUBLIC_DIR {
            EntryKind::Unit(FileClassification::StaticFolder)
        } else {
            EntryKind::Descend
        }
    } else {
        EntryKind::Unit(classify_file(name, parent))
    }
}

pub fn classify_file(name: &str, parent: &str) -> FileClassification {
    CONVENTIONS
        .iter()
        .find(|(folder, suffix, _)| *folder == parent && split_role(name, suffix).is_some())
        .map(|(_, _, class)| *class)
        .unwrap_or(FileClassification::Ignored)
}

/// Split `stem.<role>.<ext>` and return `stem`.
///
/// Both the stem and the extension must be non-empty; the last occurrence
/// of `.<role>.` wins.
pub fn split_role<'a>(name: &'a str, role: &str) -> Option<&'a str> {
    let marker = format!(".{role}.");
    let idx = name.rfind(&marker)?;
    let stem = &name[..idx];
    let ext = &name[idx + marker.len()..];
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(stem)
}

/// Stem of a unit file, e.g. `users.v2` for `routes/users.v2.router.yaml`.
pub fn split_role_stem(path: &Path, classification: FileClassification) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    split_role(name, classification.suffix()?)
}
