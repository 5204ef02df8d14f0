//! Route versions: token extraction, ordering and mount paths.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Trailing version token: optional `v`, digits, optional `.digits` groups,
/// separated from the base by `.`, `-` or `_` (or forming the whole stem).
/// The longest token wins: `api.1.2` is `api` at `1.2`.
static VERSION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<base>.+?)[._-])??v?(?P<ver>\d+(?:\.\d+)*)$")
        .expect("version token pattern is valid")
});

/// Revision of a route family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// File name carries no version token.
    Default,
    /// The literal token, without the `v` prefix (`2`, `1.10`).
    Numbered(String),
}

impl Version {
    pub fn is_default(&self) -> bool {
        matches!(self, Version::Default)
    }

    /// Numeric segments; non-numeric segments compare as zero.
    fn segments(token: &str) -> impl Iterator<Item = u64> + '_ {
        token.split('.').map(|s| s.parse::<u64>().unwrap_or(0))
    }

    /// Path under which this version of `base_path` is mounted.
    pub fn mount_path(&self, base_path: &str) -> String {
        match self {
            Version::Default => base_path.to_string(),
            Version::Numbered(v) if base_path == "/" => format!("/v{v}"),
            Version::Numbered(v) => format!("/v{v}{base_path}"),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Default => f.write_str("default"),
            Version::Numbered(v) => f.write_str(v),
        }
    }
}

impl Ord for Version {
    /// `Default` first, then numeric order segment by segment
    /// (`2 < 10`, `1.2 < 1.10`, `1 < 1.0`).
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Version::Default, Version::Default) => Ordering::Equal,
            (Version::Default, _) => Ordering::Less,
            (_, Version::Default) => Ordering::Greater,
            (Version::Numbered(a), Version::Numbered(b)) => Self::segments(a)
                .cmp(Self::segments(b))
                .then_with(|| a.cmp(b)),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split a route stem (file name without `.router.<ext>`) into its base path
/// and version.
///
/// ```
/// use mountkit::routes::{split_version, Version};
///
/// assert_eq!(split_version("users.v2"), ("/users".to_string(), Version::Numbered("2".into())));
/// assert_eq!(split_version("users"), ("/users".to_string(), Version::Default));
/// assert_eq!(split_version("v3"), ("/".to_string(), Version::Numbered("3".into())));
/// ```
pub fn split_version(stem: &str) -> (String, Version) {
    match VERSION_TOKEN.captures(stem) {
        Some(caps) => {
            let version = Version::Numbered(caps["ver"].to_string());
            let base = caps.name("base").map(|m| m.as_str()).unwrap_or("");
            (base_path(base), version)
        }
        None => (base_path(stem), Version::Default),
    }
}

fn base_path(base: &str) -> String {
    format!("/{}", base.trim_matches('/'))
}
