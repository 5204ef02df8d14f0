//! Serializes tests that change process environment variables.

use std::env;
use std::path::Path;

static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

/// Run `f` with `HOME` set to `home` (unset for `None`), restoring it afterwards.
pub(crate) fn with_home<T>(home: Option<&Path>, f: impl FnOnce() -> T) -> T {
    with_env(&[("HOME", home.map(|h| h.to_string_lossy().into_owned()))], f)
}

/// Run `f` with `vars` applied, restoring previous values afterwards.
pub(crate) fn with_env<T>(vars: &[(&str, Option<String>)], f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK.lock();
    let saved: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var_os(k))).collect();
    for (key, value) in vars {
        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }
    let out = f();
    for (key, value) in saved {
        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }
    out
}
