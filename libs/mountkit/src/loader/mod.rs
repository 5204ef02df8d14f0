//! Unit loading: the two phases and the shipped manifest loader.

pub mod manifest;
pub mod phased;

pub use manifest::{FnLoader, ManifestLoader};
pub use phased::{
    ContentSealed, MiddlewareChain, MiddlewareSealed, MountedApp, PhasedLoader, Registration,
};
