//! Versioned route table and mounting.

pub mod mount;
pub mod table;
pub mod version;

pub use mount::{serve_static, FallbackRule, MountOutcome, MountedRoute, RouteMounter};
pub use table::{RouteRegistration, VersionGroup, VersionTable};
pub use version::{split_version, Version};
