//! # MountKit - Module Discovery and Versioned Route Mounting
//!
//! Builds one HTTP application out of many "modules": directory trees whose
//! files are recognized by naming convention alone.
//!
//! ## Features
//!
//! - **Convention-based**: `routes/*.router.*`, `middlewares/*.middleware.*`,
//!   `listeners/`, `consumers/`, `crons/` and `public/` folders
//! - **Local overrides**: a project patches an installed module by shadowing
//!   any file or folder under `modules/<name>/`
//! - **Phased loading**: every middleware is loaded before any route
//! - **Versioned routes**: `users.v2.router.yaml` mounts at `/v2/users`; a
//!   newer version falls back to the previous one for endpoints it lacks
//!
//! ## Layout on disk
//!
//! ```text
//! deps/mountkit-auth/dist/          installed module (compiled output preferred)
//!   middlewares/session.middleware.yaml
//!   routes/login.router.yaml
//! modules/mountkit-auth/routes/     override of the installed module's routes/
//! modules/billing/                  project-local module
//! src/                              project tree, walked last
//!   routes/users.router.yaml        → /users
//!   routes/users.v2.router.yaml     → /v2/users (falls back to /users)
//!   public/                         static assets
//! ```
//!
//! ## Booting
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mountkit::{Collaborators, DiscoveryConfig, HostRuntime, ManifestLoader};
//!
//! let boot = HostRuntime::new(
//!     DiscoveryConfig::for_project("/srv/app"),
//!     Arc::new(ManifestLoader::default()),
//!     Collaborators::default(),
//! )
//! .boot()
//! .await?;
//!
//! for route in &boot.report.mounted {
//!     println!("{} <- {}", route.mount_path, route.file_path.display());
//! }
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

pub mod contracts;
pub mod discovery;
pub mod error;
pub mod fs;
pub mod loader;
pub mod routes;
pub mod runtime;

pub use contracts::*;
pub use discovery::{
    discover, DiscoveredUnit, DiscoveryConfig, DiscoveryScan, FileClassification,
    ModuleDescriptor, ModuleRegistry, ModuleSource,
};
pub use error::{error_chain, BootError, LoadError, ScanError, UnitFailure};
pub use fs::{FileSystem, MemoryFs, RealFs};
pub use loader::{FnLoader, ManifestLoader, PhasedLoader};
pub use routes::{FallbackRule, MountedRoute, Version, VersionTable};
pub use runtime::{
    run, Boot, BootReport, Collaborators, HostRuntime, InProcessRegistry, LifecycleSignal,
    RunOptions, ShutdownOptions,
};
