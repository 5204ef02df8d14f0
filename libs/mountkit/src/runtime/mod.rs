mod collaborators;
mod host_runtime;
mod runner;
mod shutdown;

pub use collaborators::{Collaborators, InProcessRegistry, LifecycleSignal, NoDocs};
pub use host_runtime::{Boot, BootReport, HostRuntime};
pub use runner::{run, RunOptions, ShutdownOptions};
pub use shutdown::wait_for_shutdown;
