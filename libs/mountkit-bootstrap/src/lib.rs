pub mod config;
pub mod logging;
pub mod paths;

pub use config::*;
pub use logging::*;

#[cfg(test)]
mod test_env;
