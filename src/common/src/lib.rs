pub mod cli;
pub mod config;
pub mod shutdown;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Configuration;
pub use storage::StagingContext;
