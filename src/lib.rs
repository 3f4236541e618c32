pub mod cancel;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod provision;
pub mod runner;
pub mod summary;

pub use cancel::CancellationToken;
pub use error::RunnerError;
pub use executor::TestExecutor;
pub use provision::{ToolHandle, ToolProvisioner};
pub use runner::{RunHandle, TestRunner};
pub use summary::TestSummary;
