pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod logger;
pub mod parser;
pub mod process;
pub mod runner;
pub mod store;

// Re-export commonly used types
pub use context::{Artifact, LogLevel, TestAttributes, TestContext};
pub use error::{Result, RutestError};
pub use process::Command;
pub use runner::{RunOptions, TestRunner, TestSignal, run_tests};
