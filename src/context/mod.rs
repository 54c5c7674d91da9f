pub mod test_context;
pub mod types;

// Re-export commonly used types
pub use test_context::TestContext;
pub use types::{Artifact, LogLevel, LogRecord, LogSink, TestAttributes};
