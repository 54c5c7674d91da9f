pub mod discovery;
pub mod executor;
pub mod loader;
pub mod outcome;
pub mod report;
pub mod reporter;
mod steps;
pub mod types;

pub use discovery::{TestLoader, discover_test_files, is_test_file};
pub use executor::{ContextFactory, RunOptions, TestRunner, extra_args, run_tests};
pub use loader::TomlLoader;
pub use outcome::{FailureDetail, TestOutcome, TestReturn, TestSignal, guarded};
pub use report::RunReport;
pub use reporter::TestReporter;
pub use types::{
    AsyncFn, LocalBoxFuture, TestBody, TestId, TestResult, TestStatus, TestSummary, TestUnit,
};
