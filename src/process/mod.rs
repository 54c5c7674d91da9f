pub mod command;
pub mod reader;
pub mod types;

pub use command::{Command, CommandBuilder};
pub use reader::LineBuffer;
pub use types::{CommandOutput, DEFAULT_GRACE_PERIOD, LineCallback, StreamKind};
