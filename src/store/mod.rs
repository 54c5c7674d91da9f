pub mod durations;
pub mod model;

pub use durations::{DurationStore, STORE_FILE};
pub use model::StoreFile;
