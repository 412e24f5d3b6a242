//! Violation findings and their storage.

mod model;
mod store;

pub use model::{Finding, FindingId, FindingStatus};
pub use store::{MemoryViolationStore, SqliteViolationStore, ViolationStore};
