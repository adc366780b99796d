//! Data models for planner replication

mod checkpoint;
mod replication;
mod stored_row;

pub use checkpoint::Checkpoint;
pub use replication::{PullResponse, PushRow, DEFAULT_PULL_BATCH_SIZE};
pub use stored_row::StoredRow;

/// Document shape exchanged with clients: identity, payload fields and the
/// `deleted` flag, never owner or change time.
pub type WireDocument = serde_json::Map<String, serde_json::Value>;
