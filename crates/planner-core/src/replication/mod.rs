//! Checkpoint-based replication handlers
//!
//! Both handlers run per collection and per authenticated owner. Pull is
//! read-only; push owns its write transaction.

mod pull;
mod push;

pub use pull::pull;
pub use push::push;
