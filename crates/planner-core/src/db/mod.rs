//! Database layer for the planner

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::{is_identity_violation, ReplicationStore, SqliteReplicationStore};
