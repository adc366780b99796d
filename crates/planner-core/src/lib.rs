//! planner-core - Core library for the course planner backend
//!
//! This crate contains the collection registry, the wire/storage codec, and
//! the checkpoint-based pull/push replication handlers used by the API.

pub mod codec;
pub mod collections;
pub mod conflict;
pub mod db;
pub mod error;
pub mod models;
pub mod replication;
pub mod services;

pub use collections::Collection;
pub use error::{Error, Result};
pub use models::{Checkpoint, PullResponse, PushRow, WireDocument};
