//! Async services wrapping the synchronous storage layer

mod database;

pub use database::DatabaseService;
