//! # TansuDB HTTP API
//!
//! Thin JSON façade over [`tansu_storage::Database`]. All of the engineering
//! lives below this layer; handlers validate, delegate, and map errors to
//! status codes.

pub mod server;

pub use server::{create_router, serve, AppState};
