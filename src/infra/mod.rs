//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod http;
pub mod resolver;
pub mod store;
pub mod telemetry;
