//! Domain layer types and invariants.

pub mod dataset;
pub mod error;
pub mod keys;
pub mod registry;
pub mod session;
pub mod types;
pub mod uploads;
