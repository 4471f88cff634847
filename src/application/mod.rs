//! Application layer: pipeline orchestration and use cases over the cache.

pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod repos;
pub mod runner;
pub mod service;
pub mod table;
