//! CLI command implementations

pub mod complete;
pub mod models;
pub mod telemetry;
pub mod tools;
