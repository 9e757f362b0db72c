//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod fake_api;
pub mod telemetry;
