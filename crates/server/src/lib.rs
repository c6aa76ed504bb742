pub mod api;
pub mod config;
pub mod consumers;
pub mod error;
pub mod telemetry;
