//! telemetry-server: a delimiter-framed TCP telemetry service
//!
//! The server accepts connections, frames delimiter-terminated text
//! requests, and answers each one before reading the next:
//! - ECHO, INFO, QUIT
//! - TELEMETRYDATA: synthetic (temperature, humidity) sample, persisted
//! - METRICKS: shared traffic counters
//! - STATISTICS, PREDICT, VISUALIZE: batch analytics over stored samples
//! - LIST, CD: per-session directory browsing
//!
//! The client engine sends user-entered lines over one connection and
//! prints each framed response.

pub mod analytics;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod telemetry;
