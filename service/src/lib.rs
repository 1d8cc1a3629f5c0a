//! Runtime wiring for the Rollcall registration engine.
//!
//! The library half holds configuration so it can be unit tested; the
//! `rollcall-sweeper` binary connects the engine to `PostgreSQL` and drives
//! offer expiry and no-show marking on a fixed interval.

pub mod config;

pub use config::{Config, ConfigError};
