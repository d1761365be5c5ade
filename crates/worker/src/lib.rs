//! Cron stand-in for the drip sequence service.
//!
//! Calls the API's tick endpoint on a fixed interval with the shared bearer
//! secret.

pub mod config;
pub mod trigger;
