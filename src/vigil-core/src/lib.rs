//! Vigil Core Library
//!
//! Configuration, logging and the scan loop tying discovery, capture,
//! detection and alarms together.

pub mod colored_logger;
pub mod config;
pub mod cooldown;
pub mod pipeline;
pub mod scanner;
pub mod snapshot;
