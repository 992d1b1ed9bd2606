//! vesselcast library
//!
//! Forecast decision and prediction engine for a moving vessel, plus the CLI,
//! configuration and host glue around it. Exposed as a library for the binary
//! and for integration tests.

pub mod cli;
pub mod commands;
pub mod config;
pub mod data;
pub mod forecast;
pub mod logging;
pub mod refresh;
