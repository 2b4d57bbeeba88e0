//! Command-line entry points.

pub mod config;
pub mod extract;
pub mod open;
