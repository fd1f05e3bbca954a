//! Subcommand implementations.

pub mod config;
pub mod demo;
pub mod scan;
