//! Subcommands of the `jobwatch` binary.

pub mod config;
pub mod job;
pub mod store;
