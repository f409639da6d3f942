//! Subcommand handlers.

pub mod run;
pub mod setup;
pub mod status;
