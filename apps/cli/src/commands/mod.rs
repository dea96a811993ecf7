//! Command implementations for the tuneforge CLI.

pub mod dataset;
pub mod estimate;
pub mod run_spec;
pub mod train;
