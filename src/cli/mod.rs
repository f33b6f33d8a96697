//! CLI module for conntrace - command-line interface and console output.
//!
//! Provides the argument parser plus the console reporter used by `capture` and the
//! timeline renderer used by `show`.

pub mod commands;
pub mod report;
pub mod show;

pub use commands::Cli;
