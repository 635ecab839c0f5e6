//! The hpctest command line tool.
//!
//! Runs commands on the configured batch manager, either in the foreground
//! or as background jobs that are polled until they finish.

pub mod commands;
pub mod config;
