//! Command-line client for confwire sources.

pub mod cli;
pub mod commands;
