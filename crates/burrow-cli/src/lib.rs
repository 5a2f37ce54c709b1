//! burrow CLI library
//!
//! Command implementations and output helpers behind the `burrow` binary.

pub mod commands;
pub mod output;
pub mod settings;
