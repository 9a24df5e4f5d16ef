//! Parlor monitor CLI library.
//!
//! Wires the core engine to its measurement sources and the terminal.

mod cli;
pub mod commands;
mod config;
pub mod control;
pub mod push;
pub mod render;
pub mod runner;

pub use cli::{Cli, Commands, SourceKind};
pub use config::Config;
