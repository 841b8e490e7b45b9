//! redgreen library - watch a test file and let a language model patch the
//! implementation until the tests pass
//!
//! This library provides the core functionality for the `redgreen` CLI tool.

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod prompt;
pub mod provider;
pub mod runner;
pub mod sequence;
pub mod state;
pub mod streaming;
pub mod vcs;
pub mod watch;

pub use error::{Error, Result};
