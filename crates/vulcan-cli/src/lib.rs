//! vulcan CLI library
//!
//! Exposes the CLI entry point so the binary stays a one-liner.

mod cli;

pub use cli::run;
