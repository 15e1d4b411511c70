//! `reagent` crate (library surface).
//!
//! The primary entrypoint for end users is the `reagent` binary (interactive research loop
//! plus a few one-shot subcommands). The library re-exports core types and hosts the loop
//! itself so it can be driven without a terminal.

pub use reagent_core as core;

pub mod repl;
