//! Adapters module - caller integrations.
//!
//! An adapter is anything that sits on the caller side of an
//! [`AgentHandle`](crate::agent::AgentHandle): it reads the output queue
//! and writes the input queue, and never touches agent state directly.
//!
//! # Supported Adapters
//!
//! - **CLI** - interactive terminal REPL and single-query runs

pub mod cli;

pub use cli::CliChannel;
