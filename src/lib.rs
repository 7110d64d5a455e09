//! Steward - an agentic command loop for infrastructure tasks
//!
//! This library drives an LLM chat session toward operator-issued tasks,
//! interleaving model turns with tool invocations, approval gates and
//! durable session history.

pub mod adapters;
pub mod agent;
pub mod config;
pub mod error;
pub mod journal;
pub mod sessions;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
