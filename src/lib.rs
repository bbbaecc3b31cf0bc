//! safe-exec daemon library
//!
//! This crate provides the core functionality for the safe-exec daemon:
//! - Static screening of submitted Python scripts
//! - Generation of the wrapped unit that reports `main()`'s outcome as JSON
//! - Backend trait with an nsjail strategy and a restricted fallback
//! - The coordinator that drives validation, execution and escalation
//! - HTTP and MCP surfaces that expose the pipeline to callers

pub mod availability;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod mcp;
pub mod outcome;
pub mod request;
pub mod validator;
pub mod workspace;
pub mod wrapper;

#[cfg(test)]
pub(crate) mod test_support;
