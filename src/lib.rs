//! quiesce library
//!
//! Exposes the CLI and layered configuration for integration testing

pub mod cli;
pub mod config;
