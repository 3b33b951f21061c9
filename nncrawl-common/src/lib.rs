//! # nncrawl Common Library
//!
//! Shared code for the nncrawl crawler:
//! - Error and result types
//! - TOML bootstrap configuration and config-file resolution
//! - SQLite pool initialization and schema
//! - Row models shared between repositories
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
