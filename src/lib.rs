//! Weather comparer: monthly climate statistics for any named city.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod cache;
pub mod config;
pub mod data;
pub mod engine;
pub mod rate_limit;
pub mod types;
