//! buildstash - local build cache
//!
//! Stores build outputs under content fingerprints so repeated builds can
//! skip work, with a cache root safely shared between concurrent processes.

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;

pub use error::{StashError, StashResult};
