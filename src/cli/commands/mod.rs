//! CLI command implementations

pub mod cleanup;
pub mod config;
pub mod contains;
pub mod get;
pub mod put;
pub mod stats;

pub use cleanup::execute as cleanup;
pub use config::execute as config;
pub use contains::execute as contains;
pub use get::execute as get;
pub use put::execute as put;
pub use stats::execute as stats;
