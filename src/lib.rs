pub mod branch_token;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod serialization;
pub mod shard;
pub mod store;
pub mod teardown;
pub mod types;

// Re-export main types
pub use error::{Error, Result};
pub use types::*;
