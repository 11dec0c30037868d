//! Configuration loading.
//!
//! Settings come from an optional TOML file layered under `OSTINATO_*`
//! environment variables, with a `.env` file honored for local development.
//! The file path defaults to `ostinato.toml` in the working directory and
//! can be overridden with `OSTINATO_CONFIG_PATH`.

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Connection string for the execution storage cluster.
    pub database_url: String,

    /// Maximum connections held by the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Config {
    /// Load and validate configuration. Called once before any command runs
    /// so configuration errors surface immediately.
    pub fn load() -> Result<Config> {
        dotenvy::dotenv().ok();

        let file = std::env::var("OSTINATO_CONFIG_PATH")
            .unwrap_or_else(|_| "ostinato.toml".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(config::Environment::with_prefix("OSTINATO"))
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration: OSTINATO_DATABASE_URL must be set")
    }
}
