//! Environment-driven configuration, loaded once at startup.

use anyhow::{Context, Result};
use std::env;

pub const DEFAULT_BOOKSHELF_URL: &str = "http://localhost:3000";
pub const DEFAULT_GRAPH_URL: &str = "http://localhost:3001";

/// Runtime configuration for the bot
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token
    pub discord_token: String,
    /// Path to the SQLite database file
    pub database_url: String,
    /// External bookshelf site, substituted into replies
    pub bookshelf_url: String,
    /// External graph visualization, substituted into replies
    pub graph_url: String,
}

impl Config {
    /// Assemble configuration from the environment. `DISCORD_TOKEN` and
    /// `DATABASE_URL` are required; the external URLs fall back to local
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let discord_token =
            env::var("DISCORD_TOKEN").context("DISCORD_TOKEN must be set")?;
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bookshelf_url =
            env::var("BOOKSHELF_URL").unwrap_or_else(|_| DEFAULT_BOOKSHELF_URL.to_string());
        let graph_url = env::var("GRAPH_URL").unwrap_or_else(|_| DEFAULT_GRAPH_URL.to_string());

        Ok(Self {
            discord_token,
            database_url,
            bookshelf_url,
            graph_url,
        })
    }
}
