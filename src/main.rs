use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serenity::Client;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use commonbase_bot::config::Config;
use commonbase_bot::db;
use commonbase_bot::gateway::{self, Bot};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(database = %config.database_url, "Starting Commonbase bot");

    let conn = Connection::open(&config.database_url)
        .with_context(|| format!("Failed to open database at {}", config.database_url))?;
    db::init_schema(&conn)?;
    let db = Arc::new(Mutex::new(conn));

    let mut client = Client::builder(&config.discord_token, gateway::intents())
        .event_handler(Bot::new(db, config.clone()))
        .await
        .context("Failed to create Discord client")?;

    client.start().await.context("Discord client error")?;

    Ok(())
}
