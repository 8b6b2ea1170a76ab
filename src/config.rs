use crate::gameplay_filter::{DEFAULT_BOT_MARKER, DEFAULT_WORLD_ACTOR};
use crate::live_tail::{DEFAULT_LIVE_CAPACITY, DEFAULT_RECONNECT_DELAY};
use crate::query::DEFAULT_CLASSIFY_BATCH_SIZE;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3001;

#[derive(Debug, Clone)]
pub struct Config {
    // Batch log store
    pub log_source_url: String,

    // Live console feed (optional)
    pub live_feed_url: Option<String>,
    pub live_buffer_capacity: usize,
    pub live_reconnect_delay: Duration,

    // Classification
    pub classify_batch_size: usize,
    pub bot_marker: String,
    pub world_actor: String,

    // HTTP surface
    pub bind_port: u16,
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            log_source_url: env::var("LOG_SOURCE_URL")
                .context("LOG_SOURCE_URL environment variable is required")?,

            live_feed_url: env::var("LIVE_FEED_URL").ok().filter(|url| !url.is_empty()),

            live_buffer_capacity: parsed_or("LIVE_BUFFER_CAPACITY", DEFAULT_LIVE_CAPACITY)?.max(1),

            live_reconnect_delay: Duration::from_secs(parsed_or(
                "LIVE_RECONNECT_SECS",
                DEFAULT_RECONNECT_DELAY.as_secs(),
            )?),

            classify_batch_size: parsed_or("CLASSIFY_BATCH_SIZE", DEFAULT_CLASSIFY_BATCH_SIZE)?
                .max(1),

            bot_marker: env::var("BOT_MARKER").unwrap_or_else(|_| DEFAULT_BOT_MARKER.to_string()),

            world_actor: env::var("WORLD_ACTOR")
                .unwrap_or_else(|_| DEFAULT_WORLD_ACTOR.to_string()),

            bind_port: parsed_or("BIND_PORT", DEFAULT_PORT)?,
        })
    }

    pub fn log_config(&self) {
        tracing::info!("📋 Configuration:");
        tracing::info!("   Log Source URL: {}", self.log_source_url);
        match self.live_feed_url {
            Some(ref url) => tracing::info!("   Live Feed URL: {}", url),
            None => tracing::info!("   Live Feed URL: (disabled)"),
        }
        tracing::info!("   Live Buffer Capacity: {}", self.live_buffer_capacity);
        tracing::info!("   Live Reconnect Delay: {:?}", self.live_reconnect_delay);
        tracing::info!("   Classify Batch Size: {}", self.classify_batch_size);
        tracing::info!("   Bot Marker: {}", self.bot_marker);
        tracing::info!("   World Actor: {}", self.world_actor);
        tracing::info!("   Bind Port: {}", self.bind_port);
    }
}
