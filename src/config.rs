// ABOUTME: Configuration types for the dispatch core, deserialized by the embedding app.
// ABOUTME: Covers rate tables, reserved channels, queue sizing, group triggers, and media cleanup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bus::DEFAULT_BUS_CAPACITY;

/// Per-adapter worker queue capacity (text and media each).
pub const DEFAULT_WORKER_QUEUE_SIZE: usize = 16;

/// Outbound rate applied to adapters with no entry in the rate table.
pub const DEFAULT_RATE_PER_SEC: f64 = 10.0;

/// Top-level configuration for the channel dispatch core.
///
/// The embedding application loads this (TOML in practice) and hands it to
/// [`crate::manager::ChannelManager`]. Every field has a default so a bare
/// `[channels]` table works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Listen address for the shared HTTP server (webhooks + health).
    /// `None` disables the server.
    #[serde(default)]
    pub http_addr: Option<String>,

    /// Channel names reserved for internal use. Outbound messages addressed
    /// to them are silently discarded by the dispatchers.
    #[serde(default)]
    pub internal_channels: Vec<String>,

    /// Outbound messages per second, per adapter name. Adapters missing from
    /// the table use a built-in default.
    #[serde(default)]
    pub rates: HashMap<String, f64>,

    /// Raw per-adapter configuration blobs, keyed by adapter name. The core
    /// passes each blob opaquely to the matching factory.
    #[serde(default)]
    pub adapters: HashMap<String, serde_json::Value>,

    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    #[serde(default = "default_worker_queue_size")]
    pub worker_queue_size: usize,
}

fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}

fn default_worker_queue_size() -> usize {
    DEFAULT_WORKER_QUEUE_SIZE
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            http_addr: None,
            internal_channels: Vec::new(),
            rates: HashMap::new(),
            adapters: HashMap::new(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            worker_queue_size: DEFAULT_WORKER_QUEUE_SIZE,
        }
    }
}

impl ChannelsConfig {
    /// Resolve the outbound rate for an adapter, falling back to the built-in
    /// per-platform defaults and then to [`DEFAULT_RATE_PER_SEC`].
    pub fn rate_for(&self, adapter: &str) -> f64 {
        if let Some(rate) = self.rates.get(adapter) {
            if *rate > 0.0 {
                return *rate;
            }
        }
        match adapter {
            "telegram" => 20.0,
            "discord" => 1.0,
            "slack" => 1.0,
            "line" => 10.0,
            _ => DEFAULT_RATE_PER_SEC,
        }
    }

    pub fn is_internal_channel(&self, name: &str) -> bool {
        self.internal_channels.iter().any(|c| c == name)
    }
}

/// Policy deciding whether a group-chat message should elicit a response.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroupTriggerConfig {
    /// Respond only when the bot is mentioned.
    #[serde(default)]
    pub mention_only: bool,

    /// Respond when the message starts with one of these prefixes; the
    /// matched prefix is stripped before publishing.
    #[serde(default)]
    pub prefixes: Vec<String>,
}

/// Settings for the media store's background TTL cleaner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaCleanerConfig {
    #[serde(default = "default_media_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_media_interval_secs")]
    pub interval_secs: u64,
}

fn default_media_ttl_secs() -> u64 {
    30 * 60
}

fn default_media_interval_secs() -> u64 {
    5 * 60
}

impl Default for MediaCleanerConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_media_ttl_secs(),
            interval_secs: default_media_interval_secs(),
        }
    }
}
