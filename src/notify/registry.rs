use std::collections::HashMap;
use std::sync::Arc;

use super::NotificationChannel;
use super::discord::DiscordChannel;
use super::webhook::WebhookChannel;

/// Available channel implementations, keyed by their type name.
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    /// An empty registry without the built-in channels.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels
            .insert(channel.channel_type().to_string(), channel);
    }

    pub fn get(&self, channel_type: &str) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.get(channel_type).cloned()
    }

    pub fn has_channel(&self, channel_type: &str) -> bool {
        self.channels.contains_key(channel_type)
    }

    pub fn channel_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DiscordChannel::new()));
        registry.register(Arc::new(WebhookChannel::new()));
        registry
    }
}
