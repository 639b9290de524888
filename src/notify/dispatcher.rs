use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, instrument};

use super::{ChannelRegistry, NotificationChannel, NotificationMessage};
use crate::config::{ChannelConfig, ConfigError};

/// Aggregate of the channels that failed to deliver one message.
#[derive(Debug, thiserror::Error)]
#[error("{} of {attempted} channel(s) failed: {}", .failures.len(), .failures.join("; "))]
pub struct DispatchError {
    pub attempted: usize,
    pub failures: Vec<String>,
}

struct ConfiguredChannel {
    config: ChannelConfig,
    channel: Arc<dyn NotificationChannel>,
}

/// Sends messages to every configured channel.
///
/// A failing channel never keeps the others from being attempted.
pub struct Dispatcher {
    channels: Vec<ConfiguredChannel>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self
            .channels
            .iter()
            .map(|configured| configured.config.id.as_str())
            .collect();
        f.debug_struct("Dispatcher").field("channels", &ids).finish()
    }
}

impl Dispatcher {
    /// Bind channel configurations to their implementation and validate them.
    pub fn new(registry: &ChannelRegistry, configs: &[ChannelConfig]) -> Result<Self, ConfigError> {
        let channels = configs
            .iter()
            .map(|config| -> Result<ConfiguredChannel, ConfigError> {
                let channel = registry.get(&config.channel_type).ok_or_else(|| {
                    ConfigError::UnknownChannel {
                        id: config.id.clone(),
                        channel_type: config.channel_type.clone(),
                    }
                })?;

                channel
                    .validate(&config.data)
                    .map_err(|e| ConfigError::InvalidChannel {
                        id: config.id.clone(),
                        reason: e.to_string(),
                    })?;

                Ok(ConfiguredChannel {
                    config: config.clone(),
                    channel,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { channels })
    }

    /// A dispatcher without channels.
    pub fn empty() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[instrument(skip_all, fields(event = message.event.name()))]
    pub async fn dispatch(&self, message: &NotificationMessage) -> Result<(), DispatchError> {
        let sends = self.channels.iter().map(|configured| async move {
            configured
                .channel
                .send(&configured.config.data, message)
                .await
                .map_err(|e| {
                    format!(
                        "Failed to send message using {} (id: {}): {e}",
                        configured.config.channel_type, configured.config.id
                    )
                })
        });

        let failures: Vec<String> = join_all(sends)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if failures.is_empty() {
            debug!("sent {} message to {} channel(s)", message.event.name(), self.len());
            return Ok(());
        }

        for failure in &failures {
            error!("{failure}");
        }

        Err(DispatchError {
            attempted: self.len(),
            failures,
        })
    }
}
