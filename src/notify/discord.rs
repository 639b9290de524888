use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use super::{NotificationChannel, NotificationEvent, NotificationMessage, NotifyError, required_url};

const RED: u32 = 15158332;
const GREEN: u32 = 3066993;
const LIGHT_BLUE: u32 = 5793266;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

impl EmbedField {
    fn inline(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            inline: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Posts embeds to a Discord webhook.
///
/// Channel data: `{ "url": "...", "user_id": "..." }`, where the optional
/// user is mentioned on incidents and recoveries.
pub struct DiscordChannel {
    client: Client,
}

impl Default for DiscordChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscordChannel {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn build_embed(message: &NotificationMessage) -> Embed {
        let (title, color) = match &message.event {
            NotificationEvent::Incident { .. } => ("🔴 Incident", RED),
            NotificationEvent::Recovery { .. } => ("✅ Recovered", GREEN),
            NotificationEvent::Start { .. } => ("▶️ Monitoring started", LIGHT_BLUE),
            NotificationEvent::Termination { .. } => ("⏹️ Monitoring stopped", LIGHT_BLUE),
            NotificationEvent::StatusUpdate { .. } => ("📊 Status update", LIGHT_BLUE),
        };

        let fields = match &message.event {
            NotificationEvent::Incident { alert, started_at } => vec![
                EmbedField::inline("Probe", &alert.probe_name),
                EmbedField::inline("Alert", &alert.alert_query),
                EmbedField::inline("Status", alert.status),
                EmbedField::inline("Response time", format!("{} ms", alert.response_time_ms)),
                EmbedField::inline("URL", &alert.url),
                EmbedField::inline("Since", started_at.to_rfc3339()),
            ],
            NotificationEvent::Recovery {
                alert,
                started_at,
                recovered_at,
            } => {
                let downtime = (*recovered_at - *started_at).num_seconds().max(0);
                vec![
                    EmbedField::inline("Probe", &alert.probe_name),
                    EmbedField::inline("Alert", &alert.alert_query),
                    EmbedField::inline("URL", &alert.url),
                    EmbedField::inline("Downtime", format!("{downtime} s")),
                ]
            }
            NotificationEvent::Start { probe_count } | NotificationEvent::Termination { probe_count } => {
                vec![EmbedField::inline("Probes", probe_count)]
            }
            NotificationEvent::StatusUpdate {
                probe_count,
                open_incidents,
            } => vec![
                EmbedField::inline("Probes", probe_count),
                EmbedField::inline("Open incidents", open_incidents),
            ],
        };

        Embed {
            title: Some(title.to_string()),
            description: Some(message.summary.clone()),
            color: Some(color),
            fields,
            footer: Some(EmbedFooter {
                text: format!("{} | v{}", message.meta.hostname, message.meta.agent_version),
            }),
            timestamp: Some(message.meta.timestamp.to_rfc3339()),
        }
    }

    pub fn build_message(data: &Value, message: &NotificationMessage) -> Message {
        let mut builder = MessageBuilder::new().add_embed(Self::build_embed(message));

        if let (Some(user_id), Some(alert)) =
            (data.get("user_id").and_then(Value::as_str), message.event.alert())
        {
            builder = builder.content(format!("{} <@{user_id}>", alert.probe_name));
        }

        builder.build()
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn channel_type(&self) -> &str {
        "discord"
    }

    fn validate(&self, data: &Value) -> Result<(), NotifyError> {
        required_url(data)?;
        Ok(())
    }

    #[instrument(skip_all, fields(event = message.event.name()))]
    async fn send(&self, data: &Value, message: &NotificationMessage) -> Result<(), NotifyError> {
        let url = required_url(data)?;
        let payload = Self::build_message(data, message);

        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                service: "discord",
                status,
                body,
            });
        }

        info!("Successfully sent Discord message");
        Ok(())
    }
}
