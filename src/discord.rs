//! Discord channel reader: forward paging for signal ingest plus single
//! message re-fetch for revocation and amendment checks.

use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const API_BASE: &str = "https://discord.com/api/v10";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RETRIES: usize = 3;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Api: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("RetriesExhausted")]
    RetriesExhausted,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EmbedField {
    pub name: Option<String>,
    pub value: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EmbedFooter {
    pub text: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
    pub footer: Option<EmbedFooter>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    pub timestamp: Option<String>,
}

impl ChatMessage {
    /// Signals arrive either as plain content or embedded; flatten every
    /// text-bearing part in reading order.
    pub fn extract_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.content.is_empty() {
            parts.push(&self.content);
        }
        for embed in &self.embeds {
            if let Some(title) = embed.title.as_deref() {
                parts.push(title);
            }
            if let Some(description) = embed.description.as_deref() {
                parts.push(description);
            }
            for field in &embed.fields {
                if let Some(name) = field.name.as_deref() {
                    parts.push(name);
                }
                if let Some(value) = field.value.as_deref() {
                    parts.push(value);
                }
            }
            if let Some(text) = embed.footer.as_ref().and_then(|f| f.text.as_deref()) {
                parts.push(text);
            }
        }
        parts.join("\n").trim().to_string()
    }

    /// Message creation time as UTC epoch seconds; zero if unparsable.
    pub fn timestamp_unix(&self) -> i64 {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0)
    }
}

/// Re-fetch of a known message, the only chat operation the engine itself
/// depends on.
#[allow(async_fn_in_trait)]
pub trait MessageSource {
    async fn fetch_message(&self, id: &str) -> Result<Option<ChatMessage>, ChatError>;
}

#[derive(Clone)]
pub struct DiscordClient {
    client: reqwest::Client,
    token: String,
    channel_id: String,
}

impl DiscordClient {
    pub fn new(token: &str, channel_id: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            token: token.to_string(),
            channel_id: channel_id.to_string(),
        }
    }

    async fn request(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<reqwest::Response, ChatError> {
        for attempt in 0..MAX_RETRIES {
            let result = self
                .client
                .get(url)
                .query(params)
                .header("Authorization", &self.token)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = resp
                        .json::<serde_json::Value>()
                        .await
                        .ok()
                        .and_then(|v| v.get("retry_after").and_then(|r| r.as_f64()))
                        .unwrap_or(5.0);
                    debug!(retry_after, "rate limited by chat API");
                    tokio::time::sleep(Duration::from_secs_f64(retry_after + 0.25)).await;
                }
                Ok(resp) => return Ok(resp),
                Err(error) if (error.is_timeout() || error.is_connect()) && attempt + 1 < MAX_RETRIES => {
                    debug!(?error, attempt, "retrying chat request");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(ChatError::RetriesExhausted)
    }

    /// Pages forward from `after_id` until a short page, returning messages
    /// in ascending id order.
    pub async fn fetch_after(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let url = format!("{API_BASE}/channels/{}/messages", self.channel_id);
        let limit = limit.clamp(1, 100);
        let mut after = after_id.map(|id| id.to_string());
        let mut collected: Vec<ChatMessage> = Vec::new();

        loop {
            let mut params = vec![("limit", limit.to_string())];
            if let Some(after) = &after {
                params.push(("after", after.clone()));
            }
            let resp = self.request(&url, &params).await?;
            if !resp.status().is_success() {
                return Err(ChatError::Api {
                    status: resp.status().as_u16(),
                    body: resp.text().await.unwrap_or_default(),
                });
            }
            let page: Vec<ChatMessage> = resp.json().await?;
            let page_len = page.len();
            let max_id = page
                .iter()
                .filter_map(|m| m.id.parse::<u64>().ok())
                .max();
            collected.extend(page);
            if page_len < limit {
                break;
            }
            match max_id {
                Some(max_id) => after = Some(max_id.to_string()),
                None => break,
            }
        }

        collected.sort_by_key(|m| m.id.parse::<u64>().unwrap_or(0));
        Ok(collected)
    }
}

impl MessageSource for DiscordClient {
    async fn fetch_message(&self, id: &str) -> Result<Option<ChatMessage>, ChatError> {
        let url = format!(
            "{API_BASE}/channels/{}/messages/{id}",
            self.channel_id
        );
        let resp = self.request(&url, &[]).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ChatError::Api {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(Some(resp.json().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_flattens_embeds_in_order() {
        let msg = ChatMessage {
            id: "1".to_string(),
            content: "header".to_string(),
            embeds: vec![Embed {
                title: Some("BARD SHORT Signal".to_string()),
                description: Some("Enter on Trigger: $0.92".to_string()),
                fields: vec![EmbedField {
                    name: Some("TP1".to_string()),
                    value: Some("$0.91".to_string()),
                }],
                footer: Some(EmbedFooter {
                    text: Some("AWAITING ENTRY".to_string()),
                }),
            }],
            timestamp: None,
        };
        assert_eq!(
            msg.extract_text(),
            "header\nBARD SHORT Signal\nEnter on Trigger: $0.92\nTP1\n$0.91\nAWAITING ENTRY"
        );
    }

    #[test]
    fn timestamp_parses_iso_with_offset_and_zulu() {
        let mut msg = ChatMessage {
            timestamp: Some("2025-12-12T15:12:34.123456+00:00".to_string()),
            ..Default::default()
        };
        assert_eq!(msg.timestamp_unix(), 1765552354);
        msg.timestamp = Some("2025-12-12T15:12:34Z".to_string());
        assert_eq!(msg.timestamp_unix(), 1765552354);
        msg.timestamp = None;
        assert_eq!(msg.timestamp_unix(), 0);
    }
}
