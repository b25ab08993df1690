//! Slack `chat.postMessage` sink.

use async_trait::async_trait;
use common::config::SlackConfig;
use common::{body_excerpt, Error, NotificationSink};
use serde::Deserialize;
use tracing::{debug, info};

/// Envelope Slack wraps around every Web API reply.
#[derive(Debug, Deserialize)]
pub struct SlackResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

impl SlackResponse {
    /// Slack reports most failures as HTTP 200 with `ok: false`.
    pub fn into_result(self) -> Result<Option<String>, Error> {
        if self.ok {
            Ok(self.ts)
        } else {
            Err(Error::Notify(format!(
                "chat.postMessage rejected: {}",
                self.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlackClient {
    client: reqwest::Client,
    cfg: SlackConfig,
}

impl SlackClient {
    pub fn new(cfg: SlackConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("transient-alert/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build Slack HTTP client: {}", e)))?;

        Ok(Self { client, cfg })
    }

    pub async fn post_message(&self, text: &str) -> Result<Option<String>, Error> {
        let url = format!(
            "{}/chat.postMessage",
            self.cfg.api_url.trim_end_matches('/')
        );
        debug!("Posting {} bytes to Slack channel {}", text.len(), self.cfg.channel);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.cfg.bot_token)
            .form(&[
                ("channel", self.cfg.channel.as_str()),
                ("text", text),
                ("mrkdwn", "true"),
                ("parse", "none"),
            ])
            .send()
            .await
            .map_err(|e| Error::Notify(format!("Slack request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Notify(format!(
                "Slack returned {}: {}",
                status.as_u16(),
                body_excerpt(&body)
            )));
        }

        let parsed: SlackResponse = resp
            .json()
            .await
            .map_err(|e| Error::Notify(format!("Slack reply JSON: {}", e)))?;
        parsed.into_result()
    }
}

#[async_trait]
impl NotificationSink for SlackClient {
    async fn deliver(&self, text: &str) -> Result<(), Error> {
        if text.trim().is_empty() {
            debug!("Empty digest; nothing posted to Slack");
            return Ok(());
        }
        let ts = self.post_message(text).await?;
        info!(
            "Posted digest to Slack channel {} (ts={})",
            self.cfg.channel,
            ts.as_deref().unwrap_or("-")
        );
        Ok(())
    }
}
