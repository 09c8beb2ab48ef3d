//! Telegram Bot API notifier

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::Notifier;

/// Default Bot API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    /// Create a notifier from environment variables
    ///
    /// Expects:
    /// - `TELEGRAM_BOT_TOKEN`
    /// - `TELEGRAM_CHAT_ID`
    pub fn from_env() -> Result<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .context("TELEGRAM_BOT_TOKEN environment variable not set")?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .context("TELEGRAM_CHAT_ID environment variable not set")?;

        Self::new(bot_token, chat_id, DEFAULT_BASE_URL.to_string())
    }

    pub fn new(bot_token: String, chat_id: String, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            bot_token,
            chat_id,
        })
    }
}

/// Telegram's legacy Markdown uses single asterisks for bold
fn format_markdown(text: &str) -> String {
    text.replace("**", "*")
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, text: &str) -> Result<()> {
        let formatted = format_markdown(text);
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text: &formatted,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.base_url, self.bot_token))
            .json(&request)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let status = response.status();
        let body: SendMessageResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram response (status {})", status))?;

        if !body.ok {
            return Err(anyhow!(
                "Telegram rejected message: {}",
                body.description.unwrap_or_default()
            ));
        }

        debug!("Telegram message delivered");
        Ok(())
    }
}
