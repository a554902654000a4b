//! Telegram Bot API plumbing: long polling in, `sendMessage` and
//! `forwardMessage` out.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use enigma_bot::{BotError, BotResult, Dispatcher, Incoming, Profile, Transport};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org/bot";

/// Thin client for the handful of Bot API methods the bot needs.
pub struct TelegramApi {
    http: reqwest::Client,
    base: String,
}

impl TelegramApi {
    /// `poll_timeout` is the long-polling timeout; HTTP requests are allowed
    /// a little longer than that.
    pub fn new(token: &str, poll_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base: format!("{TELEGRAM_API_BASE}{token}"),
        })
    }

    /// Call `method` and return its `result`, failing on `"ok": false`.
    async fn call(&self, method: &str, body: Value) -> BotResult<Value> {
        let response: Value = self
            .http
            .post(format!("{}/{method}", self.base))
            .json(&body)
            .send()
            .await
            .map_err(|e| BotError::Transport(format!("{method}: {e}")))?
            .json()
            .await
            .map_err(|e| BotError::Transport(format!("{method}: invalid response: {e}")))?;

        if response.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let code = response
                .get("error_code")
                .and_then(|v| v.as_i64())
                .unwrap_or(-1);
            let description = response
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(BotError::Transport(format!(
                "{method}: Telegram API error (code {code}): {description}"
            )));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Verify the token; returns the bot's username.
    pub async fn get_me(&self) -> Result<String> {
        let me = self
            .call("getMe", json!({}))
            .await
            .context("Telegram getMe failed")?;
        Ok(me
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string())
    }

    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> BotResult<Vec<Value>> {
        let result = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": timeout_secs,
                    "allowed_updates": ["message"],
                }),
            )
            .await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Transport for TelegramApi {
    async fn send_text(&self, chat_id: i64, text: &str, rich: bool) -> BotResult<()> {
        if rich {
            let sent = self
                .call(
                    "sendMessage",
                    json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" }),
                )
                .await;
            match sent {
                Ok(_) => return Ok(()),
                // Sheet content is not escaped for Markdown; resend as plain text.
                Err(e) => warn!(chat_id, error = %e, "Markdown rejected, sending plain text"),
            }
        }
        self.call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await
            .map(|_| ())
    }

    async fn forward_message(
        &self,
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
    ) -> BotResult<()> {
        self.call(
            "forwardMessage",
            json!({
                "chat_id": to_chat_id,
                "from_chat_id": from_chat_id,
                "message_id": message_id,
            }),
        )
        .await
        .map(|_| ())
    }
}

/// Turn one update into an [`Incoming`] message.
///
/// Only text messages from human senders are kept.
pub fn parse_update(update: &Value) -> Option<Incoming> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(|v| v.as_str())?;
    if message.pointer("/from/is_bot").and_then(|v| v.as_bool()) == Some(true) {
        return None;
    }

    let optional = |pointer: &str| {
        message
            .pointer(pointer)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Some(Incoming {
        profile: Profile {
            platform_id: message.pointer("/from/id").and_then(|v| v.as_i64())?,
            first_name: optional("/from/first_name").unwrap_or_default(),
            last_name: optional("/from/last_name"),
            username: optional("/from/username"),
        },
        chat_id: message.pointer("/chat/id").and_then(|v| v.as_i64())?,
        message_id: message.get("message_id").and_then(|v| v.as_i64())?,
        text: text.to_string(),
    })
}

/// Long-poll Telegram forever, handing every message to `dispatcher`.
pub async fn poll(api: &TelegramApi, dispatcher: &Dispatcher, timeout_secs: u64) {
    let mut offset: i64 = 0;
    info!(timeout_secs, "polling Telegram for updates");

    loop {
        let updates = match api.get_updates(offset, timeout_secs).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Telegram poll failed, retrying...");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in &updates {
            if let Some(update_id) = update.get("update_id").and_then(|v| v.as_i64()) {
                offset = offset.max(update_id + 1);
            }
            match parse_update(update) {
                Some(incoming) => {
                    info!(
                        user_id = incoming.profile.platform_id,
                        chat_id = incoming.chat_id,
                        text = %incoming.text,
                        "incoming Telegram message"
                    );
                    dispatcher.submit(incoming);
                }
                None => debug!("skipping non-text update"),
            }
        }
    }
}
