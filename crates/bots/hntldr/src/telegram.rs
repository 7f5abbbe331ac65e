//! Telegram Bot API client used as [`Publisher`] and [`NotifySink`].

use std::time::Duration;

use hntldr_db::MessageRef;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use snafu::{OptionExt as _, ResultExt as _};
use tracing::debug;

use crate::notifier::NotifySink;
use crate::publisher::{
    ApiSnafu, DisplayContent, EditOutcome, HttpSnafu, NoChannelSnafu, PublishError,
    PublishResult, Publisher, RateLimitedSnafu,
};
use crate::render::render_message;

const LOG_TARGET: &str = "hntldr::telegram";

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Benign edit failure: the new text and markup equal the current ones
pub fn is_not_modified(err: &PublishError) -> bool {
    matches!(
        err,
        PublishError::Api { description, .. }
            if description.to_lowercase().contains("message is not modified")
    )
}

pub struct TelegramBot {
    client: Client,
    api_base: String,
    channel_id: Option<String>,
}

impl TelegramBot {
    pub fn new(
        token: &str,
        channel_id: Option<String>,
        request_timeout: Duration,
    ) -> PublishResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context(HttpSnafu)?;
        Ok(Self {
            client,
            api_base: format!("{TELEGRAM_API_BASE}/bot{token}"),
            channel_id,
        })
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> PublishResult<T> {
        // Request urls embed the token; keep it out of errors and logs
        let resp = self
            .client
            .post(format!("{}/{method}", self.api_base))
            .json(body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context(HttpSnafu)?;
        let status = resp.status().as_u16();
        let api: ApiResponse<T> = resp
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context(HttpSnafu)?;

        if api.ok {
            return api.result.context(ApiSnafu {
                status,
                description: format!("{method} returned no result"),
            });
        }

        if let Some(retry_after) = api.parameters.and_then(|p| p.retry_after) {
            return RateLimitedSnafu {
                retry_after: Duration::from_secs(retry_after),
            }
            .fail();
        }

        ApiSnafu {
            status: api.error_code.unwrap_or(status),
            description: api.description.unwrap_or_default(),
        }
        .fail()
    }

    pub async fn send_html(
        &self,
        chat_id: &str,
        text: &str,
        reply_markup: Option<serde_json::Value>,
    ) -> PublishResult<i64> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id)
    }
}

#[async_trait::async_trait]
impl Publisher for TelegramBot {
    async fn publish(
        &self,
        content: &DisplayContent,
        score: u32,
        comment_count: u32,
    ) -> PublishResult<MessageRef> {
        let chat_id = self.channel_id.clone().context(NoChannelSnafu)?;
        let msg = render_message(content, score, comment_count);

        let message_id = self
            .send_html(&chat_id, &msg.text, Some(msg.reply_markup()))
            .await?;
        debug!(target: LOG_TARGET, item_id = %content.item_id, %chat_id, message_id, "Sent message");
        Ok(MessageRef {
            chat_id,
            message_id,
        })
    }

    async fn edit(
        &self,
        message: &MessageRef,
        content: &DisplayContent,
        score: u32,
        comment_count: u32,
    ) -> PublishResult<EditOutcome> {
        let msg = render_message(content, score, comment_count);
        let body = json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "text": msg.text,
            "parse_mode": "HTML",
            "reply_markup": msg.reply_markup(),
        });

        // Result is the edited message or `true`
        match self.call::<serde_json::Value>("editMessageText", &body).await {
            Ok(_) => Ok(EditOutcome::Edited),
            Err(err) if is_not_modified(&err) => Ok(EditOutcome::Unchanged),
            Err(err) => Err(err),
        }
    }
}

#[async_trait::async_trait]
impl NotifySink for TelegramBot {
    async fn send_direct(&self, user_id: i64, html: &str) -> PublishResult<()> {
        self.send_html(&user_id.to_string(), html, None).await?;
        Ok(())
    }
}
