use std::time::Duration;

use hntldr_db::MessageRef;
use snafu::Snafu;

/// Everything needed to render a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayContent {
    pub item_id: String,
    pub title: String,
    pub url: Option<String>,
    /// Cached at publish time and reused verbatim on every edit
    pub hook: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Edited,
    /// Provider says the rendered message is byte-identical
    Unchanged,
}

#[derive(Debug, Snafu)]
pub enum PublishError {
    #[snafu(display("Rate limited, retry after {retry_after:?}"))]
    RateLimited { retry_after: Duration },
    #[snafu(display("Request failed"))]
    Http { source: reqwest::Error },
    #[snafu(display("API error ({status}): {description}"))]
    Api { status: u16, description: String },
    #[snafu(display("No channel configured"))]
    NoChannel,
}

pub type PublishResult<T> = std::result::Result<T, PublishError>;

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        content: &DisplayContent,
        score: u32,
        comment_count: u32,
    ) -> PublishResult<MessageRef>;

    async fn edit(
        &self,
        message: &MessageRef,
        content: &DisplayContent,
        score: u32,
        comment_count: u32,
    ) -> PublishResult<EditOutcome>;
}
