//! Hacker News API client: ranked candidates, per-item details and metrics.

use std::time::Duration;

use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info};

use crate::article::ArticleExtractor;
use crate::error::FmtCompact as _;
use crate::topic::Topic;

const LOG_TARGET: &str = "hntldr::hn";

const HN_FIREBASE_BASE: &str = "https://hacker-news.firebaseio.com/v0";
const HN_ALGOLIA_BASE: &str = "https://hn.algolia.com/api/v1";

const DETAILS_BATCH_SIZE: usize = 10;
const DETAILS_BATCH_PAUSE: Duration = Duration::from_millis(200);

#[derive(Debug, Snafu)]
pub enum HnError {
    #[snafu(display("Failed to build HTTP client"))]
    ClientBuild { source: reqwest::Error },
    #[snafu(display("Request to {url} failed"))]
    Http { url: String, source: reqwest::Error },
    #[snafu(display("Request to {url} returned {status}"))]
    Status { url: String, status: StatusCode },
    #[snafu(display("Item {item_id} not found"))]
    NotFound { item_id: String },
    #[snafu(display("Not a Hacker News item link or id: {input}"))]
    InvalidItemRef { input: String },
}

pub type HnResult<T> = std::result::Result<T, HnError>;

/// An upstream item considered for publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub score: u32,
    pub comment_count: u32,
    /// Self-post text (Ask HN etc.), may contain HTML
    pub body_text: String,
    pub topic: Topic,
}

impl CandidateItem {
    pub fn metrics(&self) -> ItemMetrics {
        ItemMetrics {
            score: self.score,
            comment_count: self.comment_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemMetrics {
    pub score: u32,
    pub comment_count: u32,
}

#[async_trait::async_trait]
pub trait CandidateSource: Send + Sync {
    /// Up to `limit` items in upstream rank order. Every call re-ranks.
    async fn fetch_ranked(&self, limit: usize) -> HnResult<Vec<CandidateItem>>;
}

#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_item(&self, item_id: &str) -> HnResult<CandidateItem>;

    async fn fetch_metrics(&self, item_id: &str) -> HnResult<ItemMetrics> {
        Ok(self.fetch_item(item_id).await?.metrics())
    }

    /// Readable text of the linked article, or empty when it can't or
    /// shouldn't be scraped
    async fn fetch_article_text(&self, url: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct AlgoliaItem {
    title: Option<String>,
    story_title: Option<String>,
    url: Option<String>,
    story_url: Option<String>,
    points: Option<u32>,
    num_comments: Option<u32>,
    text: Option<String>,
    #[serde(rename = "type")]
    item_type: Option<String>,
    #[serde(default)]
    children: Vec<AlgoliaChild>,
}

#[derive(Debug, Deserialize)]
struct AlgoliaChild {
    #[serde(default)]
    children: Vec<AlgoliaChild>,
}

impl AlgoliaChild {
    fn count(children: &[AlgoliaChild]) -> u32 {
        children
            .iter()
            .map(|c| 1 + Self::count(&c.children))
            .sum()
    }
}

#[derive(Debug, Deserialize)]
struct FirebaseItem {
    title: Option<String>,
    url: Option<String>,
    score: Option<u32>,
    descendants: Option<u32>,
    #[serde(default)]
    kids: Vec<u64>,
    text: Option<String>,
    #[serde(rename = "type")]
    item_type: Option<String>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

fn build_item(
    item_id: &str,
    title: String,
    url: Option<String>,
    score: u32,
    comment_count: u32,
    body_text: String,
    item_type: &str,
) -> CandidateItem {
    CandidateItem {
        id: item_id.to_owned(),
        topic: Topic::detect(&title, item_type),
        title,
        url,
        score,
        comment_count,
        body_text,
    }
}

pub struct HnClient {
    client: Client,
    articles: ArticleExtractor,
}

impl HnClient {
    pub fn new(request_timeout: Duration, max_article_chars: usize) -> HnResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("hntldr/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            articles: ArticleExtractor::new(client.clone(), max_article_chars),
            client,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> HnResult<T> {
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context(HttpSnafu { url: url.clone() })?;
        let status = resp.status();
        if !status.is_success() {
            return StatusSnafu { url, status }.fail();
        }
        resp.json().await.context(HttpSnafu { url })
    }

    pub async fn fetch_top_story_ids(&self, limit: usize) -> HnResult<Vec<u64>> {
        let mut ids: Vec<u64> = self
            .get_json(format!("{HN_FIREBASE_BASE}/topstories.json"))
            .await?;
        ids.truncate(limit);
        Ok(ids)
    }

    async fn fetch_algolia_item(&self, item_id: &str) -> HnResult<CandidateItem> {
        let item: AlgoliaItem = self
            .get_json(format!("{HN_ALGOLIA_BASE}/items/{item_id}"))
            .await?;

        let comment_count = item
            .num_comments
            .unwrap_or_else(|| AlgoliaChild::count(&item.children));
        Ok(build_item(
            item_id,
            non_empty(item.title)
                .or(non_empty(item.story_title))
                .unwrap_or_default(),
            non_empty(item.url).or(non_empty(item.story_url)),
            item.points.unwrap_or_default(),
            comment_count,
            item.text.unwrap_or_default(),
            item.item_type.as_deref().unwrap_or("story"),
        ))
    }

    async fn fetch_firebase_item(&self, item_id: &str) -> HnResult<CandidateItem> {
        let item: Option<FirebaseItem> = self
            .get_json(format!("{HN_FIREBASE_BASE}/item/{item_id}.json"))
            .await?;

        let Some(item) = item.filter(|item| !item.dead && !item.deleted) else {
            return NotFoundSnafu { item_id }.fail();
        };

        let comment_count = item
            .descendants
            .unwrap_or_else(|| u32::try_from(item.kids.len()).unwrap_or(u32::MAX));
        Ok(build_item(
            item_id,
            item.title.unwrap_or_default(),
            non_empty(item.url),
            item.score.unwrap_or_default(),
            comment_count,
            item.text.unwrap_or_default(),
            item.item_type.as_deref().unwrap_or("story"),
        ))
    }
}

#[async_trait::async_trait]
impl ContentFetcher for HnClient {
    /// Algolia first (single call, richer data), Firebase as a fallback
    async fn fetch_item(&self, item_id: &str) -> HnResult<CandidateItem> {
        match self.fetch_algolia_item(item_id).await {
            Ok(item) => return Ok(item),
            Err(err) => {
                debug!(
                    target: LOG_TARGET,
                    item_id,
                    err = %err.fmt_compact(),
                    "Algolia fetch failed, falling back to Firebase"
                );
            }
        }
        self.fetch_firebase_item(item_id).await
    }

    async fn fetch_article_text(&self, url: &str) -> String {
        self.articles.fetch_text(url).await
    }
}

#[async_trait::async_trait]
impl CandidateSource for HnClient {
    async fn fetch_ranked(&self, limit: usize) -> HnResult<Vec<CandidateItem>> {
        let ids = self.fetch_top_story_ids(limit).await?;
        let mut items = Vec::with_capacity(ids.len());

        for (i, batch) in ids.chunks(DETAILS_BATCH_SIZE).enumerate() {
            if 0 < i {
                tokio::time::sleep(DETAILS_BATCH_PAUSE).await;
            }
            let batch_ids: Vec<String> = batch.iter().map(ToString::to_string).collect();
            let results = join_all(batch_ids.iter().map(|id| self.fetch_item(id))).await;
            for (id, res) in batch_ids.iter().zip(results) {
                match res {
                    Ok(item) if !item.title.is_empty() => items.push(item),
                    Ok(_) => {
                        debug!(target: LOG_TARGET, item_id = %id, "Dropping item without a title");
                    }
                    Err(err) => {
                        debug!(target: LOG_TARGET, item_id = %id, err = %err.fmt_compact(), "Failed to fetch item details");
                    }
                }
            }
        }

        info!(target: LOG_TARGET, requested = ids.len(), fetched = items.len(), "Fetched ranked candidates");
        Ok(items)
    }
}

pub fn hn_item_url(item_id: &str) -> String {
    format!("https://news.ycombinator.com/item?id={item_id}")
}

/// Parse an HN item link (news.ycombinator.com or hn.algolia.com) or a bare
/// numeric id.
pub fn extract_item_id(input: &str) -> HnResult<String> {
    let input = input.trim();
    let is_numeric_id =
        |s: &str| !s.is_empty() && s.len() <= 12 && s.bytes().all(|b| b.is_ascii_digit());

    if is_numeric_id(input) {
        return Ok(input.to_owned());
    }

    if let Ok(url) = url::Url::parse(input) {
        let host = url.host_str().unwrap_or_default();
        if host == "news.ycombinator.com" || host == "hn.algolia.com" {
            if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "id") {
                if is_numeric_id(&id) {
                    return Ok(id.into_owned());
                }
            }
        }
    }

    InvalidItemRefSnafu { input }.fail()
}
