#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hntldr::cancel::CancelRx;
use hntldr::context::BotContext;
use hntldr::hn::{CandidateItem, CandidateSource, ContentFetcher, HnError, HnResult, ItemMetrics};
use hntldr::notifier::OperatorNotifier;
use hntldr::publisher::{DisplayContent, EditOutcome, PublishError, PublishResult, Publisher};
use hntldr::synth::{SynthesisRequest, Synthesizer};
use hntldr::topic::Topic;
use hntldr_db::{Database, MessageRef, NewUpdateTask, UpdateSchedule};
use tempfile::{TempDir, tempdir};
use tokio::sync::{Mutex, watch};

pub const CHANNEL: &str = "@hntldr_test";

/// Helper: a candidate with sensible defaults
pub fn make_item(id: &str, title: &str, score: u32) -> CandidateItem {
    CandidateItem {
        id: id.to_owned(),
        title: title.to_owned(),
        url: Some(format!("https://example.com/{id}")),
        score,
        comment_count: 10,
        body_text: String::new(),
        topic: Topic::detect(title, "story"),
    }
}

pub fn make_task(id: &str, score: u32, comment_count: u32) -> NewUpdateTask {
    NewUpdateTask {
        id: id.to_owned(),
        message_ref: MessageRef {
            chat_id: CHANNEL.into(),
            message_id: 1000,
        },
        title: format!("Story {id}"),
        hook: format!("Hook for Story {id}"),
        source_url: Some(format!("https://example.com/{id}")),
        score,
        comment_count,
    }
}

#[derive(Default)]
pub struct MockSource {
    pub items: Mutex<Vec<CandidateItem>>,
    pub fail: AtomicBool,
    /// When each `fetch_ranked` call happened
    pub calls: Mutex<Vec<Instant>>,
}

#[async_trait]
impl CandidateSource for MockSource {
    async fn fetch_ranked(&self, limit: usize) -> HnResult<Vec<CandidateItem>> {
        self.calls.lock().await.push(Instant::now());
        if self.fail.load(Ordering::SeqCst) {
            return Err(HnError::NotFound {
                item_id: "topstories".into(),
            });
        }
        Ok(self.items.lock().await.iter().take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct MockFetcher {
    /// Items without an entry fail to fetch
    pub metrics: Mutex<HashMap<String, ItemMetrics>>,
    pub article_text: Mutex<String>,
    pub metrics_calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub async fn set_metrics(&self, id: &str, score: u32, comment_count: u32) {
        self.metrics.lock().await.insert(
            id.to_owned(),
            ItemMetrics {
                score,
                comment_count,
            },
        );
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch_item(&self, item_id: &str) -> HnResult<CandidateItem> {
        let metrics = self.fetch_metrics(item_id).await?;
        Ok(CandidateItem {
            score: metrics.score,
            comment_count: metrics.comment_count,
            ..make_item(item_id, &format!("Story {item_id}"), metrics.score)
        })
    }

    async fn fetch_metrics(&self, item_id: &str) -> HnResult<ItemMetrics> {
        self.metrics_calls.lock().await.push(item_id.to_owned());
        self.metrics
            .lock()
            .await
            .get(item_id)
            .copied()
            .ok_or_else(|| HnError::NotFound {
                item_id: item_id.to_owned(),
            })
    }

    async fn fetch_article_text(&self, _url: &str) -> String {
        self.article_text.lock().await.clone()
    }
}

#[derive(Default)]
pub struct MockSynthesizer {
    pub requests: Mutex<Vec<SynthesisRequest>>,
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn derive(&self, req: &SynthesisRequest) -> String {
        self.requests.lock().await.push(req.clone());
        format!("Hook for {}", req.title)
    }
}

#[derive(Default)]
pub struct MockPublisher {
    pub published: Mutex<Vec<(DisplayContent, u32, u32)>>,
    pub edits: Mutex<Vec<(MessageRef, DisplayContent, u32, u32)>>,
    pub publish_times: Mutex<Vec<Instant>>,
    pub edit_times: Mutex<Vec<Instant>>,
    /// Item ids whose publish fails
    pub fail_publish: Mutex<HashSet<String>>,
    /// Consumed front to back; `Ok(Edited)` once empty
    pub edit_results: Mutex<VecDeque<PublishResult<EditOutcome>>>,
    next_message_id: AtomicI64,
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(
        &self,
        content: &DisplayContent,
        score: u32,
        comment_count: u32,
    ) -> PublishResult<MessageRef> {
        if self.fail_publish.lock().await.contains(&content.item_id) {
            return Err(PublishError::Api {
                status: 400,
                description: "Bad Request: chat not found".into(),
            });
        }
        self.publish_times.lock().await.push(Instant::now());
        self.published
            .lock()
            .await
            .push((content.clone(), score, comment_count));
        Ok(MessageRef {
            chat_id: CHANNEL.into(),
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn edit(
        &self,
        message: &MessageRef,
        content: &DisplayContent,
        score: u32,
        comment_count: u32,
    ) -> PublishResult<EditOutcome> {
        self.edit_times.lock().await.push(Instant::now());
        self.edits
            .lock()
            .await
            .push((message.clone(), content.clone(), score, comment_count));
        self.edit_results
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(EditOutcome::Edited))
    }
}

#[derive(Default)]
pub struct MockNotifier {
    /// `(message, context)` pairs
    pub reports: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl OperatorNotifier for MockNotifier {
    async fn report(&self, message: &str, context: &str) {
        self.reports
            .lock()
            .await
            .push((message.to_owned(), context.to_owned()));
    }
}

pub struct TestHarness {
    _dir: TempDir,
    pub db: Arc<Database>,
    pub source: Arc<MockSource>,
    pub fetcher: Arc<MockFetcher>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub publisher: Arc<MockPublisher>,
    pub notifier: Arc<MockNotifier>,
    pub cancel_tx: watch::Sender<bool>,
}

impl TestHarness {
    pub async fn new() -> Self {
        let dir = tempdir().expect("tempdir");
        let db = Database::open(dir.path().join("hntldr.redb"), UpdateSchedule::default())
            .await
            .expect("db open should succeed");

        Self {
            _dir: dir,
            db: Arc::new(db),
            source: Arc::default(),
            fetcher: Arc::default(),
            synthesizer: Arc::default(),
            publisher: Arc::default(),
            notifier: Arc::default(),
            cancel_tx: watch::channel(false).0,
        }
    }

    /// Receiver that stays pending until [`Self::cancel`]
    pub fn cancel_rx(&self) -> CancelRx {
        self.cancel_tx.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn ctx(&self) -> BotContext {
        BotContext {
            db: self.db.clone(),
            candidates: self.source.clone(),
            fetcher: self.fetcher.clone(),
            synthesizer: self.synthesizer.clone(),
            publisher: self.publisher.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

/// `now` that makes a freshly enqueued task due right away
pub fn already_due_now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc() - Duration::from_secs(11 * 60)
}
