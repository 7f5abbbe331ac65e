//! Poll cycle: pick new candidates, publish them and start tracking them.

use std::time::Duration;

use hntldr_db::{DbError, MessageRef, NewUpdateTask};
use snafu::{ResultExt as _, Snafu};
use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cancel::{CancelRx, cancelled, sleep_or_cancel};
use crate::context::BotContext;
use crate::error::FmtCompact as _;
use crate::hn::{CandidateItem, ContentFetcher, HnError};
use crate::publisher::{DisplayContent, PublishError};
use crate::synth::{SynthesisRequest, Synthesizer, needs_synthesis};
use crate::topic::{ScoreThreshold, ScoreThresholds};

const LOG_TARGET: &str = "hntldr::poll";

#[derive(Debug, Snafu)]
pub enum PollError {
    #[snafu(display("Failed to fetch candidates"))]
    Candidates { source: HnError },
    #[snafu(display("Ledger lookup failed"))]
    Ledger { source: DbError },
    #[snafu(display("Failed to publish"))]
    Publish { source: PublishError },
    #[snafu(display("Published as {message_ref} but failed to record it"))]
    Record {
        message_ref: MessageRef,
        source: DbError,
    },
}

pub type PollResult<T> = std::result::Result<T, PollError>;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// Delay of the extra run right after startup
    pub startup_delay: Duration,
    pub candidates_per_poll: usize,
    pub max_per_cycle: usize,
    pub thresholds: ScoreThresholds,
    /// Pause between successive publishes within a cycle
    pub publish_delay: Duration,
    pub retention: Duration,
    pub max_article_chars: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            startup_delay: Duration::from_secs(5),
            candidates_per_poll: 50,
            max_per_cycle: 3,
            thresholds: ScoreThresholds::default(),
            publish_delay: Duration::from_secs(3),
            retention: Duration::from_secs(30 * 24 * 60 * 60),
            max_article_chars: 4000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Published(MessageRef),
    AlreadyPosted,
    BelowThreshold,
    CategoryDisabled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub candidates: usize,
    pub published: usize,
    pub already_posted: usize,
    pub below_threshold: usize,
    pub failed: usize,
    /// Whole cycle aborted early (e.g. source unreachable)
    pub cycle_failed: bool,
    /// Cancelled during a pause between publishes
    pub cancelled: bool,
    pub pruned: usize,
}

/// Run one poll cycle.
///
/// Errors never escape: per-candidate and cycle-level failures are reported
/// to the operator, and the ledger is pruned either way. Cancellation cuts
/// the pause between publishes short and ends the cycle there.
pub async fn run_poll_cycle(
    ctx: &BotContext,
    config: &PollConfig,
    cancel: &mut CancelRx,
) -> PollSummary {
    info!(target: LOG_TARGET, "Starting poll cycle");
    let mut summary = PollSummary::default();

    if let Err(err) = poll_candidates(ctx, config, &mut summary, cancel).await {
        summary.cycle_failed = true;
        warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Poll cycle failed");
        ctx.notifier
            .report(&err.fmt_compact().to_string(), "poll cycle")
            .await;
    }

    match ctx
        .db
        .prune_posted_older_than(config.retention, OffsetDateTime::now_utc())
        .await
    {
        Ok(pruned) => summary.pruned = pruned,
        Err(err) => {
            warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Failed to prune posted items");
        }
    }

    info!(
        target: LOG_TARGET,
        candidates = summary.candidates,
        published = summary.published,
        already_posted = summary.already_posted,
        below_threshold = summary.below_threshold,
        failed = summary.failed,
        cancelled = summary.cancelled,
        pruned = summary.pruned,
        "Poll cycle complete"
    );
    summary
}

async fn poll_candidates(
    ctx: &BotContext,
    config: &PollConfig,
    summary: &mut PollSummary,
    cancel: &mut CancelRx,
) -> PollResult<()> {
    let candidates = ctx
        .candidates
        .fetch_ranked(config.candidates_per_poll)
        .await
        .context(CandidatesSnafu)?;
    summary.candidates = candidates.len();

    // Rank order is kept as-is
    for item in &candidates {
        if config.max_per_cycle <= summary.published {
            debug!(target: LOG_TARGET, max = config.max_per_cycle, "Reached per-cycle limit");
            break;
        }

        match process_candidate(ctx, config, item).await {
            Ok(CandidateOutcome::Published(_)) => {
                summary.published += 1;
                if summary.published < config.max_per_cycle
                    && !sleep_or_cancel(config.publish_delay, cancel).await
                {
                    summary.cancelled = true;
                    break;
                }
            }
            Ok(CandidateOutcome::AlreadyPosted) => summary.already_posted += 1,
            Ok(CandidateOutcome::BelowThreshold | CandidateOutcome::CategoryDisabled) => {
                summary.below_threshold += 1;
            }
            Err(err) => {
                summary.failed += 1;
                warn!(target: LOG_TARGET, item_id = %item.id, err = %err.fmt_compact(), "Failed to process candidate");
                ctx.notifier
                    .report(
                        &err.fmt_compact().to_string(),
                        &format!("poll cycle item {}", item.id),
                    )
                    .await;
            }
        }
    }
    Ok(())
}

/// Decide on a single candidate and publish it if eligible.
///
/// On success the ledger row and the update task are written in one
/// transaction.
pub async fn process_candidate(
    ctx: &BotContext,
    config: &PollConfig,
    item: &CandidateItem,
) -> PollResult<CandidateOutcome> {
    if ctx.db.has_been_posted(&item.id).await.context(LedgerSnafu)? {
        return Ok(CandidateOutcome::AlreadyPosted);
    }

    match config.thresholds.for_topic(item.topic) {
        ScoreThreshold::Disabled => {
            debug!(target: LOG_TARGET, item_id = %item.id, topic = %item.topic, "Category disabled");
            return Ok(CandidateOutcome::CategoryDisabled);
        }
        threshold if !threshold.admits(item.score) => {
            debug!(
                target: LOG_TARGET,
                item_id = %item.id,
                topic = %item.topic,
                score = item.score,
                %threshold,
                "Below threshold"
            );
            return Ok(CandidateOutcome::BelowThreshold);
        }
        _ => {}
    }

    info!(target: LOG_TARGET, item_id = %item.id, topic = %item.topic, score = item.score, title = %item.title, "Publishing");

    let hook = derive_hook(
        ctx.fetcher.as_ref(),
        ctx.synthesizer.as_ref(),
        item,
        config.max_article_chars,
    )
    .await;

    let content = DisplayContent {
        item_id: item.id.clone(),
        title: item.title.clone(),
        url: item.url.clone(),
        hook,
    };
    let message_ref = ctx
        .publisher
        .publish(&content, item.score, item.comment_count)
        .await
        .context(PublishSnafu)?;

    ctx.db
        .record_published(
            NewUpdateTask {
                id: item.id.clone(),
                message_ref: message_ref.clone(),
                title: content.title,
                hook: content.hook,
                source_url: content.url,
                score: item.score,
                comment_count: item.comment_count,
            },
            OffsetDateTime::now_utc(),
        )
        .await
        .context(RecordSnafu {
            message_ref: message_ref.clone(),
        })?;

    info!(target: LOG_TARGET, item_id = %item.id, %message_ref, "Published");
    Ok(CandidateOutcome::Published(message_ref))
}

/// Hook text for `item`, empty for link-less items with next to no body.
///
/// Synthesis works from the scraped article, or the item's own text when
/// the article yields nothing.
pub async fn derive_hook(
    fetcher: &dyn ContentFetcher,
    synthesizer: &dyn Synthesizer,
    item: &CandidateItem,
    max_article_chars: usize,
) -> String {
    if !needs_synthesis(item.url.as_deref(), &item.body_text) {
        return String::new();
    }

    let article = match item.url.as_deref() {
        Some(url) => fetcher.fetch_article_text(url).await,
        None => String::new(),
    };
    let content = if article.is_empty() {
        item.body_text.chars().take(max_article_chars).collect()
    } else {
        article
    };

    synthesizer
        .derive(&SynthesisRequest {
            title: item.title.clone(),
            url: item.url.clone(),
            content,
            score: item.score,
            comment_count: item.comment_count,
        })
        .await
}

/// Run a poll cycle shortly after startup and then every `config.interval`
/// until cancelled.
pub async fn run_poll_scheduler(ctx: BotContext, config: PollConfig, mut cancel: CancelRx) {
    info!(
        target: LOG_TARGET,
        interval_secs = config.interval.as_secs(),
        max_per_cycle = config.max_per_cycle,
        "Poll scheduler started"
    );
    let start = Instant::now();

    if sleep_or_cancel(config.startup_delay, &mut cancel).await {
        run_poll_cycle(&ctx, &config, &mut cancel).await;

        let mut interval = tokio::time::interval_at(start + config.interval, config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancelled(&mut cancel) => break,
            }
            run_poll_cycle(&ctx, &config, &mut cancel).await;
        }
    }

    info!(target: LOG_TARGET, "Poll scheduler stopped");
}
