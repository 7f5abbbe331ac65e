//! Update worker: keeps published messages fresh until their task retires.

use std::time::Duration;

use hntldr_db::{AdvanceOutcome, DbError, UpdateTaskRecord};
use snafu::{ResultExt as _, Snafu};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::cancel::{CancelRx, is_cancelled, sleep_or_cancel};
use crate::context::BotContext;
use crate::error::FmtCompact as _;
use crate::publisher::{DisplayContent, EditOutcome, PublishError};

const LOG_TARGET: &str = "hntldr::worker";

#[derive(Debug, Snafu)]
pub enum WorkerError {
    #[snafu(display("Update queue error"))]
    Queue { source: DbError },
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Longest sleep when nothing is due
    pub idle_interval: Duration,
    /// Pause after each processed task
    pub pacing: Duration,
    /// Pause after an unexpected error
    pub error_backoff: Duration,
    /// Sweep expired tasks every this many idle iterations
    pub sweep_every: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(15),
            pacing: Duration::from_secs(1),
            error_backoff: Duration::from_secs(15),
            sweep_every: 40,
        }
    }
}

/// What a single [`UpdateWorker::run_once`] did, and how long to pause
/// before the next one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    Idle { wait: Duration },
    Processed { item_id: String, outcome: AdvanceOutcome },
    /// Edit was rate limited; the task was left as-is and stays due
    RateLimited { item_id: String, retry_after: Duration },
}

pub struct UpdateWorker {
    ctx: BotContext,
    config: WorkerConfig,
    idle_iterations: u64,
}

impl UpdateWorker {
    pub fn new(ctx: BotContext, config: WorkerConfig) -> Self {
        Self {
            ctx,
            config,
            idle_iterations: 0,
        }
    }

    /// Process due tasks one at a time until cancelled.
    ///
    /// Cancellation is honored between iterations and during pauses, never
    /// in the middle of a network call. Errors are reported and followed by a
    /// backoff; they never end the loop.
    pub async fn run(mut self, mut cancel: CancelRx) {
        info!(target: LOG_TARGET, "Update worker started");

        while !is_cancelled(&cancel) {
            let pause = match self.run_once().await {
                Ok(Iteration::Idle { wait }) => wait,
                Ok(Iteration::Processed { .. }) => self.config.pacing,
                Ok(Iteration::RateLimited { retry_after, .. }) => retry_after,
                Err(err) => {
                    warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Update worker error");
                    self.ctx
                        .notifier
                        .report(&err.fmt_compact().to_string(), "update worker")
                        .await;
                    self.config.error_backoff
                }
            };

            if !sleep_or_cancel(pause, &mut cancel).await {
                break;
            }
        }

        info!(target: LOG_TARGET, "Update worker stopped");
    }

    pub async fn run_once(&mut self) -> WorkerResult<Iteration> {
        let now = OffsetDateTime::now_utc();
        let Some(task) = self
            .ctx
            .db
            .get_next_due_update_task(now)
            .await
            .context(QueueSnafu)?
        else {
            return self.idle(now).await;
        };

        self.process_task(task).await
    }

    async fn idle(&mut self, now: OffsetDateTime) -> WorkerResult<Iteration> {
        self.idle_iterations += 1;
        if self.idle_iterations % self.config.sweep_every.max(1) == 0 {
            let removed = self
                .ctx
                .db
                .remove_expired_update_tasks(now)
                .await
                .context(QueueSnafu)?;
            if 0 < removed {
                info!(target: LOG_TARGET, removed, "Swept expired update tasks");
            }
        }

        // Wake for the next scheduled check if it comes before the idle interval
        let wait = self
            .ctx
            .db
            .next_update_at()
            .await
            .context(QueueSnafu)?
            .map(|next| next.saturating_duration_since(now))
            .filter(|wait| !wait.is_zero())
            .map_or(self.config.idle_interval, |wait| {
                wait.min(self.config.idle_interval)
            });
        Ok(Iteration::Idle { wait })
    }

    async fn process_task(&mut self, task: UpdateTaskRecord) -> WorkerResult<Iteration> {
        let (score, comment_count) = match self.ctx.fetcher.fetch_metrics(&task.id).await {
            Ok(metrics) => (metrics.score, metrics.comment_count),
            Err(err) => {
                // Carry old values forward so the schedule still progresses
                debug!(target: LOG_TARGET, item_id = %task.id, err = %err.fmt_compact(), "Failed to fetch metrics");
                (task.score, task.comment_count)
            }
        };

        if (score, comment_count) != (task.score, task.comment_count) {
            let content = DisplayContent {
                item_id: task.id.clone(),
                title: task.title.clone(),
                url: task.source_url.clone(),
                hook: task.hook.clone(),
            };
            match self
                .ctx
                .publisher
                .edit(&task.message_ref, &content, score, comment_count)
                .await
            {
                Ok(EditOutcome::Edited) => {
                    debug!(target: LOG_TARGET, item_id = %task.id, score, comment_count, "Edited message");
                }
                Ok(EditOutcome::Unchanged) => {
                    debug!(target: LOG_TARGET, item_id = %task.id, "Message already up to date");
                }
                Err(PublishError::RateLimited { retry_after }) => {
                    warn!(target: LOG_TARGET, item_id = %task.id, retry_after_secs = retry_after.as_secs_f64(), "Rate limited, will retry");
                    return Ok(Iteration::RateLimited {
                        item_id: task.id,
                        retry_after,
                    });
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, item_id = %task.id, message_ref = %task.message_ref, err = %err.fmt_compact(), "Edit failed");
                }
            }
        }

        let outcome = self
            .ctx
            .db
            .advance_update_task(&task.id, score, comment_count, OffsetDateTime::now_utc())
            .await
            .context(QueueSnafu)?;
        Ok(Iteration::Processed {
            item_id: task.id,
            outcome,
        })
    }
}
