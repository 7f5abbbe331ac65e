use redb_bincode::ReadableTable as _;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    Database, DbResult, IsoTimestamp, LOG_TARGET, NewUpdateTask, Phase, PostedItemRecord,
    ScheduleStep, UpdateTaskRecord, posted_items, update_tasks, update_tasks_by_due,
};

/// Result of [`Database::advance_update_task`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// No such task; nothing was changed
    Missing,
    Rescheduled(UpdateTaskRecord),
    /// The task was deleted and will never be returned again
    Retired,
}

impl Database {
    /// `None` when the schedule leaves no room for even one check before
    /// expiry; such a task is never stored.
    fn new_update_task_record(
        &self,
        task: NewUpdateTask,
        now: OffsetDateTime,
    ) -> Option<UpdateTaskRecord> {
        let (next_update_at, expires_at) = self.schedule.initial(now);
        if expires_at <= next_update_at {
            return None;
        }
        let now = IsoTimestamp::from(now);
        Some(UpdateTaskRecord {
            id: task.id,
            message_ref: task.message_ref,
            title: task.title,
            hook: task.hook,
            source_url: task.source_url,
            score: task.score,
            comment_count: task.comment_count,
            posted_at: now.clone(),
            last_updated_at: now,
            update_count: 0,
            phase: Phase::Fast,
            next_update_at,
            expires_at,
        })
    }

    /// Insert or overwrite `record`, keeping the due-index consistent
    pub(crate) fn put_update_task_tx(
        record: &UpdateTaskRecord,
        tasks_table: &mut update_tasks::Table,
        by_due_table: &mut update_tasks_by_due::Table,
    ) -> DbResult<()> {
        if let Some(prev) = tasks_table.insert(&record.id, record)? {
            by_due_table.remove(&prev.value().due_key())?;
        }
        by_due_table.insert(&record.due_key(), &())?;
        Ok(())
    }

    pub(crate) fn delete_update_task_tx(
        item_id: &String,
        tasks_table: &mut update_tasks::Table,
        by_due_table: &mut update_tasks_by_due::Table,
    ) -> DbResult<bool> {
        let Some(prev) = tasks_table.remove(item_id)? else {
            return Ok(false);
        };
        by_due_table.remove(&prev.value().due_key())?;
        Ok(true)
    }

    /// Register a published item for periodic re-checks.
    ///
    /// Upsert keyed by id: the task (re)starts in [`Phase::Fast`] with
    /// `update_count = 0`, first check one fast interval from `now` and
    /// expiry one lifetime from `now`. If that first check would not come
    /// before expiry, any existing task for the id is deleted instead and
    /// `None` is returned.
    pub async fn enqueue_update_task(
        &self,
        task: NewUpdateTask,
        now: OffsetDateTime,
    ) -> DbResult<Option<UpdateTaskRecord>> {
        let item_id = task.id.clone();
        let record = self.new_update_task_record(task, now);
        self.write_with(|tx| {
            let mut tasks_table = tx.open_table(&update_tasks::TABLE)?;
            let mut by_due_table = tx.open_table(&update_tasks_by_due::TABLE)?;
            Self::store_new_update_task_tx(
                &item_id,
                record.as_ref(),
                &mut tasks_table,
                &mut by_due_table,
            )
        })
        .await?;
        match &record {
            Some(record) => {
                debug!(target: LOG_TARGET, item_id = %record.id, next_update_at = %record.next_update_at, "Added update task");
            }
            None => {
                debug!(target: LOG_TARGET, %item_id, "Schedule too short, update task not stored");
            }
        }
        Ok(record)
    }

    /// Mark the item as posted and enqueue its update task in one
    /// transaction, so neither row can exist without the other.
    ///
    /// The ledger row is always written; the task follows the rules of
    /// [`Database::enqueue_update_task`].
    pub async fn record_published(
        &self,
        task: NewUpdateTask,
        now: OffsetDateTime,
    ) -> DbResult<Option<UpdateTaskRecord>> {
        let item_id = task.id.clone();
        let posted = PostedItemRecord {
            id: task.id.clone(),
            title: task.title.clone(),
            posted_at: IsoTimestamp::from(now),
            score: task.score,
        };
        let record = self.new_update_task_record(task, now);
        self.write_with(|tx| {
            let mut tasks_table = tx.open_table(&update_tasks::TABLE)?;
            let mut by_due_table = tx.open_table(&update_tasks_by_due::TABLE)?;
            let mut posted_items_table = tx.open_table(&posted_items::TABLE)?;

            Self::store_new_update_task_tx(
                &item_id,
                record.as_ref(),
                &mut tasks_table,
                &mut by_due_table,
            )?;
            Self::mark_posted_tx(&posted, &mut posted_items_table)
        })
        .await?;
        debug!(target: LOG_TARGET, %item_id, tracked = record.is_some(), "Recorded published item");
        Ok(record)
    }

    fn store_new_update_task_tx(
        item_id: &String,
        record: Option<&UpdateTaskRecord>,
        tasks_table: &mut update_tasks::Table,
        by_due_table: &mut update_tasks_by_due::Table,
    ) -> DbResult<()> {
        match record {
            Some(record) => Self::put_update_task_tx(record, tasks_table, by_due_table),
            None => Self::delete_update_task_tx(item_id, tasks_table, by_due_table).map(|_| ()),
        }
    }

    /// Earliest-due task with `next_update_at <= now < expires_at`.
    ///
    /// Read-only: the task stays scheduled until
    /// [`Database::advance_update_task`] is called for it.
    pub async fn get_next_due_update_task(
        &self,
        now: OffsetDateTime,
    ) -> DbResult<Option<UpdateTaskRecord>> {
        let now = IsoTimestamp::from(now);
        self.read_with(|tx| {
            let tasks_table = tx.open_table(&update_tasks::TABLE)?;
            let by_due_table = tx.open_table(&update_tasks_by_due::TABLE)?;

            for record in by_due_table.range::<(IsoTimestamp, String)>(..)? {
                let (k, _) = record?;
                let (next_update_at, item_id) = k.value();
                if now < next_update_at {
                    break;
                }
                let Some(task) = tasks_table.get(&item_id)?.map(|g| g.value()) else {
                    continue;
                };
                // Overdue past expiry; left for `remove_expired_update_tasks`
                if task.expires_at <= now {
                    continue;
                }
                return Ok(Some(task));
            }
            Ok(None)
        })
        .await
    }

    /// Run one step of the phase state machine for `item_id`.
    ///
    /// Bumps `update_count`, moves to [`Phase::Slow`] after enough fast
    /// checks, and either stores the new metrics with the next check time or
    /// deletes the task when that check would reach `expires_at`.
    pub async fn advance_update_task(
        &self,
        item_id: &str,
        new_score: u32,
        new_comment_count: u32,
        now: OffsetDateTime,
    ) -> DbResult<AdvanceOutcome> {
        let item_id = item_id.to_owned();
        let outcome = self
            .write_with(|tx| {
                let mut tasks_table = tx.open_table(&update_tasks::TABLE)?;
                let mut by_due_table = tx.open_table(&update_tasks_by_due::TABLE)?;

                let Some(mut task) = tasks_table.get(&item_id)?.map(|g| g.value()) else {
                    return Ok(AdvanceOutcome::Missing);
                };

                match self
                    .schedule
                    .next_step(task.phase, task.update_count, &task.expires_at, now)
                {
                    ScheduleStep::Retire => {
                        Self::delete_update_task_tx(&item_id, &mut tasks_table, &mut by_due_table)?;
                        Ok(AdvanceOutcome::Retired)
                    }
                    ScheduleStep::Reschedule {
                        phase,
                        update_count,
                        next_update_at,
                    } => {
                        task.score = new_score;
                        task.comment_count = new_comment_count;
                        task.update_count = update_count;
                        task.phase = phase;
                        task.next_update_at = next_update_at;
                        task.last_updated_at = IsoTimestamp::from(now);
                        Self::put_update_task_tx(&task, &mut tasks_table, &mut by_due_table)?;
                        Ok(AdvanceOutcome::Rescheduled(task))
                    }
                }
            })
            .await?;

        match &outcome {
            AdvanceOutcome::Missing => {
                debug!(target: LOG_TARGET, item_id = %item_id, "No update task to advance");
            }
            AdvanceOutcome::Rescheduled(task) => {
                debug!(
                    target: LOG_TARGET,
                    item_id = %item_id,
                    update_count = task.update_count,
                    phase = %task.phase,
                    next_update_at = %task.next_update_at,
                    "Rescheduled update task"
                );
            }
            AdvanceOutcome::Retired => {
                debug!(target: LOG_TARGET, item_id = %item_id, "Retired update task");
            }
        }
        Ok(outcome)
    }

    /// Delete every task with `expires_at <= now`, including ones the worker
    /// never got to advance.
    pub async fn remove_expired_update_tasks(&self, now: OffsetDateTime) -> DbResult<usize> {
        let now = IsoTimestamp::from(now);
        let removed = self
            .write_with(|tx| {
                let mut tasks_table = tx.open_table(&update_tasks::TABLE)?;
                let mut by_due_table = tx.open_table(&update_tasks_by_due::TABLE)?;

                let mut expired = vec![];
                for record in tasks_table.range::<String>(..)? {
                    let (k, v) = record?;
                    if v.value().expires_at <= now {
                        expired.push(k.value());
                    }
                }

                for item_id in &expired {
                    Self::delete_update_task_tx(item_id, &mut tasks_table, &mut by_due_table)?;
                }
                Ok(expired.len())
            })
            .await?;

        if 0 < removed {
            debug!(target: LOG_TARGET, removed, "Removed expired update tasks");
        }
        Ok(removed)
    }

    pub async fn get_update_task(&self, item_id: &str) -> DbResult<Option<UpdateTaskRecord>> {
        let item_id = item_id.to_owned();
        self.read_with(|tx| {
            let tasks_table = tx.open_table(&update_tasks::TABLE)?;
            Ok(tasks_table.get(&item_id)?.map(|g| g.value()))
        })
        .await
    }

    /// All tasks, earliest due first
    pub async fn list_update_tasks(&self) -> DbResult<Vec<UpdateTaskRecord>> {
        self.read_with(|tx| {
            let tasks_table = tx.open_table(&update_tasks::TABLE)?;
            let by_due_table = tx.open_table(&update_tasks_by_due::TABLE)?;

            let mut ret = vec![];
            for record in by_due_table.range::<(IsoTimestamp, String)>(..)? {
                let (k, _) = record?;
                let (_, item_id) = k.value();
                if let Some(task) = tasks_table.get(&item_id)? {
                    ret.push(task.value());
                }
            }
            Ok(ret)
        })
        .await
    }

    /// Earliest scheduled check of any task, due or not
    pub async fn next_update_at(&self) -> DbResult<Option<IsoTimestamp>> {
        self.read_with(|tx| {
            let by_due_table = tx.open_table(&update_tasks_by_due::TABLE)?;
            Ok(by_due_table.first()?.map(|(k, _)| k.value().0))
        })
        .await
    }
}
