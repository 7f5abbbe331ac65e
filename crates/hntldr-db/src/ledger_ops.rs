use std::time::Duration;

use redb_bincode::ReadableTable as _;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{Database, DbResult, IsoTimestamp, LOG_TARGET, PostedItemRecord, posted_items};

impl Database {
    pub(crate) fn mark_posted_tx(
        record: &PostedItemRecord,
        posted_items_table: &mut posted_items::Table,
    ) -> DbResult<()> {
        posted_items_table.insert(&record.id, record)?;
        Ok(())
    }

    /// Whether `item_id` was already published
    pub async fn has_been_posted(&self, item_id: &str) -> DbResult<bool> {
        let item_id = item_id.to_owned();
        self.read_with(|tx| {
            let posted_items_table = tx.open_table(&posted_items::TABLE)?;
            Ok(posted_items_table.get(&item_id)?.is_some())
        })
        .await
    }

    pub async fn get_posted_item(&self, item_id: &str) -> DbResult<Option<PostedItemRecord>> {
        let item_id = item_id.to_owned();
        self.read_with(|tx| {
            let posted_items_table = tx.open_table(&posted_items::TABLE)?;
            Ok(posted_items_table.get(&item_id)?.map(|g| g.value()))
        })
        .await
    }

    /// Record `item_id` as published.
    ///
    /// Upsert: calling it again for the same id overwrites title, score and
    /// timestamp but never adds a second row.
    pub async fn mark_posted(
        &self,
        item_id: &str,
        title: &str,
        score: u32,
        now: OffsetDateTime,
    ) -> DbResult<()> {
        let record = PostedItemRecord {
            id: item_id.to_owned(),
            title: title.to_owned(),
            posted_at: IsoTimestamp::from(now),
            score,
        };
        self.write_with(|tx| {
            let mut posted_items_table = tx.open_table(&posted_items::TABLE)?;
            Self::mark_posted_tx(&record, &mut posted_items_table)
        })
        .await?;
        debug!(target: LOG_TARGET, item_id = %record.id, title = %record.title, "Marked item as posted");
        Ok(())
    }

    /// Delete ledger rows with `posted_at` strictly before `now - retention`.
    ///
    /// Returns the number of removed rows, for logging only.
    pub async fn prune_posted_older_than(
        &self,
        retention: Duration,
        now: OffsetDateTime,
    ) -> DbResult<usize> {
        let cutoff = IsoTimestamp::from(now - retention);
        let removed = self
            .write_with(|tx| {
                let mut posted_items_table = tx.open_table(&posted_items::TABLE)?;

                let mut stale = vec![];
                for record in posted_items_table.range::<String>(..)? {
                    let (k, v) = record?;
                    if v.value().posted_at < cutoff {
                        stale.push(k.value());
                    }
                }

                for item_id in &stale {
                    posted_items_table.remove(item_id)?;
                }
                Ok(stale.len())
            })
            .await?;

        if 0 < removed {
            info!(target: LOG_TARGET, removed, cutoff = %cutoff, "Pruned old entries from the ledger");
        }
        Ok(removed)
    }

    pub async fn posted_count(&self) -> DbResult<usize> {
        self.read_with(|tx| {
            let posted_items_table = tx.open_table(&posted_items::TABLE)?;
            let mut count = 0;
            for record in posted_items_table.range::<String>(..)? {
                record?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }
}
