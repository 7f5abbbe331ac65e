mod ledger_ops;
mod queue_ops;
pub mod schedule;
mod tables;
mod timestamp;

use std::io;
use std::path::{Path, PathBuf};

use redb_bincode::{ReadTransaction, ReadableTable as _, WriteTransaction};
use snafu::{Location, ResultExt as _, Snafu};
use tokio::task::JoinError;
use tracing::{debug, info, instrument};

pub use self::queue_ops::AdvanceOutcome;
pub use self::schedule::{ScheduleStep, UpdateSchedule};
pub use self::tables::*;

const LOG_TARGET: &str = "hntldr::db";

/// Current schema version; bump together with a migration step in
/// [`Database::handle_db_ver_migrations`].
const DB_VER: u64 = 1;

#[derive(Debug, Snafu)]
pub enum DbError {
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        source: redb::TransactionError,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Database version {db_ver} is newer than supported {code_ver}"))]
    DbVersionTooHigh {
        db_ver: u64,
        code_ver: u64,
        #[snafu(implicit)]
        location: Location,
    },
    Join {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
}
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Persistent state of the bot: the dedup ledger and the update task queue.
///
/// Both tables live in one redb file. Every operation is a single
/// transaction, so callers never hold in-memory copies across calls.
#[derive(Debug)]
pub struct Database {
    inner: redb_bincode::Database,
    schedule: UpdateSchedule,
}

impl Database {
    pub async fn mk_db_path(data_dir: &Path) -> std::result::Result<PathBuf, io::Error> {
        tokio::fs::create_dir_all(&data_dir).await?;
        Ok(data_dir.join("hntldr.redb"))
    }

    #[instrument(skip_all)]
    pub async fn open(path: impl Into<PathBuf>, schedule: UpdateSchedule) -> DbResult<Database> {
        let path = path.into();
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database");
        let inner = tokio::task::spawn_blocking(move || redb_bincode::Database::create(path))
            .await
            .context(JoinSnafu)?
            .context(DatabaseSnafu)?;

        Self::write_with_inner(&inner, |tx| {
            Self::init_tables_tx(tx)?;
            Self::handle_db_ver_migrations(tx)?;
            Ok(())
        })
        .await?;

        Ok(Self { inner, schedule })
    }

    fn init_tables_tx(tx: &WriteTransaction) -> DbResult<()> {
        tx.open_table(&db_version::TABLE)?;
        tx.open_table(&posted_items::TABLE)?;
        tx.open_table(&update_tasks::TABLE)?;
        tx.open_table(&update_tasks_by_due::TABLE)?;
        Ok(())
    }

    fn handle_db_ver_migrations(tx: &WriteTransaction) -> DbResult<()> {
        let mut table_db_ver = tx.open_table(&db_version::TABLE)?;

        let Some(cur_db_ver) = table_db_ver.first()?.map(|g| g.1.value()) else {
            info!(target: LOG_TARGET, "Initializing new database");
            table_db_ver.insert(&(), &DB_VER)?;
            return Ok(());
        };

        if DB_VER < cur_db_ver {
            return DbVersionTooHighSnafu {
                db_ver: cur_db_ver,
                code_ver: DB_VER,
            }
            .fail();
        }

        debug!(target: LOG_TARGET, db_ver = cur_db_ver, "Db version");
        Ok(())
    }
}

impl Database {
    async fn write_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&'_ WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = inner.begin_write().context(TransactionSnafu)?;
            let res = f(&dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        Self::write_with_inner(&self.inner, f).await
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(TransactionSnafu)?;

            f(&dbtx)
        })
    }
}
