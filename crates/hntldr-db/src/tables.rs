use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

pub use crate::timestamp::IsoTimestamp;

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

def_table! {
    /// Tracks database/schema version
    db_version: () => u64
}

def_table! {
    /// Dedup ledger: upstream items that were already published
    posted_items: String => PostedItemRecord
}

def_table! {
    /// Published items still being re-checked
    update_tasks: String => UpdateTaskRecord
}

def_table! {
    /// Index of [`update_tasks`] ordered by `next_update_at`
    ///
    /// Kept in sync by every write to [`update_tasks`], so the earliest due
    /// task is always the first key.
    update_tasks_by_due: (IsoTimestamp, String) => ()
}

#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedItemRecord {
    pub id: String,
    pub title: String,
    pub posted_at: IsoTimestamp,
    /// Informational only
    pub score: u32,
}

#[derive(Debug, Encode, Decode, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Fast,
    Slow,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Fast => "fast",
            Phase::Slow => "slow",
        })
    }
}

/// Handle of a published message
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: String,
    pub message_id: i64,
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTaskRecord {
    pub id: String,
    pub message_ref: MessageRef,
    pub title: String,
    /// Derived summary cached at publish time, reused verbatim on every edit
    pub hook: String,
    pub source_url: Option<String>,
    pub score: u32,
    pub comment_count: u32,
    pub posted_at: IsoTimestamp,
    pub last_updated_at: IsoTimestamp,
    pub update_count: u32,
    pub phase: Phase,
    pub next_update_at: IsoTimestamp,
    pub expires_at: IsoTimestamp,
}

impl UpdateTaskRecord {
    pub fn due_key(&self) -> (IsoTimestamp, String) {
        (self.next_update_at.clone(), self.id.clone())
    }
}

/// Everything the publisher knows about an item right after posting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUpdateTask {
    pub id: String,
    pub message_ref: MessageRef,
    pub title: String,
    pub hook: String,
    pub source_url: Option<String>,
    pub score: u32,
    pub comment_count: u32,
}
