//! The message index (spec.md §6 "Index operations"), out of scope beyond
//! one concrete, workable implementation. Ships a `sqlx`/SQLite-backed
//! index (grounded on the teacher's `storage/db.rs` schema) and an
//! in-memory test double.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

use crate::types::MessageFlags;

/// An extension column keyed by name (spec.md §6: "extension columns" such
/// as the MD5 fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtColumn {
    Md5Hdr,
    FromOffset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtValue {
    Md5([u8; 16]),
    FromOffset(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRecordType {
    Append,
    Expunge,
    Flags,
    KeywordAdd,
    KeywordRemove,
    KeywordReset,
}

/// One pending index modification relevant to the message currently under
/// inspection (spec.md §2 "Sync-record buffer", §6 "Sync-record shape").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub uid1: u32,
    pub uid2: u32,
    pub kind: SyncRecordType,
    pub flags: MessageFlags,
    pub keywords: Vec<String>,
}

/// A durable, indexed view of one message, as stored in the index
/// (spec.md §3 "Message record" — the index-side half of the split;
/// `sync::record::MessageRecord` is the in-pass working copy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMessage {
    pub seq: u32,
    pub uid: u32,
    pub flags: MessageFlags,
    pub keywords: Vec<String>,
    pub from_offset: u64,
}

/// Folder-level header fields persisted across passes (spec.md §4.8
/// "Finalisation": `uid_validity`, `next_uid`, `sync_stamp`, `sync_size`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexHeader {
    pub uid_validity: u32,
    pub next_uid: u32,
    pub sync_stamp: i64,
    pub sync_size: u64,
}

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index backend error: {0}")]
    Backend(String),
    #[error("no open transaction")]
    NoTransaction,
    #[error("sequence {0} not found")]
    NotFound(u32),
}

/// The message index contract (spec.md §6). One open transaction at a
/// time; `transaction_begin`/`commit`/`rollback` bracket one sync pass.
pub trait MessageIndex {
    fn header(&mut self) -> IndexResult<IndexHeader>;
    fn update_header(&mut self, header: IndexHeader) -> IndexResult<()>;

    fn view_messages_count(&mut self) -> IndexResult<u32>;
    fn lookup(&mut self, seq: u32) -> IndexResult<Option<IndexMessage>>;
    fn lookup_uid(&mut self, seq: u32) -> IndexResult<Option<u32>>;
    fn lookup_uid_range(&mut self, uid1: u32, uid2: u32) -> IndexResult<Vec<IndexMessage>>;
    fn lookup_ext(&mut self, seq: u32, ext: ExtColumn) -> IndexResult<Option<ExtValue>>;

    fn append(&mut self, uid: u32, flags: MessageFlags, keywords: Vec<String>) -> IndexResult<u32>;
    fn expunge(&mut self, seq: u32) -> IndexResult<()>;
    fn update_flags(&mut self, seq: u32, mode: UpdateMode, flags: MessageFlags) -> IndexResult<()>;
    fn update_keywords(&mut self, seq: u32, mode: UpdateMode, set: &[String]) -> IndexResult<()>;
    fn update_ext(&mut self, seq: u32, ext: ExtColumn, value: ExtValue) -> IndexResult<()>;

    fn sync_next(&mut self) -> IndexResult<Option<SyncRecord>>;
    fn sync_reset(&mut self) -> IndexResult<()>;

    fn transaction_begin(&mut self) -> IndexResult<()>;
    fn transaction_commit(&mut self) -> IndexResult<()>;
    fn transaction_rollback(&mut self) -> IndexResult<()>;

    fn mark_corrupted(&mut self) -> IndexResult<()>;
}
