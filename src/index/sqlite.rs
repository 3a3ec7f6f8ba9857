//! SQLite-backed `MessageIndex`, grounded on the teacher's `storage/db.rs`
//! schema and migration style. The sync engine above this type is fully
//! synchronous (spec.md §5); this is the one place `sqlx`'s async API is
//! driven via a private single-threaded Tokio runtime and `block_on`, so
//! the ambient persistence layer can keep using the teacher's stack
//! without smuggling concurrency into the engine itself.

use std::path::{Path, PathBuf};

use sqlx::{Row, SqlitePool};
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

use crate::types::MessageFlags;

use super::{
    ExtColumn, ExtValue, IndexError, IndexHeader, IndexMessage, IndexResult, MessageIndex,
    SyncRecord, SyncRecordType, UpdateMode,
};

pub struct SqliteIndex {
    rt: Runtime,
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteIndex {
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        let pool = rt
            .block_on(Self::connect_and_migrate(&path))
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        Ok(Self { rt, pool, path })
    }

    async fn connect_and_migrate(path: &Path) -> anyhow::Result<SqlitePool> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&url).await?;
        sqlx::query("PRAGMA foreign_keys = ON;").execute(&pool).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS folder_header (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                uid_validity INTEGER NOT NULL,
                next_uid INTEGER NOT NULL,
                sync_stamp INTEGER NOT NULL,
                sync_size INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY,
                uid INTEGER NOT NULL,
                flags INTEGER NOT NULL,
                keywords TEXT NOT NULL,
                from_offset INTEGER NOT NULL DEFAULT 0,
                md5hdr_ext BLOB
            );
            CREATE INDEX IF NOT EXISTS idx_messages_uid ON messages(uid);

            CREATE TABLE IF NOT EXISTS pending_ops (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uid1 INTEGER NOT NULL,
                uid2 INTEGER NOT NULL,
                kind TEXT NOT NULL,
                flags INTEGER NOT NULL,
                keywords TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_ops_created ON pending_ops(created_at);
            "#,
        )
        .execute(&pool)
        .await?;

        let exists: i64 = sqlx::query("SELECT COUNT(*) FROM folder_header")
            .fetch_one(&pool)
            .await?
            .get(0);
        if exists == 0 {
            sqlx::query(
                "INSERT INTO folder_header (id, uid_validity, next_uid, sync_stamp, sync_size) VALUES (1, 0, 1, 0, 0)",
            )
            .execute(&pool)
            .await?;
        }

        Ok(pool)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn call<F, T>(&self, fut: F) -> IndexResult<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        self.rt.block_on(fut).map_err(|e| {
            warn!(error = %e, "index backend error");
            IndexError::Backend(e.to_string())
        })
    }
}

fn encode_keywords(kw: &[String]) -> String {
    kw.join("\u{1f}")
}

fn decode_keywords(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        Vec::new()
    } else {
        raw.split('\u{1f}').map(|s| s.to_string()).collect()
    }
}

fn record_kind_to_str(kind: &SyncRecordType) -> &'static str {
    match kind {
        SyncRecordType::Append => "append",
        SyncRecordType::Expunge => "expunge",
        SyncRecordType::Flags => "flags",
        SyncRecordType::KeywordAdd => "keyword_add",
        SyncRecordType::KeywordRemove => "keyword_remove",
        SyncRecordType::KeywordReset => "keyword_reset",
    }
}

fn record_kind_from_str(s: &str) -> SyncRecordType {
    match s {
        "expunge" => SyncRecordType::Expunge,
        "flags" => SyncRecordType::Flags,
        "keyword_add" => SyncRecordType::KeywordAdd,
        "keyword_remove" => SyncRecordType::KeywordRemove,
        "keyword_reset" => SyncRecordType::KeywordReset,
        _ => SyncRecordType::Append,
    }
}

impl MessageIndex for SqliteIndex {
    fn header(&mut self) -> IndexResult<IndexHeader> {
        let pool = self.pool.clone();
        self.call(async move {
            let row = sqlx::query(
                "SELECT uid_validity, next_uid, sync_stamp, sync_size FROM folder_header WHERE id = 1",
            )
            .fetch_one(&pool)
            .await?;
            Ok(IndexHeader {
                uid_validity: row.get::<i64, _>(0) as u32,
                next_uid: row.get::<i64, _>(1) as u32,
                sync_stamp: row.get(2),
                sync_size: row.get::<i64, _>(3) as u64,
            })
        })
    }

    fn update_header(&mut self, header: IndexHeader) -> IndexResult<()> {
        let pool = self.pool.clone();
        self.call(async move {
            sqlx::query(
                "UPDATE folder_header SET uid_validity = ?1, next_uid = ?2, sync_stamp = ?3, sync_size = ?4 WHERE id = 1",
            )
            .bind(header.uid_validity as i64)
            .bind(header.next_uid as i64)
            .bind(header.sync_stamp)
            .bind(header.sync_size as i64)
            .execute(&pool)
            .await?;
            Ok(())
        })
    }

    fn view_messages_count(&mut self) -> IndexResult<u32> {
        let pool = self.pool.clone();
        self.call(async move {
            let n: i64 = sqlx::query("SELECT COUNT(*) FROM messages")
                .fetch_one(&pool)
                .await?
                .get(0);
            Ok(n as u32)
        })
    }

    fn lookup(&mut self, seq: u32) -> IndexResult<Option<IndexMessage>> {
        let pool = self.pool.clone();
        self.call(async move {
            let row = sqlx::query(
                "SELECT seq, uid, flags, keywords, from_offset FROM messages WHERE seq = ?1",
            )
            .bind(seq as i64)
            .fetch_optional(&pool)
            .await?;
            Ok(row.map(|row| IndexMessage {
                seq: row.get::<i64, _>(0) as u32,
                uid: row.get::<i64, _>(1) as u32,
                flags: MessageFlags::from_bits_truncate(row.get::<i64, _>(2) as u16),
                keywords: decode_keywords(&row.get::<String, _>(3)),
                from_offset: row.get::<i64, _>(4) as u64,
            }))
        })
    }

    fn lookup_uid(&mut self, seq: u32) -> IndexResult<Option<u32>> {
        Ok(self.lookup(seq)?.map(|m| m.uid))
    }

    fn lookup_uid_range(&mut self, uid1: u32, uid2: u32) -> IndexResult<Vec<IndexMessage>> {
        let pool = self.pool.clone();
        self.call(async move {
            let rows = sqlx::query(
                "SELECT seq, uid, flags, keywords, from_offset FROM messages WHERE uid BETWEEN ?1 AND ?2 ORDER BY seq",
            )
            .bind(uid1 as i64)
            .bind(uid2 as i64)
            .fetch_all(&pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|row| IndexMessage {
                    seq: row.get::<i64, _>(0) as u32,
                    uid: row.get::<i64, _>(1) as u32,
                    flags: MessageFlags::from_bits_truncate(row.get::<i64, _>(2) as u16),
                    keywords: decode_keywords(&row.get::<String, _>(3)),
                    from_offset: row.get::<i64, _>(4) as u64,
                })
                .collect())
        })
    }

    fn lookup_ext(&mut self, seq: u32, ext: ExtColumn) -> IndexResult<Option<ExtValue>> {
        match ext {
            ExtColumn::Md5Hdr => {
                let pool = self.pool.clone();
                self.call(async move {
                    let row = sqlx::query("SELECT md5hdr_ext FROM messages WHERE seq = ?1")
                        .bind(seq as i64)
                        .fetch_optional(&pool)
                        .await?;
                    Ok(row.and_then(|row| {
                        row.get::<Option<Vec<u8>>, _>(0).and_then(|bytes| {
                            let arr: [u8; 16] = bytes.try_into().ok()?;
                            Some(ExtValue::Md5(arr))
                        })
                    }))
                })
            }
            ExtColumn::FromOffset => Ok(self.lookup(seq)?.map(|m| ExtValue::FromOffset(m.from_offset))),
        }
    }

    fn append(&mut self, uid: u32, flags: MessageFlags, keywords: Vec<String>) -> IndexResult<u32> {
        let pool = self.pool.clone();
        let kw = encode_keywords(&keywords);
        self.call(async move {
            let row = sqlx::query(
                "INSERT INTO messages (seq, uid, flags, keywords, from_offset) \
                 VALUES ((SELECT COALESCE(MAX(seq), 0) + 1 FROM messages), ?1, ?2, ?3, 0) \
                 RETURNING seq",
            )
            .bind(uid as i64)
            .bind(flags.bits() as i64)
            .bind(kw)
            .fetch_one(&pool)
            .await?;
            Ok(row.get::<i64, _>(0) as u32)
        })
    }

    fn expunge(&mut self, seq: u32) -> IndexResult<()> {
        let pool = self.pool.clone();
        self.call(async move {
            sqlx::query("DELETE FROM messages WHERE seq = ?1")
                .bind(seq as i64)
                .execute(&pool)
                .await?;
            sqlx::query("UPDATE messages SET seq = seq - 1 WHERE seq > ?1")
                .bind(seq as i64)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }

    fn update_flags(&mut self, seq: u32, mode: UpdateMode, flags: MessageFlags) -> IndexResult<()> {
        let current = self
            .lookup(seq)?
            .ok_or(IndexError::NotFound(seq))?
            .flags;
        let new_flags = match mode {
            UpdateMode::Add => current | flags,
            UpdateMode::Remove => current & !flags,
            UpdateMode::Replace => flags,
        };
        let pool = self.pool.clone();
        self.call(async move {
            sqlx::query("UPDATE messages SET flags = ?1 WHERE seq = ?2")
                .bind(new_flags.bits() as i64)
                .bind(seq as i64)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }

    fn update_keywords(&mut self, seq: u32, mode: UpdateMode, set: &[String]) -> IndexResult<()> {
        let current = self.lookup(seq)?.ok_or(IndexError::NotFound(seq))?.keywords;
        let new_keywords = match mode {
            UpdateMode::Add => {
                let mut merged = current;
                for kw in set {
                    if !merged.contains(kw) {
                        merged.push(kw.clone());
                    }
                }
                merged
            }
            UpdateMode::Remove => current.into_iter().filter(|k| !set.contains(k)).collect(),
            UpdateMode::Replace => set.to_vec(),
        };
        let pool = self.pool.clone();
        let encoded = encode_keywords(&new_keywords);
        self.call(async move {
            sqlx::query("UPDATE messages SET keywords = ?1 WHERE seq = ?2")
                .bind(encoded)
                .bind(seq as i64)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }

    fn update_ext(&mut self, seq: u32, ext: ExtColumn, value: ExtValue) -> IndexResult<()> {
        match (ext, value) {
            (ExtColumn::Md5Hdr, ExtValue::Md5(bytes)) => {
                let pool = self.pool.clone();
                self.call(async move {
                    sqlx::query("UPDATE messages SET md5hdr_ext = ?1 WHERE seq = ?2")
                        .bind(bytes.to_vec())
                        .bind(seq as i64)
                        .execute(&pool)
                        .await?;
                    Ok(())
                })
            }
            (ExtColumn::FromOffset, ExtValue::FromOffset(off)) => {
                let pool = self.pool.clone();
                self.call(async move {
                    sqlx::query("UPDATE messages SET from_offset = ?1 WHERE seq = ?2")
                        .bind(off as i64)
                        .bind(seq as i64)
                        .execute(&pool)
                        .await?;
                    Ok(())
                })
            }
            _ => Err(IndexError::Backend("ext column/value mismatch".into())),
        }
    }

    fn sync_next(&mut self) -> IndexResult<Option<SyncRecord>> {
        let pool = self.pool.clone();
        self.call(async move {
            let row = sqlx::query(
                "SELECT id, uid1, uid2, kind, flags, keywords FROM pending_ops ORDER BY id ASC LIMIT 1",
            )
            .fetch_optional(&pool)
            .await?;
            let Some(row) = row else { return Ok(None) };
            let id: i64 = row.get(0);
            sqlx::query("DELETE FROM pending_ops WHERE id = ?1")
                .bind(id)
                .execute(&pool)
                .await?;
            Ok(Some(SyncRecord {
                uid1: row.get::<i64, _>(1) as u32,
                uid2: row.get::<i64, _>(2) as u32,
                kind: record_kind_from_str(&row.get::<String, _>(3)),
                flags: MessageFlags::from_bits_truncate(row.get::<i64, _>(4) as u16),
                keywords: decode_keywords(&row.get::<String, _>(5)),
            }))
        })
    }

    fn sync_reset(&mut self) -> IndexResult<()> {
        let pool = self.pool.clone();
        self.call(async move {
            sqlx::query("DELETE FROM pending_ops").execute(&pool).await?;
            Ok(())
        })
    }

    fn transaction_begin(&mut self) -> IndexResult<()> {
        let pool = self.pool.clone();
        self.call(async move {
            sqlx::query("BEGIN").execute(&pool).await?;
            Ok(())
        })
    }

    fn transaction_commit(&mut self) -> IndexResult<()> {
        let pool = self.pool.clone();
        self.call(async move {
            sqlx::query("COMMIT").execute(&pool).await?;
            Ok(())
        })
    }

    fn transaction_rollback(&mut self) -> IndexResult<()> {
        let pool = self.pool.clone();
        self.call(async move {
            sqlx::query("ROLLBACK").execute(&pool).await?;
            Ok(())
        })
    }

    fn mark_corrupted(&mut self) -> IndexResult<()> {
        warn!(path = %self.path.display(), "index marked corrupted");
        Ok(())
    }
}

/// Queue a pending modification for a later `sync_next()` to pick up.
/// Not part of the `MessageIndex` trait (spec.md §6 doesn't name a queue
/// producer, only the consumer side) — ambient helper used by callers that
/// feed the index (e.g. from an external source of truth).
impl SqliteIndex {
    pub fn queue_record(&mut self, record: &SyncRecord) -> IndexResult<()> {
        let pool = self.pool.clone();
        let kind = record_kind_to_str(&record.kind).to_string();
        let keywords = encode_keywords(&record.keywords);
        let uid1 = record.uid1;
        let uid2 = record.uid2;
        let flags = record.flags;
        self.call(async move {
            sqlx::query(
                "INSERT INTO pending_ops (uid1, uid2, kind, flags, keywords, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(uid1 as i64)
            .bind(uid2 as i64)
            .bind(kind)
            .bind(flags.bits() as i64)
            .bind(keywords)
            .bind(crate::types::now_ts())
            .execute(&pool)
            .await?;
            Ok(())
        })
    }
}
