//! Driver (spec.md §4.1): top-level loop choosing partial vs full,
//! retrying on failure up to three times, finalising the folder header
//! and the pseudo message, and managing locks end to end.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::errors::{SyncError, SyncResult};
use crate::index::{
    ExtColumn, ExtValue, IndexError, IndexHeader, IndexMessage, MessageIndex, SyncRecordType,
};
use crate::locking::{FileLock, LockGuard, LockKind};
use crate::mbox::format::{PSEUDO_WARNING_BODY, UID_LAST_WIDTH};
use crate::mbox::parser::{MboxParser, Parser};
use crate::mbox::rewriter::{rewrite_uid_last_in_place, HeaderRewriter, RewriteRequest, Rewriter};
use crate::mbox::MboxFile;
use crate::types::{now_ts, MessageFlags, MAIL_FLAGS_MASK};

use super::change::{self, ChangeState};
use super::context::{SyncContext, SyncMode};
use super::header::{self as header_mod, RewriteAction};
use super::indexer;
use super::reader::Reader;
use super::records::PendingRecords;
use super::seek::{self, SeekDecision};
use super::space::{self, WindowEntry};

/// Sync flags (spec.md §6 "Sync flags"). `lock_reading` stands in for the
/// spec's separate "read-only" condition too: this crate's CLI only
/// exposes the six named flags, so a caller that wants a strictly
/// read-only pass requests it via `lock_reading`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncFlags {
    pub force_full: bool,
    pub undirty: bool,
    pub rewrite: bool,
    pub lock_reading: bool,
    pub last_commit: bool,
    pub header_only: bool,
}

/// Highest assignable UID before `renumber_uids` kicks in (spec.md §4.2:
/// "if `next_uid` wraps to -1" — modelled as exhausting the positive
/// range of a 32-bit signed UID space).
const UID_MAX: u32 = i32::MAX as u32;

const MTIME_BUMP_SLEEP: Duration = Duration::from_millis(500);

pub struct Driver<I: MessageIndex, L: FileLock> {
    mbox_path: PathBuf,
    index: I,
    lock: L,
    config: SyncConfig,
}

fn index_err(e: IndexError) -> SyncError {
    SyncError::Index(e.to_string())
}

impl<I: MessageIndex, L: FileLock> Driver<I, L> {
    pub fn new(mbox_path: impl Into<PathBuf>, index: I, lock: L, config: SyncConfig) -> Self {
        Self {
            mbox_path: mbox_path.into(),
            index,
            lock,
            config,
        }
    }

    pub fn mbox_path(&self) -> &Path {
        &self.mbox_path
    }

    pub fn index_mut(&mut self) -> &mut I {
        &mut self.index
    }

    /// Entry point (spec.md §4.1).
    pub fn run(&mut self, flags: SyncFlags) -> SyncResult<()> {
        let metadata = fs::metadata(&self.mbox_path)?;
        let size = metadata.len();
        let mtime = mtime_secs(&metadata);

        let header = self.index.header().map_err(index_err)?;
        // `last_commit` treats the index header's own sync_stamp as the
        // authoritative commit point and skips re-deriving change state
        // from a fresh stat; `undirty` accepts a dirty-but-unchanged disk
        // as if nothing needs doing rather than forcing a full rewrite.
        let state = if flags.last_commit {
            ChangeState::Unchanged
        } else {
            change::detect(mtime, size, &header, flags.undirty)
        };
        let unchanged = matches!(state, ChangeState::Unchanged | ChangeState::DirtyButUnchanged);

        let read_only = flags.lock_reading;
        let lock_kind = if read_only { LockKind::Read } else { LockKind::Write };

        let file = fs::OpenOptions::new().read(true).write(!read_only).open(&self.mbox_path)?;
        let guard = LockGuard::acquire(&self.lock, &file, lock_kind)?;

        // spec.md §9 open question: header-only bypasses this early exit,
        // since its whole point is to (re)write the header/pseudo message
        // even when the body of the mbox hasn't changed.
        if read_only && unchanged && !flags.header_only {
            debug!(mbox = %self.mbox_path.display(), "read-only pass on unchanged mbox, nothing to do");
            return Ok(());
        }

        self.index.transaction_begin().map_err(index_err)?;
        self.index.sync_reset().map_err(index_err)?;

        let mut mode = if flags.force_full || !unchanged {
            SyncMode::Full
        } else {
            SyncMode::Partial
        };

        let outcome = self.retry_loop(&mut mode, &flags, read_only, size);

        match outcome {
            Ok(()) => {
                self.index.transaction_commit().map_err(index_err)?;
                if read_only {
                    guard.downgrade()?;
                }
                Ok(())
            }
            Err(e) => {
                let _ = self.index.transaction_rollback();
                Err(e)
            }
        }
    }

    fn retry_loop(
        &mut self,
        mode: &mut SyncMode,
        flags: &SyncFlags,
        read_only: bool,
        original_size: u64,
    ) -> SyncResult<()> {
        let mut last_err = None;
        for attempt in 0..self.config.max_retries {
            let mut mbox = MboxFile::open(&self.mbox_path)?;
            if !read_only {
                self.ensure_pseudo_message(&mut mbox)?;
            }
            match self.run_pass(&mut mbox, *mode, flags, read_only) {
                Ok(mut ctx) => {
                    self.finalize(&mut mbox, &mut ctx, original_size)?;
                    return Ok(());
                }
                Err(e) if e.is_locally_recoverable() => {
                    warn!(attempt, error = %e, "sync pass downgraded to full, retrying");
                    *mode = SyncMode::Full;
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(SyncError::PartialInvalid))
    }

    /// One sync-loop pass (spec.md §4.2 through §4.7).
    fn run_pass(
        &mut self,
        mbox: &mut MboxFile,
        mode: SyncMode,
        flags: &SyncFlags,
        read_only: bool,
    ) -> SyncResult<SyncContext> {
        let mut ctx = SyncContext::new(self.config, mode, read_only);
        let header = self.index.header().map_err(index_err)?;
        ctx.next_uid = header.next_uid.max(1);
        ctx.idx_next_uid = header.next_uid.max(1);

        let parser = MboxParser;
        let reader = Reader::new(&parser);
        let rewriter = HeaderRewriter;
        let mut pending = PendingRecords::new();

        let mut offset = 0usize;
        // Count of non-pseudo messages seen, i.e. the index's own sequence
        // numbering; `rec.seq` is the raw scan cursor and also counts the
        // pseudo message, so it cannot be used to decide how many tail
        // index entries are now stale.
        let mut last_seq = 0u32;
        // Highest UID already resolved against the index earlier in this
        // pass; bounds `expunge_behind` so it never re-examines an entry
        // this same pass already matched to a still-present message.
        let mut last_confirmed_uid = 0u32;

        loop {
            let file_len = mbox.len();
            let Some(mut rec) = reader.read_next(mbox.buf(), offset, &mut ctx)? else {
                break;
            };

            if rec.is_pseudo {
                if let Some(base_v) = ctx.base_uid_validity {
                    if header.uid_validity != 0 && base_v != header.uid_validity {
                        let _ = self.index.mark_corrupted();
                        return Err(crate::errors::CorruptionKind::UidValidityMismatch.into());
                    }
                }
                offset = rec.next_offset.unwrap_or(mbox.len());
                if offset >= mbox.len() {
                    break;
                }
                continue;
            }

            if flags.header_only {
                // Only the pseudo message / folder header is in scope;
                // leave the rest of the mbox and the index untouched.
                last_seq = 0;
                break;
            }

            if rec.uid_broken && ctx.is_partial() {
                ctx.mbox_sync_dirty = true;
                return Err(SyncError::PartialInvalid);
            }

            let existing = self.resolve_existing(&mut ctx, &mut rec, read_only, last_confirmed_uid)?;
            let existing = match existing {
                ResolveOutcome::Found(msg) => Some(msg),
                ResolveOutcome::NotFound => None,
                ResolveOutcome::Exhausted => {
                    ctx.renumber_uids = true;
                    return Err(SyncError::UidExhausted);
                }
            };
            last_confirmed_uid = rec.uid;

            let sync_records = pending.pull_for_uid(&mut self.index, rec.uid)?;
            let is_expunged = sync_records
                .iter()
                .any(|r| r.kind == SyncRecordType::Expunge);

            let mut window_opened = false;
            if is_expunged {
                header_mod::handle_expunge(&mut ctx, &mut rec, file_len);
            } else {
                apply_sync_records(&mut rec, &sync_records);
                let header_changed = header_needs_rewrite(&rec, existing.as_ref(), flags.rewrite);
                let original_header = mbox.buf()[rec.header_offset..rec.body_offset].to_vec();
                let req = RewriteRequest {
                    original: &original_header,
                    flags: rec.flags,
                    uid: Some(rec.uid),
                    keywords: &rec.keywords,
                    uid_validity: None,
                    uid_last: None,
                    is_pseudo: false,
                };
                let action = header_mod::handle_header(&mut ctx, &mut rec, header_changed, &rewriter, &req);
                window_opened = matches!(action, RewriteAction::WindowOpened);
                self.apply_action(mbox, &rec, action)?;
            }

            let will_move_again = window_opened || ctx.has_open_window();
            if !is_expunged {
                indexer::reconcile(&mut self.index, &rec, existing, self.config.md5_enabled, will_move_again)
                    .map_err(index_err)?;
                last_seq += 1;
            } else if let Some(existing) = existing {
                let _ = self.index.expunge(existing.seq);
            }

            // Anything physically inside an open window's eventual splice
            // range must become a window member, not just the record whose
            // own action happened to open or re-open it — `apply_flush`
            // rebuilds the whole byte span from `ctx.window` alone, so a
            // skipped member's bytes would simply vanish from the output.
            if will_move_again {
                ctx.window.push(rec.clone());
            }

            offset = rec.next_offset.unwrap_or(mbox.len());

            if space::ready_to_flush(&ctx) {
                self.apply_flush(mbox, &mut ctx, &rewriter)?;
            }

            if ctx.is_partial() {
                match seek::decide(&ctx, &pending, &mut self.index) {
                    SeekDecision::Continue => {}
                    SeekDecision::SeekTo { seq, offset: new_off } => {
                        ctx.seq = seq.saturating_sub(1);
                        offset = new_off;
                    }
                    SeekDecision::StopEarly => break,
                }
            }

            if offset >= mbox.len() {
                break;
            }
        }

        if !flags.header_only {
            indexer::expunge_tail(&mut self.index, last_seq).map_err(index_err)?;
        }
        ctx.seq = last_seq;
        Ok(ctx)
    }

    fn resolve_existing(
        &mut self,
        ctx: &mut SyncContext,
        rec: &mut super::record::MessageRecord,
        read_only: bool,
        last_confirmed_uid: u32,
    ) -> SyncResult<ResolveOutcome> {
        if rec.uid != 0 {
            indexer::expunge_behind(&mut self.index, last_confirmed_uid, rec.uid).map_err(index_err)?;
            let found = self
                .index
                .lookup_uid_range(rec.uid, rec.uid)
                .map_err(index_err)?
                .into_iter()
                .next();
            return Ok(match found {
                Some(m) => ResolveOutcome::Found(m),
                None => ResolveOutcome::NotFound,
            });
        }

        if self.config.md5_enabled {
            if let Some(md5) = rec.md5 {
                if let Some(found) = self.find_by_md5(md5)? {
                    rec.uid = found.uid;
                    return Ok(ResolveOutcome::Found(found));
                }
            }
        }

        if read_only {
            return Ok(ResolveOutcome::NotFound);
        }

        if ctx.next_uid >= UID_MAX {
            return Ok(ResolveOutcome::Exhausted);
        }
        rec.uid = ctx.next_uid;
        ctx.next_uid += 1;
        Ok(ResolveOutcome::NotFound)
    }

    fn find_by_md5(&mut self, md5: [u8; 16]) -> SyncResult<Option<IndexMessage>> {
        let count = self.index.view_messages_count().map_err(index_err)?;
        for seq in 1..=count {
            if let Some(ExtValue::Md5(stored)) = self
                .index
                .lookup_ext(seq, ExtColumn::Md5Hdr)
                .map_err(index_err)?
            {
                if stored == md5 {
                    return Ok(self.index.lookup(seq).map_err(index_err)?);
                }
            }
        }
        Ok(None)
    }

    fn apply_action(
        &mut self,
        mbox: &mut MboxFile,
        rec: &super::record::MessageRecord,
        action: RewriteAction,
    ) -> SyncResult<()> {
        match action {
            RewriteAction::None | RewriteAction::WindowOpened | RewriteAction::DeferredDirty => Ok(()),
            RewriteAction::InPlaceHeader(bytes) => {
                mbox.splice(rec.header_offset..rec.body_offset, &bytes);
                Ok(())
            }
            RewriteAction::MoveBackward { delta, header } => {
                let span_end = rec.next_offset.unwrap_or(mbox.len());
                let body_and_from = mbox.buf()[rec.from_offset..span_end].to_vec();
                let new_start = (rec.from_offset as i64 + delta).max(0) as usize;
                let replaced_header = header.unwrap_or_else(|| {
                    mbox.buf()[rec.header_offset..rec.body_offset].to_vec()
                });
                let mut rebuilt = Vec::with_capacity(body_and_from.len());
                let from_line = &body_and_from[..rec.header_offset - rec.from_offset];
                let body = &body_and_from[rec.body_offset - rec.from_offset..];
                rebuilt.extend_from_slice(from_line);
                rebuilt.extend_from_slice(&replaced_header);
                rebuilt.extend_from_slice(body);
                mbox.splice(new_start..span_end, &rebuilt);
                Ok(())
            }
        }
    }

    /// Build window entries from `ctx.window`, ask the space planner to
    /// flush, then splice the result into `mbox` and update the index's
    /// stored `from_offset` for every surviving member.
    fn apply_flush(
        &mut self,
        mbox: &mut MboxFile,
        ctx: &mut SyncContext,
        rewriter: &HeaderRewriter,
    ) -> SyncResult<()> {
        if ctx.window.is_empty() {
            ctx.reset_window();
            return Ok(());
        }
        let window_len = ctx.window.len();
        let (extra_space, _leftover) = space::padding_budget(ctx, &self.config, window_len);
        let survivors = ctx
            .window
            .iter()
            .filter(|r| !r.flags.contains(MessageFlags::EXPUNGED))
            .count()
            .max(1);
        let per_member_padding = (extra_space / survivors as i64).max(0) as usize;

        let range_start = ctx.window.first().unwrap().from_offset;
        let range_end = ctx
            .window
            .last()
            .unwrap()
            .next_offset
            .unwrap_or(mbox.len());

        let mut entries = Vec::with_capacity(window_len);
        for rec in &ctx.window {
            let span_end = rec.next_offset.unwrap_or(mbox.len());
            let from_line = mbox.buf()[rec.from_offset..rec.header_offset].to_vec();
            let body = mbox.buf()[rec.body_offset..span_end].to_vec();
            let rewritten_header = if rec.flags.contains(MessageFlags::EXPUNGED) {
                None
            } else {
                let original_header = mbox.buf()[rec.header_offset..rec.body_offset].to_vec();
                let req = RewriteRequest {
                    original: &original_header,
                    flags: rec.flags,
                    uid: Some(rec.uid),
                    keywords: &rec.keywords,
                    uid_validity: None,
                    uid_last: None,
                    is_pseudo: false,
                };
                Some(rewriter.rewrite_with_padding(&req, per_member_padding))
            };
            entries.push(WindowEntry {
                rec: rec.clone(),
                from_line,
                rewritten_header,
                body,
            });
        }

        let result = space::flush(ctx, entries, range_start..range_end);
        mbox.splice(result.range.clone(), &result.new_bytes);
        for (seq, abs_offset) in &result.offsets {
            if let Some(msg) = self
                .index
                .lookup_uid_range(0, u32::MAX)
                .map_err(index_err)?
                .into_iter()
                .find(|m| m.seq == *seq)
            {
                self.index
                    .update_ext(msg.seq, ExtColumn::FromOffset, ExtValue::FromOffset(*abs_offset as u64))
                    .map_err(index_err)?;
            }
        }
        Ok(())
    }

    /// Prepend a pseudo message (spec.md's "synthetic first message... via
    /// X-IMAP/X-IMAPbase") if the mbox doesn't already start with one. A
    /// brand-new folder gains its UID validity here rather than at
    /// finalisation, so the rest of the pass (UID assignment, the space
    /// planner's offsets) sees it like any other message from the start.
    fn ensure_pseudo_message(&mut self, mbox: &mut MboxFile) -> SyncResult<()> {
        if mbox.is_empty() {
            return Ok(());
        }
        let parser = MboxParser;
        let Some(raw) = parser.parse_at(mbox.buf(), 0)? else {
            return Ok(());
        };
        if raw.headers.is_pseudo {
            return Ok(());
        }
        let header = self.index.header().map_err(index_err)?;
        let validity = if header.uid_validity != 0 {
            header.uid_validity
        } else {
            now_ts() as u32
        };
        let last = header.next_uid.saturating_sub(1);
        let pseudo = build_pseudo_message(validity, last);
        mbox.splice(0..0, &pseudo);
        Ok(())
    }

    /// Finalisation (spec.md §4.8).
    fn finalize(&mut self, mbox: &mut MboxFile, ctx: &mut SyncContext, original_size: u64) -> SyncResult<()> {
        if ctx.has_open_window() {
            // Pad with MBOX_HEADER_PADDING * window_len and let the flush
            // distribute it as fresh trailing padding on each member's
            // rewritten header; this is how the file grows at EOF.
            let window_len = ctx.window.len();
            ctx.space_diff += (self.config.header_padding * window_len) as i64;
            self.apply_flush(mbox, ctx, &HeaderRewriter)?;
        }

        if ctx.expunged_space > 0 {
            let new_len = mbox.len().saturating_sub(ctx.expunged_space as usize);
            mbox.truncate(new_len);
            ctx.expunged_space = 0;
            if mbox.is_empty() {
                let validity = ctx.base_uid_validity.unwrap_or_else(|| now_ts() as u32);
                let last = ctx.next_uid.saturating_sub(1);
                mbox.extend(&build_pseudo_message(validity, last));
            }
        }

        mbox.flush().or_else(|e| {
            if matches!(e, SyncError::Io(ref io) if io.raw_os_error() == Some(libc::ENOSPC)) {
                let _ = mbox.truncate_to_empty();
                Err(SyncError::DiskFull)
            } else {
                Err(e)
            }
        })?;

        if ctx.moved_offsets && mbox.len() as u64 == original_size {
            self.bump_mtime()?;
        }

        let uid_validity = ctx
            .base_uid_validity
            .filter(|v| *v != 0)
            .unwrap_or_else(|| now_ts() as u32);
        let metadata = fs::metadata(&self.mbox_path)?;
        let new_header = IndexHeader {
            uid_validity,
            next_uid: ctx.next_uid,
            sync_stamp: mtime_secs(&metadata),
            sync_size: metadata.len(),
        };
        self.index.update_header(new_header).map_err(index_err)?;

        if let (Some(base_last), Some(offset)) = (ctx.base_uid_last, ctx.base_uid_last_offset) {
            let expected_last = ctx.next_uid.saturating_sub(1);
            if base_last != expected_last {
                rewrite_uid_last_in_place(mbox.buf_mut(), offset, base_last, expected_last)?;
                mbox.flush()?;
            }
        }

        Ok(())
    }

    fn bump_mtime(&self) -> SyncResult<()> {
        let before = fs::metadata(&self.mbox_path)?.modified()?;
        loop {
            let file = fs::OpenOptions::new().append(true).open(&self.mbox_path)?;
            file.set_modified(SystemTime::now())?;
            let after = fs::metadata(&self.mbox_path)?.modified()?;
            if after > before {
                return Ok(());
            }
            thread::sleep(MTIME_BUMP_SLEEP);
        }
    }
}

enum ResolveOutcome {
    Found(IndexMessage),
    NotFound,
    Exhausted,
}

fn header_needs_rewrite(
    rec: &super::record::MessageRecord,
    existing: Option<&IndexMessage>,
    force_rewrite: bool,
) -> bool {
    if force_rewrite {
        return true;
    }
    match existing {
        None => true, // missing X-UID etc.
        Some(existing) => {
            (rec.flags & MAIL_FLAGS_MASK) != (existing.flags & MAIL_FLAGS_MASK)
                || rec.keywords != existing.keywords
        }
    }
}

fn apply_sync_records(rec: &mut super::record::MessageRecord, records: &[crate::index::SyncRecord]) {
    for record in records {
        match record.kind {
            SyncRecordType::Flags => rec.flags = record.flags,
            SyncRecordType::KeywordAdd => {
                for kw in &record.keywords {
                    if !rec.keywords.contains(kw) {
                        rec.keywords.push(kw.clone());
                    }
                }
            }
            SyncRecordType::KeywordRemove => {
                rec.keywords.retain(|k| !record.keywords.contains(k));
            }
            SyncRecordType::KeywordReset => rec.keywords = record.keywords.clone(),
            SyncRecordType::Append | SyncRecordType::Expunge => {}
        }
    }
}

fn build_pseudo_message(uid_validity: u32, uid_last: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"From Mailer-Daemon MBOXSYNC-INTERNAL\n");
    out.extend_from_slice(
        format!("X-IMAPbase: {uid_validity} {uid_last:0width$}\n", width = UID_LAST_WIDTH).as_bytes(),
    );
    out.push(b'\n');
    out.extend_from_slice(PSEUDO_WARNING_BODY.as_bytes());
    out
}

fn mtime_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
