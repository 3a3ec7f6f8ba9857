//! Header handler and expunge handler (spec.md §4.3, §4.4): decide, per
//! message, whether its header must be rewritten in place, deferred, or
//! moved backward to fill expunged space.

use crate::mbox::rewriter::{RewriteRequest, Rewriter};
use crate::types::MessageFlags;

use super::context::SyncContext;
use super::record::MessageRecord;

#[derive(Debug)]
pub enum RewriteAction {
    /// Nothing to do (spec.md §4.3 Case C).
    None,
    /// Header rewritten in place; body/position unchanged.
    InPlaceHeader(Vec<u8>),
    /// Message moved backward by `delta` bytes (negative = toward the
    /// start of the file), optionally with its header rewritten at the
    /// same time.
    MoveBackward { delta: i64, header: Option<Vec<u8>> },
    /// Could not fit in place; a rewrite window was opened starting at
    /// this message (spec.md §4.5 "Space planner" now owns it).
    WindowOpened,
    /// Deferred: message marked dirty in the index only, no disk write
    /// (spec.md §4.3 Case B, `delay_writes`).
    DeferredDirty,
}

/// Decide and apply the header handler's action for a non-expunged
/// message (spec.md §4.3).
pub fn handle_header(
    ctx: &mut SyncContext,
    rec: &mut MessageRecord,
    header_changed: bool,
    rewriter: &impl Rewriter,
    req: &RewriteRequest,
) -> RewriteAction {
    if ctx.expunged_space > 0 && !ctx.has_open_window() {
        return handle_case_a(ctx, rec, rewriter, req);
    }

    if header_changed {
        return handle_case_b(ctx, rec, rewriter, req);
    }

    RewriteAction::None
}

/// Case A: pending expunged surplus and no open window — the message
/// must move backward by `-expunged_space` bytes.
fn handle_case_a(
    ctx: &mut SyncContext,
    rec: &mut MessageRecord,
    rewriter: &impl Rewriter,
    req: &RewriteRequest,
) -> RewriteAction {
    let delta = -ctx.expunged_space;
    match rewriter.try_in_place(req) {
        Ok(header_bytes) => {
            ctx.moved_offsets = true;
            ctx.expunged_space = 0;
            RewriteAction::MoveBackward {
                delta,
                header: Some(header_bytes),
            }
        }
        Err(_deficit) => {
            // Not enough padding even with the surplus: open a window and
            // fold the surplus into the cumulative space_diff so the
            // batch rewrite knows how much headroom already exists.
            ctx.open_window(rec.seq);
            ctx.space_diff += ctx.expunged_space;
            ctx.expunged_space = 0;
            RewriteAction::WindowOpened
        }
    }
}

/// Case B: no expunged surplus, but the header requires a rewrite (flag
/// change, missing X-UID, keyword delta) or a sync record applies.
fn handle_case_b(
    ctx: &mut SyncContext,
    rec: &mut MessageRecord,
    rewriter: &impl Rewriter,
    req: &RewriteRequest,
) -> RewriteAction {
    if ctx.delay_writes {
        rec.flags |= MessageFlags::DIRTY;
        return RewriteAction::DeferredDirty;
    }
    match rewriter.try_in_place(req) {
        Ok(header_bytes) => RewriteAction::InPlaceHeader(header_bytes),
        Err(deficit) => {
            ctx.open_window(rec.seq);
            ctx.space_diff -= deficit as i64;
            RewriteAction::WindowOpened
        }
    }
}

/// Expunge handler (spec.md §4.4): mark `rec` as reclaimable space and
/// roll it into `ctx.expunged_space`.
pub fn handle_expunge(ctx: &mut SyncContext, rec: &mut MessageRecord, file_len: usize) {
    rec.flags |= MessageFlags::EXPUNGED;
    let mut span = rec.total_span(file_len) as i64;
    if rec.seq == 1 {
        span += if ctx.first_mail_crlf_expunged { 2 } else { 1 };
        ctx.base_uid_last_offset = None;
    }
    rec.space = span;
    ctx.expunged_space += span;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::sync::context::SyncMode;

    fn record(seq: u32, from: usize, next: Option<usize>) -> MessageRecord {
        MessageRecord {
            seq,
            from_offset: from,
            header_offset: from,
            body_offset: from,
            body_size: 0,
            next_offset: next,
            uid: seq,
            flags: MessageFlags::empty(),
            keywords: vec![],
            space: 0,
            idx_seq: 0,
            md5: None,
            is_pseudo: false,
            uid_broken: false,
        }
    }

    #[test]
    fn expunge_accumulates_span_into_expunged_space() {
        let mut ctx = SyncContext::new(SyncConfig::default(), SyncMode::Full, false);
        let mut rec = record(2, 100, Some(250));
        handle_expunge(&mut ctx, &mut rec, 400);
        assert_eq!(ctx.expunged_space, 150);
        assert!(rec.flags.contains(MessageFlags::EXPUNGED));
    }

    #[test]
    fn first_message_expunge_consumes_extra_separator_byte() {
        let mut ctx = SyncContext::new(SyncConfig::default(), SyncMode::Full, false);
        ctx.base_uid_last_offset = Some(42);
        let mut rec = record(1, 0, Some(100));
        handle_expunge(&mut ctx, &mut rec, 400);
        assert_eq!(ctx.expunged_space, 101);
        assert!(ctx.base_uid_last_offset.is_none());
    }
}
