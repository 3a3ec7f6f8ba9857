//! Seek coordinator (spec.md §4.6, partial mode only): after each
//! message, decide whether to keep reading sequentially, jump ahead to
//! the next UID with pending work, or stop early. A stale seek target
//! only degrades this pass to sequential reads; a hard restart into a
//! full pass is a separate, §7(e) concern the driver signals itself.

use crate::index::{ExtColumn, ExtValue, MessageIndex};

use super::context::SyncContext;
use super::records::PendingRecords;

#[derive(Debug, PartialEq, Eq)]
pub enum SeekDecision {
    Continue,
    SeekTo { seq: u32, offset: usize },
    StopEarly,
}

/// Consult the pending sync-record stream and decide how to proceed.
pub fn decide(
    ctx: &SyncContext,
    pending: &PendingRecords,
    index: &mut impl MessageIndex,
) -> SeekDecision {
    if !ctx.is_partial() {
        return SeekDecision::Continue;
    }

    let Some(next_uid) = pending.next_pending_uid() else {
        if !ctx.mbox_sync_dirty {
            return SeekDecision::StopEarly;
        }
        return SeekDecision::Continue;
    };

    match locate_uid(index, next_uid) {
        Ok(Some((seq, offset))) => SeekDecision::SeekTo { seq, offset },
        // A stale/missing offset extension is a soft failure (spec.md
        // §4.6): give up jumping ahead and keep reading sequentially for
        // the rest of this pass. This is distinct from §7(e)'s UID-ordering
        // hard restart, which the driver signals separately via
        // `SyncError::PartialInvalid`.
        Ok(None) => SeekDecision::Continue,
        Err(_) => SeekDecision::Continue,
    }
}

/// Binary-search the index view for `uid`'s sequence and stored
/// `from_offset` (spec.md §4.6: "seek fails (stale offset in index
/// extension), degrade to sequential for the remainder").
fn locate_uid(
    index: &mut impl MessageIndex,
    uid: u32,
) -> Result<Option<(u32, usize)>, crate::index::IndexError> {
    let matches = index.lookup_uid_range(uid, uid)?;
    let Some(msg) = matches.into_iter().next() else {
        return Ok(None);
    };
    match index.lookup_ext(msg.seq, ExtColumn::FromOffset)? {
        Some(ExtValue::FromOffset(off)) => Ok(Some((msg.seq, off as usize))),
        _ => Ok(None),
    }
}
