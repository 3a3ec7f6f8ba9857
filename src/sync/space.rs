//! Space planner (spec.md §4.5): the heart of the engine. Tracks
//! cumulative deficit/surplus across a window of messages and, once
//! `space_diff >= 0`, rewrites the whole window in one splice.

use std::ops::Range;

use crate::config::SyncConfig;

use super::context::SyncContext;
use super::record::MessageRecord;

/// One window member, captured with its original bytes before the flush
/// mutates the mbox buffer.
pub struct WindowEntry {
    pub rec: MessageRecord,
    pub from_line: Vec<u8>,
    /// `None` means this member is expunged and is dropped entirely;
    /// otherwise the fully rewritten header (including its trailing
    /// blank line and whatever padding share it was given).
    pub rewritten_header: Option<Vec<u8>>,
    pub body: Vec<u8>,
}

pub struct FlushResult {
    pub new_bytes: Vec<u8>,
    pub range: Range<usize>,
    /// (seq, absolute from_offset in the spliced file) for every
    /// surviving member, in order.
    pub offsets: Vec<(u32, usize)>,
    /// Net bytes reclaimed (positive) or grown (negative) by this flush.
    pub move_diff: i64,
}

/// A window is ready to flush once its cumulative `space_diff` reaches
/// zero or more (spec.md §3 invariant).
pub fn ready_to_flush(ctx: &SyncContext) -> bool {
    ctx.has_open_window() && ctx.space_diff >= 0
}

/// Compute how much of the accumulated surplus to spend as fresh padding
/// versus carry forward as `expunged_space` for the next window
/// (spec.md §4.5: "clamp so we do not waste too much").
pub fn padding_budget(ctx: &SyncContext, config: &SyncConfig, window_len: usize) -> (i64, i64) {
    let window_len = window_len as i64;
    let mut extra_space = config.header_padding as i64 * window_len;
    if extra_space > ctx.space_diff {
        extra_space = ctx.space_diff.max(0);
    }
    let leftover = (ctx.space_diff - extra_space).max(0);
    (extra_space, leftover)
}

/// Build the replacement bytes for `range` and reset the window.
/// `range_start` is the absolute offset of the first window member's
/// `From ` line in the original buffer.
pub fn flush(
    ctx: &mut SyncContext,
    entries: Vec<WindowEntry>,
    range: Range<usize>,
) -> FlushResult {
    let mut new_bytes = Vec::new();
    let mut offsets = Vec::new();

    for entry in &entries {
        if let Some(header) = &entry.rewritten_header {
            let start = range.start + new_bytes.len();
            new_bytes.extend_from_slice(&entry.from_line);
            new_bytes.extend_from_slice(header);
            new_bytes.extend_from_slice(&entry.body);
            offsets.push((entry.rec.seq, start));
        }
        // Expunged members contribute nothing: their bytes are dropped.
    }

    let old_span = range.end - range.start;
    let move_diff = old_span as i64 - new_bytes.len() as i64;

    ctx.moved_offsets = true;
    let (_, leftover) = padding_budget(ctx, &ctx.config.clone(), entries.len());
    ctx.reset_window();
    ctx.expunged_space = leftover;

    FlushResult {
        new_bytes,
        range,
        offsets,
        move_diff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::context::SyncMode;
    use crate::types::MessageFlags;

    fn dummy_record(seq: u32) -> MessageRecord {
        MessageRecord {
            seq,
            from_offset: 0,
            header_offset: 0,
            body_offset: 0,
            body_size: 0,
            next_offset: None,
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
    fn flush_drops_expunged_members_and_shrinks_span() {
        let mut ctx = SyncContext::new(SyncConfig::default(), SyncMode::Full, false);
        ctx.open_window(1);
        ctx.space_diff = 10;

        let entries = vec![
            WindowEntry {
                rec: dummy_record(1),
                from_line: b"From a\n".to_vec(),
                rewritten_header: Some(b"Status: R\n\n".to_vec()),
                body: b"hello\n".to_vec(),
            },
            WindowEntry {
                rec: dummy_record(2),
                from_line: b"From b\n".to_vec(),
                rewritten_header: None,
                body: b"gone\n".to_vec(),
            },
        ];

        let result = flush(&mut ctx, entries, 0..50);
        assert_eq!(result.offsets.len(), 1);
        assert_eq!(result.offsets[0].0, 1);
        assert!(result.move_diff > 0);
        assert!(!ctx.has_open_window());
    }
}
