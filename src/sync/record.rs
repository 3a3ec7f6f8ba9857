//! Per-message bookkeeping for one sync pass (spec.md §3 "Message record").

use crate::types::MessageFlags;

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub seq: u32,
    pub from_offset: usize,
    pub header_offset: usize,
    pub body_offset: usize,
    pub body_size: usize,
    /// Offset of the next message's `From ` line, or `None` at EOF.
    pub next_offset: Option<usize>,
    /// Assigned mail UID, or 0 if none/broken/pseudo/expunged.
    pub uid: u32,
    pub flags: MessageFlags,
    pub keywords: Vec<String>,
    /// Byte count of padding available at the end of headers; for an
    /// expunged record, the full reclaimable span including its body.
    pub space: i64,
    /// 1-based position in the index, 0 if not yet indexed.
    pub idx_seq: u32,
    /// Staged header MD5, populated when MD5 fallback is enabled
    /// (spec.md §3 supplemented field, staged for the `md5hdr_ext` column).
    pub md5: Option<[u8; 16]>,
    pub is_pseudo: bool,
    /// UID ordering was violated for this message relative to the previous.
    pub uid_broken: bool,
}

impl MessageRecord {
    /// Total on-disk span this message occupies: from its `From ` line up
    /// to the next message's `From ` line (or EOF).
    pub fn total_span(&self, file_len: usize) -> usize {
        self.next_offset.unwrap_or(file_len) - self.from_offset
    }
}
