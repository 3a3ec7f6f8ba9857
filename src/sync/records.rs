//! Sync-record buffer (spec.md §2 "Sync-record buffer"): holds pending
//! index modifications relevant to the message currently under
//! inspection, dropping records whose UID range is behind the cursor.

use std::collections::VecDeque;

use crate::index::{MessageIndex, SyncRecord};

#[derive(Default)]
pub struct PendingRecords {
    buffer: VecDeque<SyncRecord>,
    /// A record pulled from the index that refers to a UID still ahead of
    /// the cursor; held back until the cursor reaches it.
    lookahead: Option<SyncRecord>,
}

impl PendingRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull and return all sync records overlapping `uid`, dropping any
    /// whose range is entirely behind it.
    pub fn pull_for_uid(
        &mut self,
        index: &mut impl MessageIndex,
        uid: u32,
    ) -> crate::errors::SyncResult<Vec<SyncRecord>> {
        let mut overlapping = Vec::new();

        loop {
            let record = match self.lookahead.take() {
                Some(r) => r,
                None => match index
                    .sync_next()
                    .map_err(|e| crate::errors::SyncError::Index(e.to_string()))?
                {
                    Some(r) => r,
                    None => break,
                },
            };

            if record.uid2 < uid {
                // Behind the cursor: dropped, as spec.md §2 requires.
                continue;
            }
            if record.uid1 > uid {
                // Ahead of the cursor: hold back for a later message.
                self.lookahead = Some(record);
                break;
            }
            overlapping.push(record);
        }

        for record in self.buffer.drain(..) {
            overlapping.push(record);
        }

        Ok(overlapping)
    }

    /// True if there is no more pending work at or after `uid` (spec.md
    /// §4.6 "If no records remain and the mbox is not dirty, stop early").
    pub fn is_exhausted_from(&self, uid: u32) -> bool {
        self.buffer.is_empty()
            && self
                .lookahead
                .as_ref()
                .map(|r| r.uid1 < uid)
                .unwrap_or(true)
    }

    /// The UID of the next pending record still ahead of the cursor, if
    /// any (spec.md §4.6: used to binary-search the index view and seek).
    pub fn next_pending_uid(&self) -> Option<u32> {
        self.lookahead.as_ref().map(|r| r.uid1)
    }
}
