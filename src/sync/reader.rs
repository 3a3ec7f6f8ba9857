//! Message reader (spec.md §2 "Message reader"): drives the parser
//! forward, recognises the pseudo first message, and detects recent/uid
//! ordering conditions.

use crate::mbox::parser::Parser;
use crate::types::MessageFlags;

use super::context::SyncContext;
use super::record::MessageRecord;

pub struct Reader<'a, P: Parser> {
    parser: &'a P,
}

impl<'a, P: Parser> Reader<'a, P> {
    pub fn new(parser: &'a P) -> Self {
        Self { parser }
    }

    /// Read the message at `offset`, advancing `ctx.seq`. Returns `None`
    /// at EOF.
    pub fn read_next(
        &self,
        buf: &[u8],
        offset: usize,
        ctx: &mut SyncContext,
    ) -> std::io::Result<Option<MessageRecord>> {
        let Some(raw) = self.parser.parse_at(buf, offset)? else {
            return Ok(None);
        };

        ctx.seq += 1;
        let seq = ctx.seq;

        let is_pseudo = raw.headers.is_pseudo;
        if is_pseudo {
            ctx.base_uid_validity = raw.headers.uid_validity;
            ctx.base_uid_last = raw.headers.uid_last;
            ctx.base_uid_last_offset = raw.headers.uid_last_offset;
        }

        let mut flags = raw.headers.status | raw.headers.x_status;
        // A message with neither an X-UID nor a Status header encoding
        // "seen" (R/O) is treated as recent, the same way a freshly
        // delivered message would be.
        if !flags.contains(MessageFlags::SEEN) && raw.headers.uid.is_none() && !is_pseudo {
            flags |= MessageFlags::RECENT;
        }

        let uid_broken = if let (Some(uid), prev) = (raw.headers.uid, ctx.prev_msg_uid) {
            !is_pseudo && prev != 0 && uid <= prev
        } else {
            false
        };
        if !is_pseudo {
            if let Some(uid) = raw.headers.uid {
                ctx.prev_msg_uid = uid;
            }
        }
        if uid_broken {
            ctx.uid_broken = true;
        }

        Ok(Some(MessageRecord {
            seq,
            from_offset: raw.from_offset,
            header_offset: raw.header_offset,
            body_offset: raw.body_offset,
            body_size: raw.body_size,
            next_offset: raw.next_offset,
            uid: if is_pseudo { 0 } else { raw.headers.uid.unwrap_or(0) },
            flags,
            keywords: raw.headers.keywords,
            space: raw.trailing_padding as i64,
            idx_seq: 0,
            md5: Some(raw.header_md5),
            is_pseudo,
            uid_broken,
        }))
    }
}
