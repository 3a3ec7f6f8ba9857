//! Index updater (spec.md §4.7): append, update flags/keywords/MD5/
//! from-offset on the open index transaction; expunge vanished messages.

use crate::index::{ExtColumn, ExtValue, IndexMessage, IndexResult, MessageIndex, UpdateMode};
use crate::types::{MessageFlags, MAIL_FLAGS_MASK};

use super::record::MessageRecord;

/// Reconcile one non-expunged, non-pseudo message against the index.
/// `will_move_again` suppresses the `from_offset` update when a later
/// window flush will relocate this message anyway.
pub fn reconcile(
    index: &mut impl MessageIndex,
    rec: &MessageRecord,
    existing: Option<IndexMessage>,
    md5_enabled: bool,
    will_move_again: bool,
) -> IndexResult<u32> {
    match existing {
        None => {
            let seq = index.append(rec.uid, rec.flags & MAIL_FLAGS_MASK, rec.keywords.clone())?;
            if md5_enabled {
                if let Some(md5) = rec.md5 {
                    index.update_ext(seq, ExtColumn::Md5Hdr, ExtValue::Md5(md5))?;
                }
            }
            if !will_move_again {
                index.update_ext(
                    seq,
                    ExtColumn::FromOffset,
                    ExtValue::FromOffset(rec.from_offset as u64),
                )?;
            }
            Ok(seq)
        }
        Some(existing) => {
            reconcile_existing(index, rec, &existing, md5_enabled, will_move_again)?;
            Ok(existing.seq)
        }
    }
}

fn reconcile_existing(
    index: &mut impl MessageIndex,
    rec: &MessageRecord,
    existing: &IndexMessage,
    md5_enabled: bool,
    will_move_again: bool,
) -> IndexResult<()> {
    let dirty = existing.flags.contains(MessageFlags::DIRTY);

    let effective = if dirty {
        // Dirty inverts dominance: index flags win outright.
        existing.flags
    } else {
        (rec.flags & MAIL_FLAGS_MASK) | (existing.flags & !MAIL_FLAGS_MASK)
    };

    if !dirty {
        let non_sync_differ =
            (effective & MAIL_FLAGS_MASK) != (existing.flags & MAIL_FLAGS_MASK);
        if non_sync_differ {
            index.update_flags(existing.seq, UpdateMode::Replace, effective)?;
        } else {
            // Only recent/dirty bits may differ: issue targeted add/remove.
            let recent_now = rec.flags.contains(MessageFlags::RECENT);
            let recent_before = existing.flags.contains(MessageFlags::RECENT);
            if recent_now != recent_before {
                let mode = if recent_now {
                    UpdateMode::Add
                } else {
                    UpdateMode::Remove
                };
                index.update_flags(existing.seq, mode, MessageFlags::RECENT)?;
            }
        }
    }

    if !dirty && rec.keywords != existing.keywords {
        index.update_keywords(existing.seq, UpdateMode::Replace, &rec.keywords)?;
    }

    if md5_enabled {
        if let Some(new_md5) = rec.md5 {
            if let Some(ExtValue::Md5(old)) =
                index.lookup_ext(existing.seq, ExtColumn::Md5Hdr)?
            {
                if old != new_md5 {
                    index.update_ext(existing.seq, ExtColumn::Md5Hdr, ExtValue::Md5(new_md5))?;
                }
            } else {
                index.update_ext(existing.seq, ExtColumn::Md5Hdr, ExtValue::Md5(new_md5))?;
            }
        }
    }

    if !will_move_again && existing.from_offset != rec.from_offset as u64 {
        index.update_ext(
            existing.seq,
            ExtColumn::FromOffset,
            ExtValue::FromOffset(rec.from_offset as u64),
        )?;
    }

    Ok(())
}

/// Expunge every index entry whose UID falls strictly between `floor_uid`
/// (the highest UID already resolved earlier in this same pass) and `uid`
/// (external expunge detection, spec.md §4.2: "Any index record with a
/// smaller UID has been externally expunged and is removed from the
/// index."). Bounding the query below by `floor_uid` keeps this from
/// re-examining entries this same pass already matched to a message still
/// physically present on disk.
pub fn expunge_behind(index: &mut impl MessageIndex, floor_uid: u32, uid: u32) -> IndexResult<()> {
    if uid <= floor_uid.saturating_add(1) {
        return Ok(());
    }
    loop {
        let count = index.view_messages_count()?;
        if count == 0 {
            return Ok(());
        }
        match index.lookup_uid_range(floor_uid + 1, uid - 1)? {
            ref v if v.is_empty() => return Ok(()),
            v => {
                for msg in v {
                    index.expunge(msg.seq)?;
                }
            }
        }
    }
}

/// Expunge every remaining index entry beyond `last_seq` (spec.md §4.2
/// "At end-of-file, any remaining index entries are expunged.").
pub fn expunge_tail(index: &mut impl MessageIndex, last_seq: u32) -> IndexResult<()> {
    loop {
        let count = index.view_messages_count()?;
        if count <= last_seq {
            return Ok(());
        }
        index.expunge(count)?;
    }
}
