use bitflags::bitflags;

bitflags! {
    /// Per-message flag bitfield (spec.md §3 "Message record").
    ///
    /// `RECENT`, `DIRTY` and `EXPUNGED` are session/index-local bookkeeping
    /// bits, not part of the mbox `Status`/`X-Status` surface; everything
    /// else round-trips through the mbox header.
    #[derive(Default)]
    pub struct MessageFlags: u16 {
        const SEEN      = 0b0000_0001;
        const ANSWERED  = 0b0000_0010;
        const FLAGGED   = 0b0000_0100;
        const DELETED   = 0b0000_1000;
        const DRAFT     = 0b0001_0000;
        const RECENT    = 0b0010_0000;
        const DIRTY     = 0b0100_0000;
        const EXPUNGED  = 0b1000_0000;
    }
}

/// The subset of `MessageFlags` synced bidirectionally between the mbox
/// header and the index (spec.md §4.7). `RECENT`, `DIRTY` and `EXPUNGED`
/// never come from the mbox side.
pub const MAIL_FLAGS_MASK: MessageFlags = MessageFlags::from_bits_truncate(
    MessageFlags::SEEN.bits()
        | MessageFlags::ANSWERED.bits()
        | MessageFlags::FLAGGED.bits()
        | MessageFlags::DELETED.bits()
        | MessageFlags::DRAFT.bits(),
);

/// A keyword is an arbitrary label (IMAP keyword / `X-Keywords` entry),
/// interned by the index into a small integer so messages only carry an
/// index into a shared keyword pool (spec.md §9 "Arena-scoped allocations").
pub type KeywordId = u32;

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
