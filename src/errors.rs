use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Error kinds from spec.md §7 "Error handling design".
#[derive(Error, Debug)]
pub enum SyncError {
    /// (a) I/O on the mbox file — syscall failures, mostly fatal to the pass.
    #[error("mbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// (b) index errors, propagated as-is; the transaction is rolled back.
    #[error("index error: {0}")]
    Index(String),

    /// (c) format corruption detected while scanning.
    #[error("mbox corruption: {0}")]
    Corruption(#[from] CorruptionKind),

    /// (d) uid space exhausted; triggers `renumber_uids` and a retry.
    /// Caught inside the driver's retry loop, never surfaced to the caller.
    #[error("uid space exhausted, renumbering")]
    UidExhausted,

    /// (e) UID ordering broken during a partial pass; caught inside the
    /// driver's retry loop and retried as a full sync.
    #[error("partial sync invalid, restarting full")]
    PartialInvalid,

    /// (f) disk full while writing the pseudo message; the mbox is
    /// truncated to zero and the caller observes this error.
    #[error("disk full writing pseudo message")]
    DiskFull,
}

impl SyncError {
    /// (d)/(e) are locally recoverable inside the driver's retry loop;
    /// everything else must propagate (spec.md §7 "Propagation policy").
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, SyncError::UidExhausted | SyncError::PartialInvalid)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptionKind {
    #[error("lost From line at sequence {seq}")]
    MissingFromLine { seq: u32 },
    #[error("body shrank mid-pass at sequence {seq}")]
    BodyShrank { seq: u32 },
    #[error("uid-validity mismatch between pseudo header and index")]
    UidValidityMismatch,
    #[error("expunged uid {uid} reappeared on disk")]
    ReappearedExpungedUid { uid: u32 },
    #[error("non-digit byte at uid-last offset")]
    UidLastNotDigits,
}
