//! The state that lives for the duration of one sync pass (spec.md §3
//! "Sync context").

use crate::config::SyncConfig;

use super::record::MessageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Partial,
    Full,
}

pub struct SyncContext {
    pub config: SyncConfig,
    pub mode: SyncMode,
    pub read_only: bool,

    // Cursors
    pub seq: u32,
    pub idx_seq: u32,
    pub prev_msg_uid: u32,
    pub next_uid: u32,
    pub idx_next_uid: u32,

    // Baseline from the prior pseudo header.
    pub base_uid_validity: Option<u32>,
    pub base_uid_last: Option<u32>,
    pub base_uid_last_offset: Option<usize>,

    // Pending plan / window.
    pub window: Vec<MessageRecord>,
    pub need_space_seq: u32,
    pub space_diff: i64,
    pub expunged_space: i64,

    // Flags.
    pub dest_first_mail: bool,
    pub first_mail_crlf_expunged: bool,
    pub moved_offsets: bool,
    pub renumber_uids: bool,
    pub delay_writes: bool,
    pub mbox_sync_dirty: bool,
    pub uid_broken: bool,
}

impl SyncContext {
    pub fn new(config: SyncConfig, mode: SyncMode, read_only: bool) -> Self {
        Self {
            delay_writes: config.delay_writes,
            config,
            mode,
            read_only,
            seq: 0,
            idx_seq: 0,
            prev_msg_uid: 0,
            next_uid: 1,
            idx_next_uid: 1,
            base_uid_validity: None,
            base_uid_last: None,
            base_uid_last_offset: None,
            window: Vec::new(),
            need_space_seq: 0,
            space_diff: 0,
            expunged_space: 0,
            dest_first_mail: false,
            first_mail_crlf_expunged: false,
            moved_offsets: false,
            renumber_uids: false,
            mbox_sync_dirty: false,
            uid_broken: false,
        }
    }

    pub fn has_open_window(&self) -> bool {
        self.need_space_seq > 0
    }

    pub fn open_window(&mut self, seq: u32) {
        if !self.has_open_window() {
            self.need_space_seq = seq;
            self.space_diff = 0;
        }
    }

    /// Reset the window after it has been flushed (spec.md §3 "Lifecycle":
    /// "at that point both the record array and the mail-keyword pool are
    /// reset").
    pub fn reset_window(&mut self) {
        self.window.clear();
        self.need_space_seq = 0;
        self.space_diff = 0;
    }

    pub fn is_partial(&self) -> bool {
        self.mode == SyncMode::Partial
    }
}
