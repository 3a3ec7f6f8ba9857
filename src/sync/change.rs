//! Change detector (spec.md §4.9): cheap pre-check comparing on-disk
//! (mtime, size) against the stored (sync_stamp, sync_size).

use crate::index::IndexHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    /// Disk matches the stored header exactly; safe to no-op.
    Unchanged,
    /// Disk has actually changed (mtime or size differ).
    Changed,
    /// Disk matches, but the caller is accepting a dirty index state
    /// (spec.md §4.9 "a softer result when the file is merely dirty").
    DirtyButUnchanged,
}

pub fn detect(mtime: i64, size: u64, header: &IndexHeader, mbox_sync_dirty: bool) -> ChangeState {
    let unchanged = mtime == header.sync_stamp && size == header.sync_size;
    if unchanged {
        if mbox_sync_dirty {
            ChangeState::DirtyButUnchanged
        } else {
            ChangeState::Unchanged
        }
    } else {
        ChangeState::Changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_stat_is_unchanged() {
        let header = IndexHeader {
            uid_validity: 1,
            next_uid: 2,
            sync_stamp: 1000,
            sync_size: 50,
        };
        assert_eq!(detect(1000, 50, &header, false), ChangeState::Unchanged);
    }

    #[test]
    fn differing_size_is_changed() {
        let header = IndexHeader {
            uid_validity: 1,
            next_uid: 2,
            sync_stamp: 1000,
            sync_size: 50,
        };
        assert_eq!(detect(1000, 51, &header, false), ChangeState::Changed);
    }
}
