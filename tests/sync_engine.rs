//! End-to-end coverage of the sync engine against a real mbox file on
//! disk and an in-memory index, matching the scenarios and invariants in
//! spec.md §8.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::time::UNIX_EPOCH;

use mboxsync::config::SyncConfig;
use mboxsync::index::{IndexHeader, InMemoryIndex, MessageIndex, SyncRecord, SyncRecordType};
use mboxsync::locking::UnixFileLock;
use mboxsync::sync::{Driver, SyncFlags};
use mboxsync::types::MessageFlags;

fn write_mbox(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(bytes).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn read_mbox(path: &std::path::Path) -> Vec<u8> {
    let mut buf = Vec::new();
    File::open(path).unwrap().read_to_end(&mut buf).unwrap();
    buf
}

fn message_with_padding(uid_line: &str, status_line: &str, x_status_pad: usize, body: &str) -> Vec<u8> {
    // Every managed line here is rebuilt fresh by the rewriter on the
    // first touch, so only the total byte count of the original header
    // matters for whether a later in-place rewrite fits.
    format!(
        "From nobody Mon Jan  1 00:00:00 2024\n{status_line}\nX-Status:{pad}\n{uid_line}\n\n{body}",
        pad = " ".repeat(x_status_pad),
    )
    .into_bytes()
}

fn message(uid_line: &str, status_line: &str, body: &str) -> Vec<u8> {
    message_with_padding(uid_line, status_line, 40, body)
}

fn padded_message(uid: u32, body: &str) -> Vec<u8> {
    message(&format!("X-UID: {uid}"), "Status:                                        ", body)
}

/// A header with no reusable slack at all: every managed line is at its
/// shortest possible encoding.
fn minimal_message(uid: u32, body: &str) -> Vec<u8> {
    message_with_padding(&format!("X-UID: {uid}"), "Status:", 0, body)
}

fn body_of_len(len: usize) -> String {
    let mut s = "x".repeat(len.saturating_sub(1));
    s.push('\n');
    s
}

fn stat(path: &std::path::Path) -> (i64, u64) {
    let md = fs::metadata(path).unwrap();
    let mtime = md
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    (mtime, md.len())
}

fn driver(path: &std::path::Path, index: InMemoryIndex) -> Driver<InMemoryIndex, UnixFileLock> {
    Driver::new(path.to_path_buf(), index, UnixFileLock, SyncConfig::default())
}

/// E1: an empty mbox, three messages delivered externally, first sync.
#[test]
fn e1_empty_mbox_gets_pseudo_and_sequential_uids() {
    let mut buf = Vec::new();
    buf.extend(message("", "Status:", "alpha\n"));
    buf.extend(message("", "Status:", "beta\n"));
    buf.extend(message("", "Status:", "gamma\n"));
    let tmp = write_mbox(&buf);

    let mut d = driver(tmp.path(), InMemoryIndex::new());
    d.run(SyncFlags::default()).expect("sync should succeed");

    let index = d.index_mut();
    assert_eq!(index.view_messages_count().unwrap(), 3);
    let msgs = index.lookup_uid_range(1, 3).unwrap();
    let mut uids: Vec<u32> = msgs.iter().map(|m| m.uid).collect();
    uids.sort();
    assert_eq!(uids, vec![1, 2, 3]);

    let header = index.header().unwrap();
    assert_ne!(header.uid_validity, 0);
    assert_eq!(header.next_uid, 4);

    let on_disk = read_mbox(tmp.path());
    assert!(on_disk.starts_with(b"From "));
    assert!(on_disk.windows(b"X-IMAPbase".len()).any(|w| w == b"X-IMAPbase"));
}

/// E2: flag-only change applied via a queued sync record, partial mode,
/// header rewritten in place without growing the file.
#[test]
fn e2_flag_update_rewrites_in_place_without_growing_file() {
    let mut buf = Vec::new();
    buf.extend(crate_pseudo(555, 2));
    let msg1_off = buf.len();
    buf.extend(padded_message(1, "first body\n"));
    let msg2_off = buf.len();
    buf.extend(padded_message(2, "second body\n"));
    let tmp = write_mbox(&buf);

    let mut index = InMemoryIndex::new();
    let seq1 = index.append(1, MessageFlags::empty(), vec![]).unwrap();
    let seq2 = index.append(2, MessageFlags::empty(), vec![]).unwrap();
    index
        .update_ext(seq1, mboxsync::index::ExtColumn::FromOffset, mboxsync::index::ExtValue::FromOffset(msg1_off as u64))
        .unwrap();
    index
        .update_ext(seq2, mboxsync::index::ExtColumn::FromOffset, mboxsync::index::ExtValue::FromOffset(msg2_off as u64))
        .unwrap();
    let (mtime, size) = stat(tmp.path());
    index
        .update_header(IndexHeader { uid_validity: 555, next_uid: 3, sync_stamp: mtime, sync_size: size })
        .unwrap();
    index.queue(SyncRecord {
        uid1: 2,
        uid2: 2,
        kind: SyncRecordType::Flags,
        flags: MessageFlags::SEEN,
        keywords: vec![],
    });

    let size_before = fs::metadata(tmp.path()).unwrap().len();

    let mut d = driver(tmp.path(), index);
    d.run(SyncFlags::default()).expect("sync should succeed");

    let size_after = fs::metadata(tmp.path()).unwrap().len();
    assert_eq!(size_before, size_after, "in-place rewrite must not change file size");

    let index = d.index_mut();
    let msg2 = index.lookup_uid_range(2, 2).unwrap().into_iter().next().unwrap();
    assert!(msg2.flags.contains(MessageFlags::SEEN));
    let msg1 = index.lookup_uid_range(1, 1).unwrap().into_iter().next().unwrap();
    assert!(!msg1.flags.contains(MessageFlags::SEEN));
}

/// E3: expunging the middle message of three shrinks the file by exactly
/// that message's span and moves the trailing message's body unchanged.
#[test]
fn e3_expunge_middle_shrinks_file_and_preserves_trailing_body() {
    let mut buf = Vec::new();
    buf.extend(crate_pseudo(777, 3));
    let msg1_off = buf.len();
    buf.extend(padded_message(1, &body_of_len(100)));
    let msg2_off = buf.len();
    let msg2 = padded_message(2, &body_of_len(200));
    let msg2_span = msg2.len();
    buf.extend(&msg2);
    let msg3_off = buf.len();
    buf.extend(padded_message(3, &body_of_len(150)));
    let tmp = write_mbox(&buf);

    let mut index = InMemoryIndex::new();
    for (uid, off) in [(1u32, msg1_off), (2, msg2_off), (3, msg3_off)] {
        let seq = index.append(uid, MessageFlags::empty(), vec![]).unwrap();
        index
            .update_ext(seq, mboxsync::index::ExtColumn::FromOffset, mboxsync::index::ExtValue::FromOffset(off as u64))
            .unwrap();
    }
    let (mtime, size) = stat(tmp.path());
    index
        .update_header(IndexHeader { uid_validity: 777, next_uid: 4, sync_stamp: mtime, sync_size: size })
        .unwrap();
    index.queue(SyncRecord {
        uid1: 2,
        uid2: 2,
        kind: SyncRecordType::Expunge,
        flags: MessageFlags::empty(),
        keywords: vec![],
    });

    let original_len = fs::metadata(tmp.path()).unwrap().len();

    let mut d = driver(tmp.path(), index);
    d.run(SyncFlags::default()).expect("sync should succeed");

    let new_len = fs::metadata(tmp.path()).unwrap().len();
    assert_eq!(new_len as usize, original_len as usize - msg2_span);

    let on_disk = read_mbox(tmp.path());
    assert!(on_disk.windows(3).any(|w| w == b"xxx"), "message 3's body should still be present");
    let body3_start = on_disk.len() - body_of_len(150).len();
    assert_eq!(&on_disk[body3_start..], body_of_len(150).as_bytes());

    let index = d.index_mut();
    assert_eq!(index.view_messages_count().unwrap(), 2);
    let mut uids: Vec<u32> = index.lookup_uid_range(0, u32::MAX).unwrap().iter().map(|m| m.uid).collect();
    uids.sort();
    assert_eq!(uids, vec![1, 3]);
}

/// E4: a flag/keyword change that needs more header bytes than the
/// original message reserved forces the file to grow, while the body
/// stays byte-identical.
#[test]
fn e4_deficit_grows_file_and_preserves_body() {
    // Minimal padding: no room for the long keyword list about to be
    // queued.
    let buf = minimal_message(1, "the only body\n");
    let tmp = write_mbox(&buf);

    let mut index = InMemoryIndex::new();
    let seq = index.append(1, MessageFlags::empty(), vec![]).unwrap();
    index
        .update_ext(seq, mboxsync::index::ExtColumn::FromOffset, mboxsync::index::ExtValue::FromOffset(0))
        .unwrap();
    let (mtime, size) = stat(tmp.path());
    index
        .update_header(IndexHeader { uid_validity: 0, next_uid: 2, sync_stamp: mtime, sync_size: size })
        .unwrap();
    let long_keywords: Vec<String> = (0..10).map(|i| format!("VeryLongKeywordLabel{i}")).collect();
    index.queue(SyncRecord {
        uid1: 1,
        uid2: 1,
        kind: SyncRecordType::KeywordReset,
        flags: MessageFlags::empty(),
        keywords: long_keywords.clone(),
    });

    let original_len = fs::metadata(tmp.path()).unwrap().len();

    let mut d = driver(tmp.path(), index);
    d.run(SyncFlags { force_full: true, ..Default::default() }).expect("sync should succeed");

    let new_len = fs::metadata(tmp.path()).unwrap().len();
    assert!(new_len > original_len, "file must grow to fit the long keyword list");

    let on_disk = read_mbox(tmp.path());
    assert!(on_disk.ends_with(b"the only body\n"));
    for kw in &long_keywords {
        assert!(on_disk.windows(kw.len()).any(|w| w == kw.as_bytes()));
    }

    let index = d.index_mut();
    let msg = index.lookup_uid_range(1, 1).unwrap().into_iter().next().unwrap();
    assert_eq!(msg.keywords, long_keywords);
}

/// A multi-window member that needs no rewrite of its own (Case C, between
/// two messages that both force a window open) must still survive the
/// eventual flush byte-for-byte: it sits inside the window's splice range
/// purely by physical position.
#[test]
fn window_flush_preserves_untouched_middle_message() {
    let mut buf = Vec::new();
    buf.extend(crate_pseudo(55, 3));
    let msg1_off = buf.len();
    buf.extend(minimal_message(1, "body one\n"));
    let msg2_off = buf.len();
    buf.extend(minimal_message(2, "body two stays untouched\n"));
    let msg3_off = buf.len();
    buf.extend(minimal_message(3, "body three\n"));
    let tmp = write_mbox(&buf);

    let mut index = InMemoryIndex::new();
    for (uid, off) in [(1u32, msg1_off), (2, msg2_off), (3, msg3_off)] {
        let seq = index.append(uid, MessageFlags::empty(), vec![]).unwrap();
        index
            .update_ext(seq, mboxsync::index::ExtColumn::FromOffset, mboxsync::index::ExtValue::FromOffset(off as u64))
            .unwrap();
    }
    index
        .update_header(IndexHeader { uid_validity: 55, next_uid: 4, sync_stamp: 0, sync_size: 0 })
        .unwrap();

    // Messages 1 and 3 each get a keyword list too long to fit in their
    // minimal header, forcing a window open on message 1 and keeping it
    // open through message 3. Message 2 has no pending record at all
    // (Case C, "nothing to do") but lies physically between them.
    let long_keywords: Vec<String> = (0..10).map(|i| format!("VeryLongKeywordLabel{i}")).collect();
    for uid in [1u32, 3] {
        index.queue(SyncRecord {
            uid1: uid,
            uid2: uid,
            kind: SyncRecordType::KeywordReset,
            flags: MessageFlags::empty(),
            keywords: long_keywords.clone(),
        });
    }

    let mut d = driver(tmp.path(), index);
    d.run(SyncFlags { force_full: true, ..Default::default() }).expect("sync should succeed");

    let on_disk = read_mbox(tmp.path());
    assert!(
        on_disk.windows(b"body two stays untouched".len()).any(|w| w == b"body two stays untouched"),
        "message 2's body must survive the window flush untouched"
    );

    let index = d.index_mut();
    assert_eq!(index.view_messages_count().unwrap(), 3);
    let msg2 = index.lookup_uid_range(2, 2).unwrap().into_iter().next().unwrap();
    assert!(msg2.keywords.is_empty(), "message 2 was never queued a keyword change");
}

/// E5: a message removed directly from the mbox file between passes
/// causes its index entry to be expunged on the next sync, without
/// disturbing the UIDs of the messages that remain.
#[test]
fn e5_external_removal_expunges_stale_index_entry() {
    // The file on disk already reflects message 1 having been removed
    // directly (as an external MUA would do, bypassing the index
    // entirely) — the index below is seeded as though it still believed
    // both messages were present.
    let mut external = Vec::new();
    external.extend(crate_pseudo(321, 2));
    let msg2_off = external.len();
    external.extend(padded_message(2, "still here\n"));
    let tmp = write_mbox(&external);

    let mut index = InMemoryIndex::new();
    index.append(1, MessageFlags::empty(), vec![]).unwrap();
    let seq2 = index.append(2, MessageFlags::empty(), vec![]).unwrap();
    index
        .update_ext(seq2, mboxsync::index::ExtColumn::FromOffset, mboxsync::index::ExtValue::FromOffset(msg2_off as u64))
        .unwrap();
    // Deliberately stale (mtime, size): the real file no longer matches,
    // so the driver must fall back to a full pass to notice the removal.
    index
        .update_header(IndexHeader { uid_validity: 321, next_uid: 3, sync_stamp: 1, sync_size: 1 })
        .unwrap();

    let mut d = driver(tmp.path(), index);
    d.run(SyncFlags::default()).expect("sync should succeed");

    let index = d.index_mut();
    assert_eq!(index.view_messages_count().unwrap(), 1);
    let remaining = index.lookup_uid_range(0, u32::MAX).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].uid, 2);
}

/// E6: UID ordering broken in partial mode degrades to a full pass, which
/// then completes without error.
#[test]
fn e6_uid_ordering_broken_in_partial_mode_retries_full() {
    let mut buf = Vec::new();
    buf.extend(crate_pseudo(42, 2));
    let msg1_off = buf.len();
    buf.extend(padded_message(1, "one\n"));
    let msg2_off = buf.len();
    // Corrupt the second message's UID so it is not greater than the
    // first's, matching its byte length exactly so the file's (mtime,
    // size) can still be made to look unchanged.
    let mut msg2 = padded_message(2, "two\n");
    let needle = b"X-UID: 2";
    let pos = msg2.windows(needle.len()).position(|w| w == needle).unwrap();
    msg2[pos..pos + needle.len()].copy_from_slice(b"X-UID: 1");
    buf.extend(&msg2);
    let tmp = write_mbox(&buf);

    let mut index = InMemoryIndex::new();
    let seq1 = index.append(1, MessageFlags::empty(), vec![]).unwrap();
    index
        .update_ext(seq1, mboxsync::index::ExtColumn::FromOffset, mboxsync::index::ExtValue::FromOffset(msg1_off as u64))
        .unwrap();
    let seq2 = index.append(2, MessageFlags::empty(), vec![]).unwrap();
    index
        .update_ext(seq2, mboxsync::index::ExtColumn::FromOffset, mboxsync::index::ExtValue::FromOffset(msg2_off as u64))
        .unwrap();
    let (mtime, size) = stat(tmp.path());
    index
        .update_header(IndexHeader { uid_validity: 42, next_uid: 3, sync_stamp: mtime, sync_size: size })
        .unwrap();
    // A pending record ahead of message 1 keeps the partial scan from
    // stopping early after it, so the cursor actually reaches (and reads)
    // the corrupted message 2.
    index.queue(SyncRecord {
        uid1: 2,
        uid2: 2,
        kind: SyncRecordType::Flags,
        flags: MessageFlags::empty(),
        keywords: vec![],
    });

    let mut d = driver(tmp.path(), index);
    // Partial mode is chosen because the stored (mtime, size) still
    // matches; the corrupted UID triggers PartialInvalid internally and
    // the driver transparently retries as a full pass.
    let result = d.run(SyncFlags::default());
    assert!(result.is_ok(), "driver should recover via an automatic full retry: {result:?}");
}

/// Invariant 1 (idempotence): a second sync over an untouched mbox makes
/// no further changes to the file.
#[test]
fn idempotent_second_sync_is_a_no_op() {
    let buf = padded_message(1, "stable body\n");
    let tmp = write_mbox(&buf);

    let mut d = driver(tmp.path(), InMemoryIndex::new());
    d.run(SyncFlags::default()).unwrap();
    let after_first = read_mbox(tmp.path());

    d.run(SyncFlags::default()).unwrap();
    let after_second = read_mbox(tmp.path());

    assert_eq!(after_first, after_second);
}

/// Invariant 7 (UID validity guard): a pseudo header whose uid_validity
/// disagrees with the index's stored value is a critical failure, and the
/// index is marked corrupted rather than silently accepted.
#[test]
fn uid_validity_mismatch_is_a_critical_failure() {
    let mut buf = Vec::new();
    buf.extend(crate_pseudo(555, 1));
    buf.extend(padded_message(1, "body\n"));
    let tmp = write_mbox(&buf);

    let mut index = InMemoryIndex::new();
    index
        .update_header(IndexHeader { uid_validity: 999, next_uid: 2, sync_stamp: 0, sync_size: 0 })
        .unwrap();

    let mut d = driver(tmp.path(), index);
    let result = d.run(SyncFlags::default());
    assert!(result.is_err(), "mismatched uid_validity must be rejected");
    assert!(d.index_mut().is_corrupted());
}

fn crate_pseudo(uid_validity: u32, uid_last: u32) -> Vec<u8> {
    format!("From Mailer-Daemon MBOXSYNC-INTERNAL\nX-IMAPbase: {uid_validity} {uid_last:010}\n\nwarning\n").into_bytes()
}
