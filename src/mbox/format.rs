//! Constants and header encode/decode helpers for the classic "From "
//! delimited mbox format (spec.md §6 "Mbox file format consumed/produced").
//!
//! The exact single-letter encoding used inside `Status`/`X-Status` is an
//! implementation detail of the (out-of-scope) tokenizer/rewriter pair; it
//! is fixed here so the two sides agree. See DESIGN.md for the rationale.

use crate::types::MessageFlags;

/// Bytes reserved at the end of a rewritten header block so future flag,
/// UID or keyword updates can be absorbed without shifting the file.
pub const MBOX_HEADER_PADDING: usize = 64;

/// Width of the fixed zero-padded ASCII uid-last field inside X-IMAPbase.
pub const UID_LAST_WIDTH: usize = 10;

pub const FROM_PREFIX: &[u8] = b"From ";

pub const HDR_STATUS: &str = "Status";
pub const HDR_X_STATUS: &str = "X-Status";
pub const HDR_X_KEYWORDS: &str = "X-Keywords";
pub const HDR_X_UID: &str = "X-UID";
pub const HDR_CONTENT_LENGTH: &str = "Content-Length";
pub const HDR_X_IMAP: &str = "X-IMAP";
pub const HDR_X_IMAPBASE: &str = "X-IMAPbase";

/// Warning body written into a freshly created pseudo message.
pub const PSEUDO_WARNING_BODY: &str =
    "This text is part of the internal format of your mail folder, and is not\n\
     a real message. It is created automatically by the mail system software.\n\
     If deleted, important folder data will be lost, and it will be re-created\n\
     with the data reset to initial values.\n";

/// Decode a `Status:` header value into the flags it carries.
///
/// `R` => SEEN, `O` => the message has been seen by some client before (not
/// RECENT). Absence of `O` means RECENT.
pub fn decode_status(value: &str) -> MessageFlags {
    let mut flags = MessageFlags::empty();
    for ch in value.chars() {
        match ch {
            'R' => flags |= MessageFlags::SEEN,
            'O' => {}
            _ => {}
        }
    }
    flags
}

/// Encode the SEEN flag (and implicitly "not recent", since any rewritten
/// message is no longer new) into a `Status:` value.
pub fn encode_status(flags: MessageFlags) -> String {
    let mut s = String::new();
    if flags.contains(MessageFlags::SEEN) {
        s.push('R');
    }
    if !flags.contains(MessageFlags::RECENT) {
        s.push('O');
    }
    s
}

/// Decode an `X-Status:` header value into the flags it carries.
pub fn decode_x_status(value: &str) -> MessageFlags {
    let mut flags = MessageFlags::empty();
    for ch in value.chars() {
        match ch {
            'A' => flags |= MessageFlags::ANSWERED,
            'F' => flags |= MessageFlags::FLAGGED,
            'D' => flags |= MessageFlags::DELETED,
            'T' => flags |= MessageFlags::DRAFT,
            _ => {}
        }
    }
    flags
}

pub fn encode_x_status(flags: MessageFlags) -> String {
    let mut s = String::new();
    if flags.contains(MessageFlags::ANSWERED) {
        s.push('A');
    }
    if flags.contains(MessageFlags::FLAGGED) {
        s.push('F');
    }
    if flags.contains(MessageFlags::DELETED) {
        s.push('D');
    }
    if flags.contains(MessageFlags::DRAFT) {
        s.push('T');
    }
    s
}

/// Decode a space-separated `X-Keywords:` header value.
pub fn decode_keywords(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

pub fn encode_keywords(keywords: &[String]) -> String {
    keywords.join(" ")
}
