//! The header rewriter (spec.md's "rewriter" collaborator, out of scope
//! beyond this one concrete implementation). Reshapes a single message's
//! headers in place, applying flag/UID/keyword updates and padding, or
//! reports how much additional space it would need.

use crate::errors::{CorruptionKind, SyncResult};
use crate::types::MessageFlags;

use super::format::*;

pub struct RewriteRequest<'a> {
    /// Original header bytes: from the byte after the `From ` line's `\n`
    /// up to and including the header-terminating blank line.
    pub original: &'a [u8],
    pub flags: MessageFlags,
    pub uid: Option<u32>,
    pub keywords: &'a [String],
    pub uid_validity: Option<u32>,
    pub uid_last: Option<u32>,
    pub is_pseudo: bool,
}

pub trait Rewriter {
    /// Try to fit the rewritten header within `req.original`'s existing
    /// span. On success the returned bytes have length exactly
    /// `req.original.len()`. On failure, returns the number of additional
    /// bytes that would be needed.
    fn try_in_place(&self, req: &RewriteRequest) -> Result<Vec<u8>, usize>;

    /// Build new header bytes with exactly `padding` bytes of fresh
    /// trailing padding beyond the minimal content length. Used once the
    /// space planner has secured room via a window flush or file growth.
    fn rewrite_with_padding(&self, req: &RewriteRequest, padding: usize) -> Vec<u8>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderRewriter;

impl HeaderRewriter {
    /// Lines from the original header block that this rewriter does not
    /// own and must preserve verbatim.
    fn passthrough_lines(original: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut pos = 0;
        while pos < original.len() {
            let line_end = original[pos..]
                .iter()
                .position(|&c| c == b'\n')
                .map(|p| pos + p + 1)
                .unwrap_or(original.len());
            let line = &original[pos..line_end];
            if line == b"\n" {
                break; // blank line terminator, stop collecting
            }
            let key_end = line.iter().position(|&c| c == b':').unwrap_or(line.len());
            let key = String::from_utf8_lossy(&line[..key_end]);
            if !is_managed(&key) {
                lines.push(line.to_vec());
            }
            pos = line_end;
        }
        lines
    }

    fn managed_lines(req: &RewriteRequest) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if req.is_pseudo {
            let validity = req.uid_validity.unwrap_or(0);
            let last = req.uid_last.unwrap_or(0);
            out.push(format!("{HDR_X_IMAPBASE}: {validity} {last:0width$}\n", width = UID_LAST_WIDTH).into_bytes());
        } else {
            out.push(format!("{HDR_STATUS}: {}\n", encode_status(req.flags)).into_bytes());
            out.push(format!("{HDR_X_STATUS}: {}\n", encode_x_status(req.flags)).into_bytes());
            if !req.keywords.is_empty() {
                out.push(
                    format!("{HDR_X_KEYWORDS}: {}\n", encode_keywords(req.keywords)).into_bytes(),
                );
            }
            if let Some(uid) = req.uid {
                out.push(format!("{HDR_X_UID}: {uid}\n").into_bytes());
            }
        }
        out
    }

    fn minimal_bytes(req: &RewriteRequest) -> Vec<u8> {
        let mut out = Vec::new();
        for line in Self::passthrough_lines(req.original) {
            out.extend_from_slice(&line);
        }
        for line in Self::managed_lines(req) {
            out.extend_from_slice(&line);
        }
        out
    }
}

fn is_managed(key: &str) -> bool {
    key.eq_ignore_ascii_case(HDR_STATUS)
        || key.eq_ignore_ascii_case(HDR_X_STATUS)
        || key.eq_ignore_ascii_case(HDR_X_KEYWORDS)
        || key.eq_ignore_ascii_case(HDR_X_UID)
        || key.eq_ignore_ascii_case(HDR_X_IMAP)
        || key.eq_ignore_ascii_case(HDR_X_IMAPBASE)
}

impl Rewriter for HeaderRewriter {
    fn try_in_place(&self, req: &RewriteRequest) -> Result<Vec<u8>, usize> {
        let minimal = Self::minimal_bytes(req);
        let minimal_total = minimal.len() + 1; // + blank line
        if minimal_total > req.original.len() {
            return Err(minimal_total - req.original.len());
        }
        let pad = req.original.len() - minimal_total;
        let mut out = minimal;
        // Distribute padding as trailing spaces on the last managed line,
        // before its newline, so it stays reusable on a later rewrite.
        insert_padding_before_last_newline(&mut out, pad);
        out.push(b'\n');
        debug_assert_eq!(out.len(), req.original.len());
        Ok(out)
    }

    fn rewrite_with_padding(&self, req: &RewriteRequest, padding: usize) -> Vec<u8> {
        let mut out = Self::minimal_bytes(req);
        insert_padding_before_last_newline(&mut out, padding);
        out.push(b'\n');
        out
    }
}

fn insert_padding_before_last_newline(buf: &mut Vec<u8>, pad: usize) {
    if pad == 0 {
        return;
    }
    let insert_at = buf.len(); // buf currently has no trailing newline yet for the padded line
    let mut spaces = vec![b' '; pad];
    if insert_at > 0 && buf[insert_at - 1] == b'\n' {
        // insert before the final newline of the last managed line
        buf.truncate(insert_at - 1);
        buf.append(&mut spaces);
        buf.push(b'\n');
    } else {
        buf.append(&mut spaces);
    }
}

/// Rewrite the 10-digit ASCII uid-last field at `offset` in place, guarding
/// with a read-back verification (spec.md §4.8). Aborts without writing if
/// the 10 bytes are not ASCII digits equal to `prior_value`.
pub fn rewrite_uid_last_in_place(
    buf: &mut [u8],
    offset: usize,
    prior_value: u32,
    new_value: u32,
) -> SyncResult<()> {
    if offset + UID_LAST_WIDTH > buf.len() {
        return Err(CorruptionKind::UidLastNotDigits.into());
    }
    let field = &buf[offset..offset + UID_LAST_WIDTH];
    if !field.iter().all(|b| b.is_ascii_digit()) {
        return Err(CorruptionKind::UidLastNotDigits.into());
    }
    let current: u32 = std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CorruptionKind::UidLastNotDigits)?;
    if current != prior_value {
        return Err(CorruptionKind::UidLastNotDigits.into());
    }
    let encoded = format!("{new_value:0width$}", width = UID_LAST_WIDTH);
    buf[offset..offset + UID_LAST_WIDTH].copy_from_slice(encoded.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbox::parser::{MboxParser, Parser};

    fn build(headers: &str, body: &str) -> Vec<u8> {
        format!("From a@b\n{headers}\n{body}").into_bytes()
    }

    #[test]
    fn in_place_succeeds_when_padding_available() {
        let buf = build("Status: \nX-Keywords:          \n", "body\n");
        let raw = MboxParser.parse_at(&buf, 0).unwrap().unwrap();
        let original = &buf[raw.header_offset..raw.body_offset];
        let req = RewriteRequest {
            original,
            flags: MessageFlags::SEEN,
            uid: Some(5),
            keywords: &[],
            uid_validity: None,
            uid_last: None,
            is_pseudo: false,
        };
        let rewritten = HeaderRewriter.try_in_place(&req).expect("should fit");
        assert_eq!(rewritten.len(), original.len());
    }

    #[test]
    fn in_place_fails_when_too_small() {
        let buf = build("Status: \n", "body\n");
        let raw = MboxParser.parse_at(&buf, 0).unwrap().unwrap();
        let original = &buf[raw.header_offset..raw.body_offset];
        let keywords = vec!["a".to_string(), "very".to_string(), "long".to_string(), "keyword".to_string(), "list".to_string()];
        let req = RewriteRequest {
            original,
            flags: MessageFlags::SEEN,
            uid: Some(99999),
            keywords: &keywords,
            uid_validity: None,
            uid_last: None,
            is_pseudo: false,
        };
        assert!(HeaderRewriter.try_in_place(&req).is_err());
    }

    #[test]
    fn uid_last_rewrite_guards_on_mismatch() {
        let mut buf = b"0000000005".to_vec();
        assert!(rewrite_uid_last_in_place(&mut buf, 0, 4, 6).is_err());
        assert_eq!(&buf, b"0000000005");
        assert!(rewrite_uid_last_in_place(&mut buf, 0, 5, 6).is_ok());
        assert_eq!(&buf, b"0000000006");
    }
}
