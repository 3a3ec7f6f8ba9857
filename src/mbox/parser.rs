//! The mbox tokenizer (spec.md's "parser" collaborator, out of scope beyond
//! this one concrete, workable implementation). Locates `From ` delimiters,
//! header/body boundaries, and the per-message header MD5.

use crate::types::MessageFlags;

use super::format::*;

#[derive(Debug, Clone, Default)]
pub struct ParsedHeaders {
    pub status: MessageFlags,
    pub x_status: MessageFlags,
    pub keywords: Vec<String>,
    pub uid: Option<u32>,
    pub uid_validity: Option<u32>,
    pub uid_last: Option<u32>,
    /// Absolute buffer offset of the 10-digit uid-last field, if this is
    /// the pseudo message's X-IMAP(base) header.
    pub uid_last_offset: Option<usize>,
    pub content_length: Option<usize>,
    pub is_pseudo: bool,
}

#[derive(Debug, Clone)]
pub struct RawMessage {
    pub from_offset: usize,
    pub header_offset: usize,
    pub body_offset: usize,
    pub body_size: usize,
    /// Offset of the next message's `From ` line, or `None` at EOF.
    pub next_offset: Option<usize>,
    pub headers: ParsedHeaders,
    pub header_md5: [u8; 16],
    /// Bytes of reusable trailing whitespace immediately before the
    /// header-terminating blank line (spec.md §3 "space").
    pub trailing_padding: usize,
}

pub trait Parser {
    /// Parse the message whose `From ` line begins at `from_offset`.
    /// Returns `Ok(None)` if `from_offset` is at or past EOF.
    fn parse_at(&self, buf: &[u8], from_offset: usize) -> std::io::Result<Option<RawMessage>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MboxParser;

impl Parser for MboxParser {
    fn parse_at(&self, buf: &[u8], from_offset: usize) -> std::io::Result<Option<RawMessage>> {
        if from_offset >= buf.len() {
            return Ok(None);
        }
        if !buf[from_offset..].starts_with(FROM_PREFIX) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected From line at offset {from_offset}"),
            ));
        }

        let from_line_end = find_byte(buf, from_offset, b'\n')
            .map(|p| p + 1)
            .unwrap_or(buf.len());
        let header_offset = from_line_end;

        let (body_offset, headers) = parse_headers(buf, header_offset);
        let trailing_padding = count_trailing_padding(buf, header_offset, body_offset);

        let next_offset = find_next_from(buf, body_offset);
        let body_end = next_offset.unwrap_or(buf.len());
        let body_size = body_end.saturating_sub(body_offset);

        let header_md5 = md5::compute(&buf[header_offset..body_offset]).0;

        Ok(Some(RawMessage {
            from_offset,
            header_offset,
            body_offset,
            body_size,
            next_offset,
            headers,
            header_md5,
            trailing_padding,
        }))
    }
}

fn find_byte(buf: &[u8], from: usize, needle: u8) -> Option<usize> {
    buf[from..].iter().position(|&c| c == needle).map(|p| p + from)
}

/// Find the offset of the `F` in the next `\nFrom ` occurrence at or after
/// `from`, i.e. the start of the next message's From line.
fn find_next_from(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(6)
        .position(|w| w == b"\nFrom ")
        .map(|p| from + p + 1)
}

fn parse_headers(buf: &[u8], header_start: usize) -> (usize, ParsedHeaders) {
    let mut headers = ParsedHeaders::default();
    let mut pos = header_start;

    loop {
        if pos >= buf.len() {
            break;
        }
        if buf[pos] == b'\n' {
            pos += 1; // consume the blank line terminating the headers
            break;
        }

        let line_end = find_byte(buf, pos, b'\n').map(|p| p + 1).unwrap_or(buf.len());
        let raw_line = &buf[pos..line_end];
        let mut content_end = raw_line.len();
        if content_end > 0 && raw_line[content_end - 1] == b'\n' {
            content_end -= 1;
        }
        if content_end > 0 && raw_line[content_end - 1] == b'\r' {
            content_end -= 1;
        }
        let line_content = &raw_line[..content_end];

        if let Some(colon) = line_content.iter().position(|&c| c == b':') {
            let key = String::from_utf8_lossy(&line_content[..colon]).to_string();
            let mut val_start = colon + 1;
            if val_start < line_content.len() && line_content[val_start] == b' ' {
                val_start += 1;
            }
            let value_bytes = &line_content[val_start..];
            let value = String::from_utf8_lossy(value_bytes).to_string();
            let value_abs_start = pos + val_start;
            apply_header(&mut headers, &key, &value, value_abs_start);
        }

        pos = line_end;
    }

    (pos, headers)
}

fn apply_header(headers: &mut ParsedHeaders, key: &str, value: &str, value_abs_start: usize) {
    if key.eq_ignore_ascii_case(HDR_STATUS) {
        headers.status = decode_status(value);
    } else if key.eq_ignore_ascii_case(HDR_X_STATUS) {
        headers.x_status = decode_x_status(value);
    } else if key.eq_ignore_ascii_case(HDR_X_KEYWORDS) {
        headers.keywords = decode_keywords(value);
    } else if key.eq_ignore_ascii_case(HDR_X_UID) {
        headers.uid = value.trim().parse::<u32>().ok();
    } else if key.eq_ignore_ascii_case(HDR_CONTENT_LENGTH) {
        headers.content_length = value.trim().parse::<usize>().ok();
    } else if key.eq_ignore_ascii_case(HDR_X_IMAP) || key.eq_ignore_ascii_case(HDR_X_IMAPBASE) {
        headers.is_pseudo = true;
        let bytes = value.as_bytes();
        let mut i = 0;
        while i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        let validity_start = i;
        while i < bytes.len() && bytes[i] != b' ' {
            i += 1;
        }
        headers.uid_validity = value[validity_start..i].parse().ok();

        while i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        let last_start = i;
        while i < bytes.len() && bytes[i] != b' ' {
            i += 1;
        }
        headers.uid_last = value[last_start..i].parse().ok();
        if last_start < i {
            headers.uid_last_offset = Some(value_abs_start + last_start);
        }
    }
}

/// Count bytes of horizontal whitespace immediately before the blank line
/// that terminates the header block (the in-place rewrite padding budget).
fn count_trailing_padding(buf: &[u8], header_start: usize, body_offset: usize) -> usize {
    if body_offset < header_start + 2 {
        return 0;
    }
    // body_offset - 1 is the '\n' of the blank line; body_offset - 2 is the
    // '\n' that ends the last header line (or, if headers are empty, the
    // '\n' of the from-line itself, which is outside our range).
    let mut i = body_offset - 2;
    let mut count = 0usize;
    while i > header_start && (buf[i - 1] == b' ' || buf[i - 1] == b'\t') {
        count += 1;
        i -= 1;
    }
    count
}
