//! Wire-format parsing for request bodies: `multipart/form-data` and
//! `application/x-www-form-urlencoded`, feeding [`crate::upload::UploadEngine`]
//! and the fields map one part at a time.
//!
//! This parser takes the whole body at once rather than streaming each
//! chunk straight to disk: the connection layer already buffers the
//! request to enforce payload/upload limits before handing it off, so
//! there is no streaming benefit left to preserve here.

use crate::error::{Error, Result};
use crate::util::percent_decode;

pub struct Part<'a> {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub transfer_encoding: Option<String>,
    pub data: &'a [u8],
}

/// Extracts the `boundary=` parameter from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let param = param.trim();
        param.strip_prefix("boundary=").map(|b| b.trim_matches('"').to_owned())
    })
}

/// Splits a `multipart/form-data` body into its parts. Each part's headers
/// (`Content-Disposition`, `Content-Type`, `Content-Transfer-Encoding`) are
/// parsed out of the bytes preceding the blank line that starts its body.
pub fn parse_multipart<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut parts = Vec::new();
    let mut cursor = 0;
    while let Some(rel) = find(&body[cursor..], &delimiter) {
        let start = cursor + rel + delimiter.len();
        cursor = start;
        if body[cursor..].starts_with(b"--") {
            break;
        }
        let next = find(&body[cursor..], &delimiter).map(|r| cursor + r).unwrap_or(body.len());
        let segment = trim_crlf(&body[cursor..next]);
        if let Some(part) = parse_one_part(segment) {
            parts.push(part);
        }
        cursor = next;
    }
    Ok(parts)
}

fn trim_crlf(buf: &[u8]) -> &[u8] {
    let mut end = buf.len();
    while end >= 2 && &buf[end - 2..end] == b"\r\n" {
        end -= 2;
        break;
    }
    &buf[..end]
}

fn parse_one_part(segment: &[u8]) -> Option<Part<'_>> {
    let header_end = find(segment, b"\r\n\r\n")?;
    let header_block = &segment[..header_end];
    let body = &segment[header_end + 4..];

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    let mut transfer_encoding = None;

    for line in header_block.split(|&b| b == b'\n') {
        let line = std::str::from_utf8(trim_crlf(line)).ok()?;
        if let Some(rest) = case_insensitive_strip(line, "content-disposition:") {
            for piece in rest.split(';') {
                let piece = piece.trim();
                if let Some(v) = piece.strip_prefix("name=") {
                    name = Some(unquote(v));
                } else if let Some(v) = piece.strip_prefix("filename=") {
                    filename = Some(unquote(v));
                }
            }
        } else if let Some(rest) = case_insensitive_strip(line, "content-type:") {
            content_type = Some(rest.trim().to_owned());
        } else if let Some(rest) = case_insensitive_strip(line, "content-transfer-encoding:") {
            transfer_encoding = Some(rest.trim().to_owned());
        }
    }

    Some(Part {
        name: name?,
        filename,
        content_type,
        transfer_encoding,
        data: body,
    })
}

fn case_insensitive_strip<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').to_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parses an `application/x-www-form-urlencoded` body into name/value
/// pairs, decoding `+` as space and `%XX` escapes.
pub fn parse_urlencoded(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut it = pair.splitn(2, '=');
            let key = it.next().unwrap_or("");
            let value = it.next().unwrap_or("");
            (percent_decode(key, true), percent_decode(value, true))
        })
        .collect()
}

/// Validates that a body claiming `uploads_limit`/`payload_limit`
/// respects them before parsing starts.
pub fn enforce_payload_limit(size: usize, limit: u64) -> Result<()> {
    if limit > 0 && size as u64 > limit {
        return Err(Error::PayloadTooLarge);
    }
    Ok(())
}
