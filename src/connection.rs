//! Per-connection byte-stream handling: parses the HTTP/1.1 request line,
//! headers and body off the wire, and serializes a [`Response`] back onto
//! it. Handles every method and arbitrary request bodies, including
//! POSTed forms and multipart uploads, not just static-file GETs.

use crate::error::{Error, Result};
use crate::multipart;
use crate::request::RawRequest;
use crate::response::Body;
use crate::util::{header_contains, trim_header_line};
use rustls::pki_types::CertificateDer;
use std::io::{Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

pub const MAX_REQUEST_LINE_SIZE: usize = 8192;
pub const MAX_HEADER_SIZE: usize = 8192;

/// One parsed request line plus its header block, read off an
/// [`tokio::io::AsyncBufRead`]-wrapped stream. The body, if any, is read
/// separately once the caller knows whether it wants to treat it as
/// multipart/urlencoded/raw.
pub struct ParsedHead {
    pub method: String,
    pub path: String,
    pub query: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

/// Reads one request's start line and header block from `reader`.
/// Returns `Ok(None)` on a clean connection close (0-byte read on the
/// request line), so the keep-alive loop can exit without an error.
pub async fn read_head<R>(reader: &mut BufReader<R>) -> Result<Option<ParsedHead>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(128);
    let n = reader.read_until(b'\n', &mut line).await.map_err(Error::Io)?;
    if n == 0 {
        return Ok(None);
    }
    if line.len() > MAX_REQUEST_LINE_SIZE {
        return Err(Error::PayloadTooLarge);
    }
    let request_line = trim_header_line(&line);
    if request_line.is_empty() {
        return Ok(None);
    }
    let (method, path_and_query, version) = parse_request_line(request_line).ok_or(Error::InvalidArgument)?;
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p.to_owned(), q.to_owned()),
        None => (path_and_query.to_owned(), String::new()),
    };

    let mut headers = Vec::new();
    let mut header_buf = Vec::with_capacity(256);
    let mut total_header_bytes = 0usize;
    loop {
        header_buf.clear();
        let n = reader
            .read_until(b'\n', &mut header_buf)
            .await
            .map_err(Error::Io)?;
        if n == 0 {
            break;
        }
        total_header_bytes += n;
        if total_header_bytes > MAX_HEADER_SIZE {
            return Err(Error::PayloadTooLarge);
        }
        let line = trim_header_line(&header_buf);
        if line.is_empty() {
            break;
        }
        if let Some(colon) = line.iter().position(|&b| b == b':') {
            let name = String::from_utf8_lossy(trim_header_line(&line[..colon])).into_owned();
            let value = String::from_utf8_lossy(trim_header_line(&line[colon + 1..])).into_owned();
            headers.push((name, value));
        }
    }

    Ok(Some(ParsedHead {
        method: String::from_utf8_lossy(method).into_owned(),
        path,
        query,
        version: String::from_utf8_lossy(version).into_owned(),
        headers,
    }))
}

fn parse_request_line(line: &[u8]) -> Option<(&[u8], &str, &[u8])> {
    let mut parts = line.split(|&b| b == b' ').filter(|p| !p.is_empty());
    let method = parts.next()?;
    let path = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((method, std::str::from_utf8(path).ok()?, version))
}

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Whether the connection should stay open after this request, derived
/// from the `Connection:` header plus the HTTP version default.
pub fn keep_alive_from_headers(version: &str, headers: &[(String, String)]) -> bool {
    match header_value(headers, "Connection") {
        Some(v) if header_contains(v.as_bytes(), b"close") => false,
        Some(v) if header_contains(v.as_bytes(), b"keep-alive") => true,
        _ => version == "HTTP/1.1",
    }
}

/// Reads a request body of the length declared by `Content-Length`, up to
/// `limit` bytes (0 = unbounded). Chunked transfer encoding is decoded
/// into a single contiguous buffer.
pub async fn read_body<R>(
    reader: &mut BufReader<R>,
    headers: &[(String, String)],
    limit: u64,
) -> Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    if header_value(headers, "Transfer-Encoding")
        .map(|v| header_contains(v.as_bytes(), b"chunked"))
        .unwrap_or(false)
    {
        return read_chunked_body(reader, limit).await;
    }
    let content_length: u64 = header_value(headers, "Content-Length")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    multipart::enforce_payload_limit(content_length as usize, limit)?;
    if content_length == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; content_length as usize];
    reader.read_exact(&mut buf).await.map_err(Error::Io)?;
    Ok(buf)
}

async fn read_chunked_body<R>(reader: &mut BufReader<R>, limit: u64) -> Result<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let mut size_line = Vec::new();
        reader
            .read_until(b'\n', &mut size_line)
            .await
            .map_err(Error::Io)?;
        let size_line = trim_header_line(&size_line);
        let size_str = std::str::from_utf8(size_line).map_err(|_| Error::InvalidArgument)?;
        let size_str = size_str.split(';').next().unwrap_or("0");
        let size = u64::from_str_radix(size_str.trim(), 16).map_err(|_| Error::InvalidArgument)?;
        if size == 0 {
            let mut trailer = Vec::new();
            reader.read_until(b'\n', &mut trailer).await.map_err(Error::Io)?;
            break;
        }
        let mut chunk = vec![0u8; size as usize];
        reader.read_exact(&mut chunk).await.map_err(Error::Io)?;
        body.extend_from_slice(&chunk);
        multipart::enforce_payload_limit(body.len(), limit)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await.map_err(Error::Io)?;
    }
    Ok(body)
}

/// Builds the [`RawRequest`] the rest of the pipeline consumes from a
/// parsed head plus connection metadata.
pub fn build_raw_request(
    head: ParsedHead,
    peer_addr: SocketAddr,
    tls: bool,
    tls_session: Option<Arc<Vec<CertificateDer<'static>>>>,
) -> RawRequest {
    RawRequest {
        version: head.version,
        method: head.method,
        path: head.path,
        query: head.query,
        header_lines: head.headers,
        peer_addr,
        tls,
        tls_session,
    }
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Serializes a status line, headers, and body onto `writer`.
pub async fn write_response<W>(
    writer: &mut W,
    status: u16,
    headers: &crate::strmap::StrMap,
    body: Option<Body>,
    is_head: bool,
) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(format!("HTTP/1.1 {status} {}\r\n", status_reason(status)).as_bytes());
    if headers.get("Date").is_none() {
        head.extend_from_slice(format!("Date: {}\r\n", httpdate::fmt_http_date(std::time::SystemTime::now())).as_bytes());
    }

    let content_length = match &body {
        Some(Body::Buffer(b)) => Some(b.len() as u64),
        Some(Body::File { size, .. }) => Some(*size),
        _ => None,
    };

    for entry in headers.entries() {
        head.extend_from_slice(entry.name().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(entry.value().as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    if let Some(len) = content_length {
        head.extend_from_slice(format!("Content-Length: {len}\r\n").as_bytes());
    } else if body.is_some() {
        head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
    }
    head.extend_from_slice(b"\r\n");
    writer.write_all(&head).await.map_err(Error::Io)?;

    if is_head {
        writer.flush().await.map_err(Error::Io)?;
        return Ok(());
    }

    match body {
        None => {}
        Some(Body::Buffer(buf)) => {
            writer.write_all(&buf).await.map_err(Error::Io)?;
        }
        Some(Body::File { mut file, offset, size }) => {
            file.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
            write_sync_reader_chunked(writer, &mut file.take(size)).await?;
        }
        Some(Body::Stream(mut reader)) => {
            write_sync_reader_chunked(writer, &mut reader).await?;
        }
        Some(Body::CompressedStream(mut reader)) => {
            write_sync_reader_chunked(writer, &mut reader).await?;
        }
        Some(Body::GzipFile(mut reader)) => {
            write_sync_reader_chunked(writer, &mut reader).await?;
        }
    }
    writer.flush().await.map_err(Error::Io)?;
    Ok(())
}

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Chunked-encodes a blocking [`Read`] source onto an async writer. The
/// source (file reads, zlib compression) is synchronous by construction;
/// each chunk is read on the current task and written out before the next
/// is pulled, one chunk at a time, which is adequate for a
/// worker-per-connection model where blocking briefly is acceptable.
async fn write_sync_reader_chunked<W>(writer: &mut W, reader: &mut dyn Read) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(Error::Io)?;
        if n == 0 {
            writer.write_all(b"0\r\n\r\n").await.map_err(Error::Io)?;
            break;
        }
        writer
            .write_all(format!("{n:x}\r\n").as_bytes())
            .await
            .map_err(Error::Io)?;
        writer.write_all(&buf[..n]).await.map_err(Error::Io)?;
        writer.write_all(b"\r\n").await.map_err(Error::Io)?;
    }
    Ok(())
}
