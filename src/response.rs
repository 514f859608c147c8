//! Outgoing HTTP response.
//!
//! A response carries headers plus exactly one of five body sources
//! (buffer, file, stream, compressed stream, gzip file); `already()`
//! reports whether one has been set, and every `send*` call fails once
//! it has.

use crate::compress::{self, BoundedReader};
use crate::error::{Error, Result};
use crate::strmap::StrMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub(crate) const CONTENT_TYPE: &str = "Content-Type";
pub(crate) const CONTENT_DISPOSITION: &str = "Content-Disposition";
pub(crate) const CONTENT_ENCODING: &str = "Content-Encoding";
pub(crate) const SET_COOKIE: &str = "Set-Cookie";

/// One of the five ways a response body can be produced. `Stream` and its
/// compressed variants are boxed trait objects since the handle supplied
/// by the caller (a file, a generator, anything `Read`) is erased here.
pub enum Body {
    Buffer(Vec<u8>),
    File {
        file: File,
        offset: u64,
        size: u64,
    },
    Stream(Box<dyn Read + Send>),
    CompressedStream(Box<dyn Read + Send>),
    GzipFile(Box<dyn Read + Send>),
}

pub struct Response {
    headers: StrMap,
    status: u16,
    body: Option<Body>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            headers: StrMap::new(),
            status: 500,
            body: None,
        }
    }

    pub fn headers(&self) -> &StrMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut StrMap {
        &mut self.headers
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn into_body(self) -> Option<Body> {
        self.body
    }

    /// Whether a body has already been assigned — every `send*` method
    /// fails with [`Error::Already`] once this is true.
    pub fn already(&self) -> bool {
        self.body.is_some()
    }

    /// Clears the body and headers and resets the status to 500.
    pub fn clear(&mut self) {
        self.headers.cleanup();
        self.body = None;
        self.status = 500;
    }

    /// Clears the status and body while preserving headers and cookies set
    /// so far, allowing a fresh `send*` call.
    pub fn reset(&mut self) {
        self.body = None;
        self.status = 500;
    }

    /// Clears only the body, allowing a fresh `send*` call without losing
    /// headers set so far — used internally when a higher-level retry
    /// (e.g. `zsend` falling back to uncompressed) needs to replace the
    /// handle.
    fn reset_body(&mut self) {
        self.body = None;
    }

    fn validate_status(status: u16) -> Result<()> {
        if !(100..=599).contains(&status) {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Appends a `Set-Cookie` header, validating the name is
    /// token-safe (`[A-Za-z0-9_]+`) and the value is printable ASCII.
    pub fn set_cookie(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || !name.chars().all(|c| c == '_' || c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidArgument);
        }
        if !value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            return Err(Error::InvalidArgument);
        }
        self.headers.add(SET_COOKIE, &format!("{name}={value}"));
        Ok(())
    }

    pub fn send_binary(&mut self, buf: Vec<u8>, content_type: Option<&str>, status: u16) -> Result<()> {
        Self::validate_status(status)?;
        if self.already() {
            return Err(Error::Already);
        }
        if let Some(ct) = content_type {
            self.headers.set(CONTENT_TYPE, ct);
        }
        self.body = Some(Body::Buffer(buf));
        self.status = status;
        Ok(())
    }

    /// Sends a file from disk: `size == 0` means "rest of the file from
    /// `offset`", `max_size > 0` rejects files larger than the cap, and
    /// `disposition` (e.g. `"attachment"`) adds a `Content-Disposition`
    /// header naming the file's basename.
    pub fn send_file(
        &mut self,
        path: &Path,
        offset: u64,
        size: u64,
        max_size: u64,
        disposition: Option<&str>,
        status: u16,
    ) -> Result<()> {
        Self::validate_status(status)?;
        if self.already() {
            return Err(Error::Already);
        }
        let file = File::open(path).map_err(|_| Error::BadFile)?;
        let metadata = file.metadata().map_err(|_| Error::BadFile)?;
        if metadata.is_dir() {
            return Err(Error::IsADirectory);
        }
        if !metadata.is_file() {
            return Err(Error::BadFile);
        }
        if max_size > 0 && metadata.len() > max_size {
            return Err(Error::FileTooBig);
        }
        let resolved_size = if size == 0 {
            metadata.len().saturating_sub(offset)
        } else {
            size
        };
        if let Some(disposition) = disposition {
            let filename = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("download");
            self.headers
                .set(CONTENT_DISPOSITION, &format!("{disposition}; filename=\"{filename}\""));
        }
        self.body = Some(Body::File {
            file,
            offset,
            size: resolved_size,
        });
        self.status = status;
        Ok(())
    }

    pub fn send_stream(&mut self, reader: Box<dyn Read + Send>, status: u16) -> Result<()> {
        Self::validate_status(status)?;
        if self.already() {
            return Err(Error::Already);
        }
        self.body = Some(Body::Stream(reader));
        self.status = status;
        Ok(())
    }

    /// Compresses `buf` in place: if compression doesn't shrink the
    /// payload, falls back to sending it raw with no `Content-Encoding`
    /// header.
    pub fn zsend_binary(
        &mut self,
        level: u32,
        buf: Vec<u8>,
        content_type: Option<&str>,
        status: u16,
    ) -> Result<()> {
        Self::validate_status(status)?;
        if self.already() {
            return Err(Error::Already);
        }
        let compressed = compress::zcompress_buffer(&buf, level)?;
        if compressed.compressed {
            self.headers.set(CONTENT_ENCODING, "deflate");
        }
        if let Some(ct) = content_type {
            self.headers.set(CONTENT_TYPE, ct);
        }
        self.body = Some(Body::Buffer(compressed.bytes));
        self.status = status;
        Ok(())
    }

    /// Streams `reader` through raw-deflate compression.
    pub fn zsend_stream(
        &mut self,
        level: u32,
        reader: Box<dyn Read + Send>,
        max_size: u64,
        status: u16,
    ) -> Result<()> {
        Self::validate_status(status)?;
        if self.already() {
            return Err(Error::Already);
        }
        self.headers.set(CONTENT_ENCODING, "deflate");
        let bounded = BoundedReader::new(reader, max_size);
        let encoder = flate2::read::DeflateEncoder::new(bounded, flate2::Compression::new(level));
        self.body = Some(Body::CompressedStream(Box::new(encoder)));
        self.status = status;
        Ok(())
    }

    /// Streams a file through gzip framing.
    pub fn gzip_file(
        &mut self,
        path: &Path,
        offset: u64,
        max_size: u64,
        level: u32,
        disposition: Option<&str>,
        status: u16,
    ) -> Result<()> {
        use std::io::{Seek, SeekFrom};
        Self::validate_status(status)?;
        if self.already() {
            return Err(Error::Already);
        }
        let mut file = File::open(path).map_err(|_| Error::BadFile)?;
        let metadata = file.metadata().map_err(|_| Error::BadFile)?;
        if metadata.is_dir() {
            return Err(Error::IsADirectory);
        }
        if max_size > 0 && metadata.len() > max_size {
            return Err(Error::FileTooBig);
        }
        file.seek(SeekFrom::Start(offset)).map_err(|_| Error::BadFile)?;
        if let Some(disposition) = disposition {
            let filename = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("download");
            self.headers
                .set(CONTENT_DISPOSITION, &format!("{disposition}; filename=\"{filename}\""));
        }
        self.headers.set(CONTENT_ENCODING, "gzip");
        let bounded = BoundedReader::new(file, 0);
        let encoder = flate2::read::GzEncoder::new(bounded, flate2::Compression::new(level));
        self.body = Some(Body::GzipFile(Box::new(encoder)));
        self.status = status;
        Ok(())
    }

    /// Replaces an already-set body with a fresh attempt, used by
    /// higher-level helpers that retry uncompressed after a failed
    /// compression attempt. Kept internal-only so the public contract
    /// still requires a fresh `send*` call per response.
    pub(crate) fn retry_with(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.reset_body();
        f(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_binary_rejects_invalid_status() {
        let mut res = Response::new();
        assert!(matches!(
            res.send_binary(b"hi".to_vec(), None, 99),
            Err(Error::InvalidArgument)
        ));
        assert!(matches!(
            res.send_binary(b"hi".to_vec(), None, 600),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn send_binary_sets_body_and_status() {
        let mut res = Response::new();
        res.send_binary(b"hi".to_vec(), Some("text/plain"), 200).unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.already());
        assert_eq!(res.headers().get("content-type"), Some("text/plain"));
    }

    #[test]
    fn second_send_fails_with_already() {
        let mut res = Response::new();
        res.send_binary(b"hi".to_vec(), None, 200).unwrap();
        assert!(matches!(
            res.send_binary(b"bye".to_vec(), None, 200),
            Err(Error::Already)
        ));
    }

    #[test]
    fn reset_preserves_headers_but_clears_status_and_body() {
        let mut res = Response::new();
        res.set_cookie("session_id", "abc123").unwrap();
        res.send_binary(b"hi".to_vec(), Some("text/plain"), 200).unwrap();
        res.reset();
        assert_eq!(res.status(), 500);
        assert!(!res.already());
        assert_eq!(res.headers().get("set-cookie"), Some("session_id=abc123"));
        res.send_binary(b"bye".to_vec(), None, 201).unwrap();
        assert_eq!(res.status(), 201);
    }

    #[test]
    fn clear_resets_status_headers_and_body() {
        let mut res = Response::new();
        res.send_binary(b"hi".to_vec(), Some("text/plain"), 200).unwrap();
        res.clear();
        assert_eq!(res.status(), 500);
        assert!(!res.already());
        assert!(res.headers().is_empty());
    }

    #[test]
    fn set_cookie_validates_name_and_value() {
        let mut res = Response::new();
        assert!(res.set_cookie("session_id", "abc123").is_ok());
        assert!(matches!(
            res.set_cookie("bad name", "v"),
            Err(Error::InvalidArgument)
        ));
        assert!(matches!(
            res.set_cookie("name", "bad\nvalue"),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn zsend_binary_falls_back_for_tiny_payloads() {
        let mut res = Response::new();
        res.zsend_binary(6, b"a".to_vec(), None, 200).unwrap();
        assert_eq!(res.headers().get("content-encoding"), None);
    }

    #[test]
    fn zsend_binary_compresses_large_payloads() {
        let mut res = Response::new();
        let payload = vec![b'a'; 4096];
        res.zsend_binary(6, payload, None, 200).unwrap();
        assert_eq!(res.headers().get("content-encoding"), Some("deflate"));
    }

    #[test]
    fn send_file_rejects_directory() {
        let mut res = Response::new();
        let dir = std::env::temp_dir();
        assert!(matches!(
            res.send_file(&dir, 0, 0, 0, None, 200),
            Err(Error::IsADirectory)
        ));
    }

    #[test]
    fn send_file_enforces_max_size() {
        let mut res = Response::new();
        let mut path = std::env::temp_dir();
        path.push("kiss_response_test_max_size.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        let result = res.send_file(&path, 0, 0, 5, None, 200);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::FileTooBig)));
    }
}
