//! MIME type lookup for `sendfile`/`gzipfile` responses and the multipart
//! engine's content-type defaults.
//!
//! An enum plus a static string table gives O(1) dispatch without pulling
//! in a `HashMap` for a fixed, small set of extensions.

use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MimeType {
    Html = 0,
    Css = 1,
    Javascript = 2,
    Json = 3,
    Xml = 4,
    PlainText = 5,
    Icon = 6,
    Png = 7,
    Jpeg = 8,
    Gif = 9,
    Svg = 10,
    Pdf = 11,
    Woff = 12,
    Woff2 = 13,
    Ttf = 14,
    Eot = 15,
    OctetStream = 16,
}

impl MimeType {
    const MIME_STRINGS: [&'static str; 17] = [
        "text/html; charset=utf-8",
        "text/css; charset=utf-8",
        "text/javascript; charset=utf-8",
        "application/json; charset=utf-8",
        "application/xml; charset=utf-8",
        "text/plain; charset=utf-8",
        "image/x-icon",
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/svg+xml",
        "application/pdf",
        "font/woff",
        "font/woff2",
        "font/ttf",
        "application/vnd.ms-fontobject",
        "application/octet-stream",
    ];

    pub fn as_str(self) -> &'static str {
        Self::MIME_STRINGS[self as usize]
    }
}

pub fn get_mime_type_enum(file_path: &Path) -> MimeType {
    if let Some(extension) = file_path.extension().and_then(|s| s.to_str()) {
        match extension.to_ascii_lowercase().as_str() {
            "html" | "htm" => MimeType::Html,
            "css" => MimeType::Css,
            "js" => MimeType::Javascript,
            "json" => MimeType::Json,
            "xml" => MimeType::Xml,
            "txt" => MimeType::PlainText,
            "ico" => MimeType::Icon,
            "png" => MimeType::Png,
            "jpg" | "jpeg" => MimeType::Jpeg,
            "gif" => MimeType::Gif,
            "svg" => MimeType::Svg,
            "pdf" => MimeType::Pdf,
            "woff" => MimeType::Woff,
            "woff2" => MimeType::Woff2,
            "ttf" => MimeType::Ttf,
            "eot" => MimeType::Eot,
            _ => MimeType::OctetStream,
        }
    } else {
        MimeType::OctetStream
    }
}

pub fn get_mime_type(file_path: &str) -> &'static str {
    get_mime_type_enum(Path::new(file_path)).as_str()
}
