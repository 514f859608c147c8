//! Crate-wide error taxonomy.
//!
//! Variant names describe the failed precondition rather than any
//! particular OS error number, even though most map directly onto one
//! (`InvalidArgument` ~ `EINVAL`, `Exists` ~ `EEXIST`, and so on).

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,

    #[error("already set")]
    Already,

    #[error("not found")]
    NotFound,

    #[error("destination exists")]
    Exists,

    #[error("destination is a directory")]
    IsADirectory,

    #[error("bad file")]
    BadFile,

    #[error("file too big")]
    FileTooBig,

    #[error("out of memory")]
    OutOfMemory,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("upload too large")]
    UploadTooLarge,

    #[error("compression error: {0}")]
    CompressionError(i32),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stable, human-readable message handed to a registered `error_cb`.
///
/// The library filters exactly one message out of the external logger
/// (the one corresponding to a request handler finishing normally after
/// the connection was already gone); see [`IGNORED_ERROR_MESSAGE`].
pub const IGNORED_ERROR_MESSAGE: &str =
    "Application reported internal error, closing connection.\n";

impl Error {
    /// Renders the message the way it is handed to `error_cb`: a short,
    /// capitalized sentence ending in a period and a newline.
    pub fn as_cb_message(&self) -> String {
        match self {
            Error::PayloadTooLarge => "Payload too large.\n".to_owned(),
            Error::UploadTooLarge => "Upload too large.\n".to_owned(),
            other => format!("{other}.\n"),
        }
    }
}
