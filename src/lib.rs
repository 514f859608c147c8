//! Embeddable HTTP/1.1 server library: request lifecycle, routing,
//! multipart uploads, and compressed streaming responses.
//!
//! [`strmap`] is an insertion-ordered, case-insensitive multimap used for
//! headers, cookies, query params, and form fields. [`strbuf`] is a small
//! growable byte buffer. [`router`] matches request paths against
//! registered regex routes. [`request`]/[`response`] model one HTTP
//! exchange. [`upload`]/[`multipart`] handle streaming file uploads and
//! form bodies. [`auth`] implements HTTP Basic authentication. [`server`]
//! ties accept loop, TLS, and dispatch together.

pub mod auth;
pub mod compress;
pub mod connection;
pub mod error;
pub mod mime;
pub mod multipart;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod strbuf;
pub mod strmap;
pub mod tls;
pub mod upload;
pub mod util;

pub use auth::{AuthGate, AuthOutcome};
pub use error::{Error, Result};
pub use mime::{get_mime_type, get_mime_type_enum, MimeType};
pub use request::{RawRequest, Request};
pub use response::{Body, Response};
pub use router::{DispatchError, Route, RouteMatch, Router};
pub use server::{Server, ServerConfig, ServerHandle};
pub use strbuf::Str;
pub use strmap::StrMap;
pub use upload::{Upload, UploadEngine};
