//! Incoming HTTP request.
//!
//! Headers/cookies/query params are lazily materialized on first access:
//! `OnceCell`-backed fields are populated, on demand, from the raw request
//! line and header block the connection layer already parsed off the wire.
//! A handler that only reads the path never pays for parsing the rest.

use crate::auth::AuthGate;
use crate::error::Result;
use crate::strmap::StrMap;
use crate::upload::UploadEngine;
use once_cell::sync::OnceCell;
use rustls::pki_types::CertificateDer;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

/// Raw material the connection layer hands to a `Request` before any
/// lazy accessor has run.
pub struct RawRequest {
    pub version: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub header_lines: Vec<(String, String)>,
    pub peer_addr: SocketAddr,
    pub tls: bool,
    /// The peer's certificate chain, present whenever the connection is
    /// TLS (empty when the client presented none); `None` over plain HTTP.
    pub tls_session: Option<Arc<Vec<CertificateDer<'static>>>>,
}

pub struct Request {
    raw: RawRequest,
    headers: OnceCell<StrMap>,
    cookies: OnceCell<StrMap>,
    params: OnceCell<StrMap>,
    fields: StrMap,
    payload: Vec<u8>,
    uploads: UploadEngine,
    is_uploading: bool,
    auth: AuthGate,
    user_data: Option<Box<dyn Any + Send + Sync>>,
    isolated: bool,
}

impl Request {
    pub fn new(raw: RawRequest) -> Self {
        let auth_header = raw
            .header_lines
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .map(|(_, value)| value.as_str());
        let auth = AuthGate::from_authorization_header(auth_header);
        Self {
            raw,
            headers: OnceCell::new(),
            cookies: OnceCell::new(),
            params: OnceCell::new(),
            fields: StrMap::new(),
            payload: Vec::new(),
            uploads: UploadEngine::new(),
            is_uploading: false,
            auth,
            user_data: None,
            isolated: false,
        }
    }

    pub fn version(&self) -> &str {
        &self.raw.version
    }

    pub fn method(&self) -> &str {
        &self.raw.method
    }

    pub fn path(&self) -> &str {
        &self.raw.path
    }

    /// Lazily parses the raw header lines into a [`StrMap`] on first
    /// access.
    pub fn headers(&self) -> &StrMap {
        self.headers.get_or_init(|| {
            let mut map = StrMap::new();
            for (name, value) in &self.raw.header_lines {
                map.add(name, value);
            }
            map
        })
    }

    /// Lazily parses the `Cookie` header into a [`StrMap`].
    pub fn cookies(&self) -> &StrMap {
        self.cookies.get_or_init(|| {
            let mut map = StrMap::new();
            if let Some(cookie_header) = self.headers().get("Cookie") {
                for pair in cookie_header.split(';') {
                    if let Some((name, value)) = pair.trim().split_once('=') {
                        map.add(name.trim(), value.trim());
                    }
                }
            }
            map
        })
    }

    /// Lazily parses the query string into a [`StrMap`].
    pub fn params(&self) -> &StrMap {
        self.params.get_or_init(|| {
            let mut map = StrMap::new();
            for (key, value) in crate::multipart::parse_urlencoded(&self.raw.query) {
                map.add(&key, &value);
            }
            map
        })
    }

    pub fn fields(&self) -> &StrMap {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut StrMap {
        &mut self.fields
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    pub fn is_uploading(&self) -> bool {
        self.is_uploading
    }

    pub fn set_uploading(&mut self, uploading: bool) {
        self.is_uploading = uploading;
    }

    pub fn uploads(&self) -> &UploadEngine {
        &self.uploads
    }

    pub fn uploads_mut(&mut self) -> &mut UploadEngine {
        &mut self.uploads
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut AuthGate {
        &mut self.auth
    }

    /// The peer's address as a plain IP string.
    pub fn ip(&self) -> String {
        self.raw.peer_addr.ip().to_string()
    }

    pub fn is_tls(&self) -> bool {
        self.raw.tls
    }

    /// The active TLS client certificate chain, if the connection is TLS
    /// and the client presented one. `None` over plain HTTP; `Some(&[])`
    /// over TLS with no client certificate.
    pub fn tls_session(&self) -> Option<&[CertificateDer<'static>]> {
        self.raw.tls_session.as_deref().map(Vec::as_slice)
    }

    pub fn set_user_data<T: Any + Send + Sync>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.as_ref().and_then(|d| d.downcast_ref::<T>())
    }

    /// Whether [`Self::isolate`] has already been called for this request.
    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    /// Moves the rest of this request's processing into a dedicated
    /// blocking thread for the duration of `f`, so the caller can do
    /// blocking work without starving other connections. Realized with
    /// `tokio::task::spawn_blocking` rather than a raw thread, so the
    /// isolated work still participates in the runtime's scheduling and
    /// shutdown. Can only be called once per request; a second call fails
    /// with [`Error::Already`].
    pub async fn isolate<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.isolated {
            return Err(crate::error::Error::Already);
        }
        self.isolated = true;
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|_| crate::error::Error::Already)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_request(path: &str, query: &str, headers: Vec<(&str, &str)>) -> Request {
        let raw = RawRequest {
            version: "HTTP/1.1".to_owned(),
            method: "GET".to_owned(),
            path: path.to_owned(),
            query: query.to_owned(),
            header_lines: headers
                .into_iter()
                .map(|(n, v)| (n.to_owned(), v.to_owned()))
                .collect(),
            peer_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 4242),
            tls: false,
            tls_session: None,
        };
        Request::new(raw)
    }

    #[test]
    fn headers_are_lazily_materialized() {
        let req = sample_request("/", "", vec![("X-Test", "1")]);
        assert_eq!(req.headers().get("x-test"), Some("1"));
    }

    #[test]
    fn cookies_are_parsed_from_cookie_header() {
        let req = sample_request("/", "", vec![("Cookie", "a=1; b=2")]);
        assert_eq!(req.cookies().get("a"), Some("1"));
        assert_eq!(req.cookies().get("b"), Some("2"));
    }

    #[test]
    fn params_are_parsed_from_query_string() {
        let req = sample_request("/", "a=1&b=two", vec![]);
        assert_eq!(req.params().get("a"), Some("1"));
        assert_eq!(req.params().get("b"), Some("two"));
    }

    #[test]
    fn ip_formats_peer_address() {
        let req = sample_request("/", "", vec![]);
        assert_eq!(req.ip(), "127.0.0.1");
    }

    #[test]
    fn tls_session_is_absent_over_plain_http() {
        let req = sample_request("/", "", vec![]);
        assert!(!req.is_tls());
        assert!(req.tls_session().is_none());
    }

    #[test]
    fn authorization_header_populates_auth_gate() {
        let encoded = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode("alice:secret")
        };
        let req = sample_request("/", "", vec![("Authorization", &format!("Basic {encoded}"))]);
        assert_eq!(req.auth().username(), Some("alice"));
    }

    #[test]
    fn user_data_roundtrips_typed_value() {
        let mut req = sample_request("/", "", vec![]);
        req.set_user_data(42u32);
        assert_eq!(req.user_data::<u32>(), Some(&42));
        assert_eq!(req.user_data::<String>(), None);
    }

    #[tokio::test]
    async fn isolate_may_only_be_called_once() {
        let mut req = sample_request("/", "", vec![]);
        assert!(!req.is_isolated());
        req.isolate(|| 1).await.unwrap();
        assert!(req.is_isolated());
        let second = req.isolate(|| 2).await;
        assert!(matches!(second, Err(crate::error::Error::Already)));
    }
}
