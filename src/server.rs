//! Server lifecycle and connection dispatch.
//!
//! The accept loop and per-connection handling run on a `tokio::select!`-
//! based shutdown and a `timeout`-wrapped keep-alive loop, driving the
//! full request/response/auth/upload pipeline for every accepted
//! connection. Two concurrency models are supported: an event-loop mode
//! where connections are tasks on the shared runtime, and a
//! thread-per-connection mode where each connection gets its own OS
//! thread running a dedicated single-threaded runtime.

use crate::auth::AuthOutcome;
use crate::connection::{self, MAX_REQUEST_LINE_SIZE};
use crate::error::{Error, Result};
use crate::multipart;
use crate::request::Request;
use crate::response::Response;
use rustls::pki_types::CertificateDer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 15;

/// Server-wide tunables: upload buffer and directory, payload/upload size
/// caps, thread pool size, and connection timeout/limit.
///
/// `small_memory` picks between "tiny embedded defaults" and "desktop
/// defaults" as an explicit runtime flag rather than a compile-time
/// target check, since an embedding application should choose this at
/// startup rather than per build target — see DESIGN.md.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub uploads_dir: PathBuf,
    pub post_buf_size: usize,
    pub payload_limit: u64,
    pub uploads_limit: u64,
    /// Advisory only: this crate is embedded into a caller-owned Tokio
    /// runtime rather than building its own, so event-loop mode's "worker
    /// pool" is whatever `worker_threads` the caller's own
    /// `tokio::runtime::Builder` was given. Recorded here so a caller
    /// porting server configuration over from elsewhere has somewhere to
    /// put the number; `Server` itself never reads this field.
    pub thread_pool_size: usize,
    pub connection_timeout: u64,
    pub connection_limit: usize,
}

impl ServerConfig {
    pub fn new(small_memory: bool) -> Self {
        let (post_buf_size, payload_limit, uploads_limit) = if small_memory {
            (1024, 1_048_576, 16_777_216)
        } else {
            (4096, 4_194_304, 67_108_864)
        };
        Self {
            uploads_dir: std::env::temp_dir(),
            post_buf_size,
            payload_limit,
            uploads_limit,
            thread_pool_size: 0,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECS,
            connection_limit: 0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(false)
    }
}

pub type ReqHook = dyn Fn(&mut Request, &mut Response) + Send + Sync;
/// Runs before the request handler; inspects `request.auth()` and calls
/// `request.auth_mut().deny(...)`/`.cancel()` to challenge or reject.
pub type AuthHook = dyn Fn(&mut Request, &mut Response) + Send + Sync;
pub type ErrHook = dyn Fn(&str) + Send + Sync;
pub type ClientEventHook = dyn Fn(SocketAddr, bool) + Send + Sync;

/// Embeddable HTTP/1.1 server.
pub struct Server {
    config: ServerConfig,
    req_cb: Arc<ReqHook>,
    auth_cb: Option<Arc<AuthHook>>,
    err_cb: Arc<ErrHook>,
    client_event_cb: Option<Arc<ClientEventHook>>,
}

impl Server {
    /// Builds a server from a request handler and the default
    /// `tracing`-backed error logger.
    pub fn new<F>(req_cb: F) -> Self
    where
        F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
    {
        Self::with_auth(None, req_cb, default_err_cb())
    }

    /// Builds a server with an optional auth hook, a request handler, and
    /// a caller-supplied error logger.
    pub fn with_auth<F, E>(
        auth_cb: Option<Arc<AuthHook>>,
        req_cb: F,
        err_cb: E,
    ) -> Self
    where
        F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
        E: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            config: ServerConfig::default(),
            req_cb: Arc::new(req_cb),
            auth_cb,
            err_cb: Arc::new(err_cb),
            client_event_cb: None,
        }
    }

    pub fn set_client_event_cb<F>(&mut self, cb: F)
    where
        F: Fn(SocketAddr, bool) + Send + Sync + 'static,
    {
        self.client_event_cb = Some(Arc::new(cb));
    }

    pub fn set_uploads_dir(&mut self, dir: PathBuf) {
        self.config.uploads_dir = dir;
    }

    pub fn uploads_dir(&self) -> &std::path::Path {
        &self.config.uploads_dir
    }

    /// Rejects sizes below 256 bytes.
    pub fn set_post_buf_size(&mut self, size: usize) -> Result<()> {
        if size < 256 {
            return Err(Error::InvalidArgument);
        }
        self.config.post_buf_size = size;
        Ok(())
    }

    pub fn set_payload_limit(&mut self, limit: u64) {
        self.config.payload_limit = limit;
    }

    pub fn set_uploads_limit(&mut self, limit: u64) {
        self.config.uploads_limit = limit;
    }

    /// See [`ServerConfig::thread_pool_size`] — stored for parity with the
    /// original configuration surface, but event-loop concurrency actually
    /// comes from the caller's own Tokio runtime.
    pub fn set_thread_pool_size(&mut self, size: usize) {
        self.config.thread_pool_size = size;
    }

    pub fn set_connection_timeout(&mut self, timeout: u64) {
        self.config.connection_timeout = timeout;
    }

    pub fn set_connection_limit(&mut self, limit: usize) {
        self.config.connection_limit = limit;
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds and serves plain HTTP.
    /// `threaded` selects thread-per-connection (a dedicated OS thread
    /// running its own single-threaded runtime per connection) over the
    /// default event-loop model (connections spawned as tasks on the
    /// caller's runtime).
    pub async fn listen(self: Arc<Self>, port: u16, threaded: bool) -> Result<ServerHandle> {
        let listener = bind_dual_stack(port)?;
        let bound_port = listener.local_addr().map_err(Error::Io)?.port();
        Ok(self.spawn_accept_loop(listener, None, bound_port, threaded))
    }

    /// Binds and serves HTTPS. `key_pem` and `cert_pem` are PEM-encoded
    /// bytes, parsed with `rustls-pemfile`; `trust_pem`, if given, enables
    /// client certificate verification against that PEM bundle. `password`,
    /// `priorities` (a GnuTLS cipher priority string), and `dhparams` have
    /// no `rustls` equivalent and are accepted only for call-site
    /// compatibility — they're logged and otherwise ignored; an encrypted
    /// private key must be decrypted by the caller before calling this.
    #[allow(clippy::too_many_arguments)]
    pub async fn tls_listen(
        self: Arc<Self>,
        key_pem: &[u8],
        password: Option<&str>,
        cert_pem: &[u8],
        trust_pem: Option<&[u8]>,
        priorities: Option<&str>,
        dhparams: Option<&[u8]>,
        port: u16,
        threaded: bool,
    ) -> Result<ServerHandle> {
        if password.is_some() {
            warn!("encrypted private keys are not supported; pass an unencrypted key PEM instead");
        }
        if let Some(priorities) = priorities {
            if priorities != "NORMAL" {
                warn!(%priorities, "TLS cipher priority strings are not configurable on rustls; ignoring");
            }
        }
        if dhparams.is_some() {
            warn!("explicit DH parameters are not used by TLS 1.3/rustls; ignoring");
        }
        let acceptor = crate::tls::build_acceptor(key_pem, cert_pem, trust_pem)?;
        let listener = bind_dual_stack(port)?;
        let bound_port = listener.local_addr().map_err(Error::Io)?.port();
        Ok(self.spawn_accept_loop(listener, Some(acceptor), bound_port, threaded))
    }

    fn spawn_accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
        port: u16,
        threaded: bool,
    ) -> ServerHandle {
        let shutdown = Arc::new(tokio::sync::Notify::new());
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let accept_shutdown = shutdown.clone();
        let accept_flag = shutdown_flag.clone();
        let server = self.clone();
        // `connection_limit == 0` means unbounded; represented as no
        // semaphore rather than one with `usize::MAX` permits so acquiring
        // never has to special-case saturating arithmetic.
        let limiter = (server.config.connection_limit > 0)
            .then(|| Arc::new(tokio::sync::Semaphore::new(server.config.connection_limit)));

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let _ = stream.set_nodelay(true);
                                let server = server.clone();
                                let tls_acceptor = tls_acceptor.clone();
                                let permit = match &limiter {
                                    Some(sem) => match sem.clone().try_acquire_owned() {
                                        Ok(permit) => Some(permit),
                                        Err(_) => {
                                            debug!("connection limit reached, dropping connection");
                                            continue;
                                        }
                                    },
                                    None => None,
                                };
                                if threaded {
                                    spawn_dedicated_thread(server, stream, peer_addr, tls_acceptor, permit);
                                } else {
                                    tokio::spawn(async move {
                                        serve_accepted(server, stream, peer_addr, tls_acceptor).await;
                                        drop(permit);
                                    });
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "accept failed");
                            }
                        }
                    }
                    _ = accept_shutdown.notified() => {
                        accept_flag.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        ServerHandle {
            shutdown,
            shutdown_flag,
            join: Some(join),
            port,
        }
    }
}

/// Binds `[::]:port` with `IPV6_V6ONLY` cleared, so a single listener
/// accepts both IPv4 and IPv6 peers — matching the original's
/// `MHD_USE_DUAL_STACK` (spec.md §4.9: "Dual-stack … always enabled").
/// Built via `socket2` since neither `std` nor `tokio` expose the
/// dual-stack socket option directly.
fn bind_dual_stack(port: u16) -> Result<TcpListener> {
    let addr: SocketAddr = (std::net::Ipv6Addr::UNSPECIFIED, port).into();
    let socket = socket2::Socket::new(socket2::Domain::IPV6, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
        .map_err(Error::Io)?;
    socket.set_only_v6(false).map_err(Error::Io)?;
    socket.set_reuse_address(true).map_err(Error::Io)?;
    socket.set_nonblocking(true).map_err(Error::Io)?;
    socket.bind(&addr.into()).map_err(Error::Io)?;
    socket.listen(1024).map_err(Error::Io)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(Error::Io)
}

fn default_err_cb() -> impl Fn(&str) + Send + Sync + 'static {
    |message: &str| {
        if message != crate::error::IGNORED_ERROR_MESSAGE {
            warn!(%message, "request handler reported an error");
        }
    }
}

fn spawn_dedicated_thread(
    server: Arc<Server>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "failed to build per-connection runtime");
                return;
            }
        };
        runtime.block_on(serve_accepted(server, stream, peer_addr, tls_acceptor));
        drop(permit);
    });
}

async fn serve_accepted(
    server: Arc<Server>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
) {
    if let Some(cb) = &server.client_event_cb {
        cb(peer_addr, false);
    }
    match tls_acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                let peer_certs = tls_stream
                    .get_ref()
                    .1
                    .peer_certificates()
                    .map(<[CertificateDer<'static>]>::to_vec)
                    .unwrap_or_default();
                serve_connection(server.clone(), tls_stream, peer_addr, true, Some(Arc::new(peer_certs))).await
            }
            Err(e) => debug!(error = %e, "tls handshake failed"),
        },
        None => serve_connection(server.clone(), stream, peer_addr, false, None).await,
    }
    if let Some(cb) = &server.client_event_cb {
        cb(peer_addr, true);
    }
}

/// `connection_timeout_secs` bounds client *idleness*, not total connection
/// duration: it's applied only around the wait for the next request's
/// bytes, so a connection serving many keep-alive requests back to back (or
/// running a long [`crate::request::Request::isolate`]d handler) is never
/// killed mid-flight. `0` disables the idle timeout outright.
async fn serve_connection<S>(
    server: Arc<Server>,
    mut stream: S,
    peer_addr: SocketAddr,
    tls: bool,
    tls_session: Option<Arc<Vec<CertificateDer<'static>>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    serve_connection_inner(server, &mut stream, peer_addr, tls, tls_session).await;
}

async fn serve_connection_inner<S>(
    server: Arc<Server>,
    stream: &mut S,
    peer_addr: SocketAddr,
    tls: bool,
    tls_session: Option<Arc<Vec<CertificateDer<'static>>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let idle_timeout = (server.config.connection_timeout > 0)
        .then(|| Duration::from_secs(server.config.connection_timeout));
    let mut reader = BufReader::with_capacity(MAX_REQUEST_LINE_SIZE, &mut *stream);
    loop {
        let head_result = match idle_timeout {
            Some(d) => match tokio::time::timeout(d, connection::read_head(&mut reader)).await {
                Ok(r) => r,
                Err(_) => {
                    debug!("connection idle timeout");
                    break;
                }
            },
            None => connection::read_head(&mut reader).await,
        };
        let head = match head_result {
            Ok(Some(head)) => head,
            Ok(None) | Err(_) => break,
        };

        let content_type = connection::header_value(&head.headers, "Content-Type").map(str::to_owned);
        let keep_alive = connection::keep_alive_from_headers(&head.version, &head.headers);
        let method = head.method.clone();

        // Multipart bodies mix field bytes (bounded by `payload_limit`) and
        // file bytes (bounded by `uploads_limit`); since the body is
        // buffered whole before it's split into parts, the raw read is
        // capped by their sum so a legitimate upload isn't rejected by the
        // field-only limit before parsing gets a chance to apply the right
        // one to each part.
        let is_multipart = content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));
        let raw_limit = if is_multipart {
            if server.config.payload_limit == 0 || server.config.uploads_limit == 0 {
                0
            } else {
                server.config.payload_limit + server.config.uploads_limit
            }
        } else {
            server.config.payload_limit
        };

        let body = match connection::read_body(&mut reader, &head.headers, raw_limit).await {
            Ok(b) => b,
            Err(e) => {
                (server.err_cb)(&e.as_cb_message());
                break;
            }
        };

        let raw = connection::build_raw_request(head, peer_addr, tls, tls_session.clone());
        let mut request = Request::new(raw);

        // The auth hook runs on the raw request, before the body is ever
        // parsed — an unauthenticated client must not be able to force
        // multipart/upload spooling by sending a body at all. Only once the
        // gate yields `NoOp` does body processing (and the route handler)
        // run at all.
        let mut response = Response::new();
        if let Some(auth_cb) = server.auth_cb.as_ref() {
            auth_cb(&mut request, &mut response);
        }
        let outcome = request.auth().dispatch(response.already());
        let final_response = match outcome {
            AuthOutcome::Canceled => {
                break;
            }
            AuthOutcome::PassThrough => {
                if !response.already() {
                    (server.req_cb)(&mut request, &mut response);
                }
                response
            }
            AuthOutcome::NoOp => {
                if let Err(e) = dispatch_body(&server, &mut request, &content_type, body) {
                    (server.err_cb)(&e.as_cb_message());
                    break;
                }
                (server.req_cb)(&mut request, &mut response);
                response
            }
            AuthOutcome::Challenge { realm, body, content_type } => {
                let mut challenge = Response::new();
                challenge
                    .headers_mut()
                    .set("WWW-Authenticate", &format!("Basic realm=\"{realm}\""));
                let _ = challenge.send_binary(body, Some(&content_type), 401);
                challenge
            }
        };

        let is_head = method.eq_ignore_ascii_case("HEAD");
        let status = final_response.status();
        let headers = final_response.headers().clone();
        let body = final_response.into_body();
        if let Err(e) = connection::write_response(reader.get_mut(), status, &headers, body, is_head).await {
            (server.err_cb)(&e.as_cb_message());
            break;
        }

        if !keep_alive {
            break;
        }
    }
}

/// Routes the request body to the upload engine, the fields map, or the
/// raw payload buffer depending on `Content-Type`, enforcing
/// `uploads_limit`/`payload_limit` along the way. Returns `Err` if either
/// limit is exceeded, in which case the request is aborted without
/// reaching the handler.
fn dispatch_body(
    server: &Server,
    request: &mut Request,
    content_type: &Option<String>,
    body: Vec<u8>,
) -> Result<()> {
    match content_type {
        Some(ct) if ct.starts_with("multipart/form-data") => {
            request.set_uploading(true);
            let mut total_fields_size: u64 = 0;
            if let Some(boundary) = multipart::boundary_from_content_type(ct) {
                let parts = multipart::parse_multipart(&body, &boundary)?;
                for part in parts {
                    match part.filename {
                        Some(filename) => {
                            server.req_cb_begin_upload(request, &filename, &part)?;
                            request
                                .uploads_mut()
                                .write_chunk(part.data, server.config.uploads_limit)?;
                        }
                        None => {
                            total_fields_size += part.data.len() as u64;
                            multipart::enforce_payload_limit(
                                total_fields_size as usize,
                                server.config.payload_limit,
                            )?;
                            let value = String::from_utf8_lossy(part.data).into_owned();
                            request.fields_mut().add(&part.name, &value);
                        }
                    }
                }
            }
            Ok(())
        }
        Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
            multipart::enforce_payload_limit(body.len(), server.config.payload_limit)?;
            let text = String::from_utf8_lossy(&body).into_owned();
            for (key, value) in multipart::parse_urlencoded(&text) {
                request.fields_mut().add(&key, &value);
            }
            *request.payload_mut() = body;
            Ok(())
        }
        _ => {
            multipart::enforce_payload_limit(body.len(), server.config.payload_limit)?;
            *request.payload_mut() = body;
            Ok(())
        }
    }
}

impl Server {
    fn req_cb_begin_upload(&self, request: &mut Request, filename: &str, part: &multipart::Part<'_>) -> Result<()> {
        request.uploads_mut().begin_part(
            &self.config.uploads_dir,
            &part.name,
            filename,
            part.content_type.as_deref(),
            part.transfer_encoding.as_deref(),
        )
    }
}

/// Handle to a running server: reports the bound port and stops the
/// accept loop. Dropping it without calling [`Self::shutdown`] leaves the
/// accept loop running in the background.
pub struct ServerHandle {
    shutdown: Arc<tokio::sync::Notify>,
    shutdown_flag: Arc<AtomicBool>,
    join: Option<tokio::task::JoinHandle<()>>,
    port: u16,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    /// Stops accepting new connections and waits for the accept loop to
    /// exit. Idempotent.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.shutdown_flag.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
        self.shutdown_flag.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_memory_profile_uses_reduced_defaults() {
        let config = ServerConfig::new(true);
        assert_eq!(config.post_buf_size, 1024);
        assert_eq!(config.payload_limit, 1_048_576);
    }

    #[test]
    fn default_profile_uses_desktop_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.post_buf_size, 4096);
        assert_eq!(config.uploads_limit, 67_108_864);
    }

    #[test]
    fn set_post_buf_size_rejects_small_values() {
        let mut server = Server::new(|_, _| {});
        assert!(matches!(server.set_post_buf_size(100), Err(Error::InvalidArgument)));
        assert!(server.set_post_buf_size(512).is_ok());
    }

    #[tokio::test]
    async fn listen_binds_an_ephemeral_port_and_shuts_down() {
        let server = Arc::new(Server::new(|_req, res| {
            let _ = res.send_binary(b"ok".to_vec(), Some("text/plain"), 200);
        }));
        let mut handle = server.listen(0, false).await.unwrap();
        assert!(handle.port() > 0);
        handle.shutdown().await.unwrap();
        assert!(handle.is_shutdown());
        handle.shutdown().await.unwrap();
    }
}
