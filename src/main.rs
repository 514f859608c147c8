//! Example binary wiring the library together: a router dispatching a
//! static file route and a multipart upload route into a [`kiss::Server`].
//! Demonstrates the public API; applications embedding this crate would
//! write their own equivalent of this file rather than use it directly.

use kiss::router::Router;
use kiss::util::sanitize_path;
use kiss::{Request, Response, Server};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

const PORT: u16 = 8080;
const STATIC_DIR: &str = "./content";

fn build_router() -> Router {
    let mut router = Router::default();
    router
        .add(r"^/hello$", |_m| {})
        .expect("static route patterns are valid");
    router
}

fn handle_request(router: &Router, req: &mut Request, res: &mut Response) {
    if req.method() == "POST" && req.path() == "/uploads" {
        let saved: Vec<String> = req
            .uploads_mut()
            .uploads_mut()
            .iter_mut()
            .filter_map(|upload| {
                let name = upload.name().to_owned();
                upload.save(false).ok().map(|_| name)
            })
            .collect();
        let body = format!("saved {} file(s): {}\n", saved.len(), saved.join(", "));
        let _ = res.send_binary(body.into_bytes(), Some("text/plain"), 200);
        return;
    }

    if router.dispatch(req.path()).is_ok() {
        let _ = res.send_binary(b"ok\n".to_vec(), Some("text/plain"), 200);
        return;
    }

    let sanitized = sanitize_path(req.path());
    let relative = sanitized.trim_start_matches('/');
    let path = if relative.is_empty() {
        PathBuf::from(STATIC_DIR).join("index.html")
    } else {
        PathBuf::from(STATIC_DIR).join(relative)
    };

    let mime = kiss::get_mime_type(path.to_str().unwrap_or(""));
    match res.send_file(&path, 0, 0, 0, None, 200) {
        Ok(()) => {
            res.headers_mut().set("Content-Type", mime);
        }
        Err(_) => {
            let _ = res.send_binary(b"not found\n".to_vec(), Some("text/plain"), 404);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let router = Arc::new(build_router());
    let server = Arc::new(Server::new(move |req, res| {
        handle_request(&router, req, res);
    }));

    let mut handle = server
        .listen(PORT, false)
        .await
        .expect("failed to bind listener");
    info!(port = handle.port(), "listening");

    signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    info!("shutting down");
    handle.shutdown().await.expect("shutdown failed");
}
