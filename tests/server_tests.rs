use kiss::{Response, Server};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

/// Reads until the peer closes the connection. Every request in this file
/// sends `Connection: close`, so the server closing its write side after
/// the response is what ends the loop.
fn read_response(stream: &mut TcpStream) -> String {
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).ok();
    String::from_utf8_lossy(&buf).into_owned()
}

async fn start_echo_server() -> kiss::ServerHandle {
    let server = Arc::new(Server::new(|req, res| {
        let body = format!("{} {}", req.method(), req.path());
        res.send_binary(body.into_bytes(), Some("text/plain"), 200).unwrap();
    }));
    server.listen(0, false).await.expect("bind port 0")
}

#[tokio::test]
async fn serves_a_plain_get_request() {
    let mut handle = start_echo_server().await;
    let port = handle.port();

    let response = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        read_response(&mut stream)
    })
    .await
    .unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("Date: "));
    assert!(response.ends_with("GET /hello"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn head_request_suppresses_body() {
    let mut handle = start_echo_server().await;
    let port = handle.port();

    let response = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .write_all(b"HEAD /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        read_response(&mut stream)
    })
    .await
    .unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(!response.contains("GET /hello"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn connection_limit_drops_excess_connections() {
    let server = Arc::new({
        let mut server = Server::new(|_req, res| {
            res.send_binary(b"ok".to_vec(), Some("text/plain"), 200).unwrap();
        });
        server.set_connection_limit(1);
        server
    });
    let mut handle = server.listen(0, false).await.expect("bind port 0");
    let port = handle.port();

    // Hold the first connection open without sending a terminating blank
    // line, so it keeps the single permit checked out.
    let _holder = TcpStream::connect(("127.0.0.1", port)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut buf = [0u8; 16];
        stream.read(&mut buf)
    })
    .await
    .unwrap();

    // The server accepted the TCP connection (it's the application-level
    // semaphore that drops it) so the read either times out or observes a
    // clean close with no bytes — either way, no response is served.
    match second {
        Ok(n) => assert_eq!(n, 0, "second connection should not get a response"),
        Err(_) => {}
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn response_reset_allows_changing_status_after_handler_commits() {
    let mut res = Response::new();
    res.set_cookie("session_id", "abc123").unwrap();
    res.send_binary(b"first".to_vec(), Some("text/plain"), 200).unwrap();
    res.reset();
    res.send_binary(b"second".to_vec(), Some("text/plain"), 201).unwrap();
    assert_eq!(res.status(), 201);
    assert_eq!(res.headers().get("set-cookie"), Some("session_id=abc123"));
}
