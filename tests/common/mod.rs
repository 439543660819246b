//! Shared utilities for integration tests.
//!
//! Every helper binds `127.0.0.1:0` so tests can run in parallel.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use forward_proxy::config::ProxyConfig;
use forward_proxy::lifecycle::Shutdown;
use forward_proxy::net::Listener;
use forward_proxy::security::BruteForceLedger;
use forward_proxy::ProxyServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";

/// A proxy running on a loopback port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub ledger: Arc<BruteForceLedger>,
    pub handle: JoinHandle<()>,
}

impl TestProxy {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Defaults with a short request timeout.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.timeouts.request_secs = 2;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

/// `test_config` with `admin`/`secret` required.
pub fn auth_config() -> ProxyConfig {
    let mut config = test_config();
    config.auth.username = Some(USERNAME.into());
    config.auth.password = Some(PASSWORD.into());
    config
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let listener = Listener::from_tcp(TcpListener::bind("127.0.0.1:0").await.unwrap()).unwrap();
    let addr = listener.local_addr();
    let server = ProxyServer::new(config);
    let ledger = Arc::clone(server.ledger());
    let shutdown = Shutdown::new();

    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    TestProxy {
        addr,
        shutdown,
        ledger,
        handle,
    }
}

/// A port with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Raw TCP echo server, standing in for a TLS origin behind a tunnel.
pub async fn start_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = socket.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });

    addr
}

/// Accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    addr
}

/// What a [`start_observed_backend`] saw on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    /// A full request head arrived.
    Request,
    /// The proxy closed the connection.
    Closed,
}

/// Like [`start_silent_backend`], but reports when a request arrives and
/// when the proxy hangs up.
pub async fn start_observed_backend() -> (SocketAddr, mpsc::UnboundedReceiver<BackendEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                if read_http_request(&mut socket).await.is_some() {
                    let _ = tx.send(BackendEvent::Request);
                }
                let mut rest = Vec::new();
                let _ = socket.read_to_end(&mut rest).await;
                let _ = tx.send(BackendEvent::Closed);
            });
        }
    });

    (addr, rx)
}

/// A listening socket that never accepts and whose backlog is already full,
/// so new connection attempts hang instead of being refused.
pub struct Unreachable {
    pub addr: SocketAddr,
    _listener: TcpListener,
    _queued: Vec<TcpStream>,
}

pub async fn start_unreachable() -> Unreachable {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(0).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut queued = Vec::new();
    for _ in 0..4 {
        if let Ok(Ok(stream)) = tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
            queued.push(stream);
        }
    }

    Unreachable {
        addr,
        _listener: listener,
        _queued: queued,
    }
}

/// HTTP backend answering every request with a fixed status and body.
pub async fn start_mock_backend(status_line: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_http_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nX-Backend: mock\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// HTTP backend whose response body is the request it received: the head
/// exactly as sent, then the decoded body.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Some((head, body)) = read_http_request(&mut socket).await else {
                    return;
                };
                let mut payload = head.into_bytes();
                payload.extend_from_slice(&body);

                let mut response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    payload.len()
                )
                .into_bytes();
                response.extend_from_slice(&payload);
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Read one HTTP/1.1 request: the head (including the blank line) and the
/// body, de-chunked if needed.
async fn read_http_request(socket: &mut TcpStream) -> Option<(String, Vec<u8>)> {
    let head = read_head(socket).await?;
    let lower = head.to_ascii_lowercase();

    let mut body = Vec::new();
    if let Some(len) = header_value(&lower, "content-length").and_then(|v| v.parse::<usize>().ok()) {
        body.resize(len, 0);
        socket.read_exact(&mut body).await.ok()?;
    } else if header_value(&lower, "transfer-encoding").is_some_and(|v| v.contains("chunked")) {
        loop {
            let size_line = read_line(socket).await?;
            let size = usize::from_str_radix(size_line.trim(), 16).ok()?;
            let mut chunk = vec![0u8; size + 2];
            socket.read_exact(&mut chunk).await.ok()?;
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    }

    Some((head, body))
}

fn header_value<'a>(lower_head: &'a str, name: &str) -> Option<&'a str> {
    lower_head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == name).then(|| value.trim())
    })
}

async fn read_line(socket: &mut TcpStream) -> Option<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while !line.ends_with(b"\r\n") {
        if socket.read(&mut byte).await.ok()? == 0 {
            return None;
        }
        line.push(byte[0]);
    }
    String::from_utf8(line).ok()
}

/// Read up to and including the blank line ending a message head, one byte
/// at a time so nothing after it is consumed.
pub async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if socket.read(&mut byte).await.ok()? == 0 {
            return None;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).ok()
}

/// Send a raw request head over a fresh connection and return the socket
/// with the proxy's response head.
pub async fn send_raw(proxy: SocketAddr, request: &str) -> (TcpStream, String) {
    let mut socket = TcpStream::connect(proxy).await.unwrap();
    socket.write_all(request.as_bytes()).await.unwrap();
    let head = tokio::time::timeout(Duration::from_secs(10), read_head(&mut socket))
        .await
        .expect("proxy did not answer in time")
        .expect("proxy closed the connection without answering");
    (socket, head)
}

/// `CONNECT target` with optional `Proxy-Authorization`.
pub fn connect_request(target: &str, authorization: Option<&str>) -> String {
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(value) = authorization {
        request.push_str(&format!("Proxy-Authorization: {value}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// reqwest client that sends everything through `proxy`.
pub fn proxied_client(proxy: &TestProxy, credentials: Option<(&str, &str)>) -> reqwest::Client {
    let mut upstream_proxy = reqwest::Proxy::http(proxy.url()).unwrap();
    if let Some((user, pass)) = credentials {
        upstream_proxy = upstream_proxy.basic_auth(user, pass);
    }
    reqwest::Client::builder()
        .proxy(upstream_proxy)
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// reqwest client that talks to the proxy directly (health endpoint).
pub fn direct_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Fetch and parse `GET /health`.
pub async fn health(proxy: &TestProxy) -> serde_json::Value {
    let response = direct_client()
        .get(format!("{}/health", proxy.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    serde_json::from_str(&response.text().await.unwrap()).unwrap()
}

/// Poll `/health` until `active_tunnels` reaches `expected`.
pub async fn wait_for_tunnels(proxy: &TestProxy, expected: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let body = health(proxy).await;
        if body["active_tunnels"].as_u64() == Some(expected) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "active_tunnels stuck at {}",
            body["active_tunnels"]
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
