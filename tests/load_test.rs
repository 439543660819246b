//! Concurrency smoke test: many clients relaying and tunneling at once.

use std::time::{Duration, Instant};

use forward_proxy::security::credentials::basic_header;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod common;

use common::{PASSWORD, USERNAME};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_relays_and_tunnels() {
    let backend = common::start_mock_backend("200 OK", "Hello from backend").await;
    let origin = common::start_tcp_echo().await;
    let proxy = common::start_proxy(common::auth_config()).await;

    let concurrency = 20;
    let requests_per_task = 10;
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = common::proxied_client(&proxy, Some((USERNAME, PASSWORD)));
        let url = format!("http://{backend}/");
        tasks.push(tokio::spawn(async move {
            for _ in 0..requests_per_task {
                let response = client.get(&url).send().await.unwrap();
                assert_eq!(response.status(), 200);
                assert_eq!(response.text().await.unwrap(), "Hello from backend");
            }
        }));
    }

    for i in 0..concurrency {
        let proxy_addr = proxy.addr;
        let request = common::connect_request(&origin.to_string(), Some(&basic_header(USERNAME, PASSWORD)));
        tasks.push(tokio::spawn(async move {
            let (mut socket, head) = common::send_raw(proxy_addr, &request).await;
            assert!(head.starts_with("HTTP/1.1 200"), "{head}");

            let message = format!("tunnel-{i}");
            socket.write_all(message.as_bytes()).await.unwrap();
            let mut echoed = vec![0u8; message.len()];
            socket.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, message.as_bytes());
        }));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(30), task)
            .await
            .expect("task hung")
            .unwrap();
    }

    println!(
        "{} relayed requests and {} tunnels in {:?}",
        concurrency * requests_per_task,
        concurrency,
        start.elapsed()
    );
    assert_eq!(proxy.ledger.failures("127.0.0.1".parse().unwrap()), 0);
}
