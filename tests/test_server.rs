//! Tests for the listener lifecycle: serving requests and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use rotor::config::{BackendConfig, Config};
use rotor::proxy::balancer::Balancer;
use rotor::server::listener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

/// Spawns a minimal HTTP server answering every connection with 200 and the
/// given body.
async fn spawn_backend(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };

            tokio::spawn(async move {
                let mut data = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            data.extend_from_slice(&chunk[..n]);
                            if data.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

async fn start_proxy(
    backend_url: String,
    grace: Duration,
) -> (
    std::net::SocketAddr,
    oneshot::Sender<()>,
    tokio::task::JoinHandle<anyhow::Result<()>>,
) {
    let cfg = Config {
        backends: vec![BackendConfig {
            url: backend_url,
            name: None,
        }],
        ..Config::default()
    };
    let balancer = Arc::new(Balancer::new(&cfg).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(listener::serve(
        listener,
        balancer,
        async {
            let _ = shutdown_rx.await;
        },
        grace,
    ));

    (addr, shutdown_tx, server)
}

#[tokio::test]
async fn test_serve_proxies_request_to_backend() {
    let backend_url = spawn_backend("hello via proxy").await;
    let (addr, shutdown_tx, server) = start_proxy(backend_url, Duration::from_secs(2)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: lb\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("hello via proxy"));

    shutdown_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_request_finish() {
    let backend_url = spawn_backend("drained response").await;
    let (addr, shutdown_tx, server) = start_proxy(backend_url, Duration::from_secs(2)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: lb\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    // Let the request get accepted, then signal shutdown while it is in flight
    sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(()).unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("drained response"));

    timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_abandons_hung_connection_after_grace() {
    let backend_url = spawn_backend("unused").await;
    let (addr, shutdown_tx, server) = start_proxy(backend_url, Duration::from_millis(500)).await;

    // Open a connection and send nothing; it will never finish on its own
    let hung_client = TcpStream::connect(addr).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    shutdown_tx.send(()).unwrap();

    // serve must give up after the grace period rather than wait forever
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop within the grace period")
        .unwrap()
        .unwrap();

    drop(hung_client);
}
