//! End-to-end tests for the balancer: selection plus forwarding.

use rotor::config::{BackendConfig, Config};
use rotor::http::request::{Method, Request, RequestBuilder};
use rotor::http::response::StatusCode;
use rotor::proxy::balancer::Balancer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn backend_config(url: impl Into<String>) -> BackendConfig {
    BackendConfig {
        url: url.into(),
        name: None,
    }
}

fn config_with_backends(urls: Vec<String>) -> Config {
    Config {
        backends: urls.into_iter().map(backend_config).collect(),
        ..Config::default()
    }
}

fn get_request() -> Request {
    RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .header("Host", "lb.local")
        .build()
        .unwrap()
}

/// Spawns a minimal HTTP server answering every connection with the given
/// status and body.
async fn spawn_backend(status: u16, body: &'static str) -> String {
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
                    "HTTP/1.1 {} Test\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
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

/// Spawns a server that answers the first connection (the liveness probe)
/// with 200, then closes every later connection without responding. Simulates
/// a backend dying between its probe and the forward.
async fn spawn_backend_that_dies_after_probe() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
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
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
            let _ = socket.shutdown().await;
        }

        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            drop(socket);
        }
    });

    format!("http://{}", addr)
}

fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[test]
fn test_balancer_rejects_empty_backend_list() {
    let cfg = config_with_backends(vec![]);
    assert!(Balancer::new(&cfg).is_err());
}

#[test]
fn test_balancer_rejects_malformed_backend_url() {
    let cfg = config_with_backends(vec!["not a url".to_string()]);
    assert!(Balancer::new(&cfg).is_err());
}

#[test]
fn test_balancer_exposes_listen_addr() {
    let cfg = Config {
        listen_addr: "127.0.0.1:8123".to_string(),
        ..Config::default()
    };
    let balancer = Balancer::new(&cfg).unwrap();

    assert_eq!(balancer.listen_addr(), "127.0.0.1:8123");
}

#[tokio::test]
async fn test_handle_returns_backend_response() {
    let url = spawn_backend(200, "hello from backend").await;
    let balancer = Balancer::new(&config_with_backends(vec![url])).unwrap();

    let response = balancer.handle(&get_request()).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"hello from backend".to_vec());
}

#[tokio::test]
async fn test_handle_skips_dead_backend() {
    let dead = unreachable_url();
    let alive = spawn_backend(200, "from the live one").await;
    let balancer = Balancer::new(&config_with_backends(vec![dead, alive])).unwrap();

    let response = balancer.handle(&get_request()).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"from the live one".to_vec());
}

#[tokio::test]
async fn test_handle_relays_backend_error_status() {
    // 201 passes the liveness probe (< 400) and must reach the client as-is
    let url = spawn_backend(201, "created").await;
    let balancer = Balancer::new(&config_with_backends(vec![url])).unwrap();

    let response = balancer.handle(&get_request()).await;

    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(response.body, b"created".to_vec());
}

#[tokio::test]
async fn test_forward_failure_after_selection_returns_bad_gateway() {
    let url = spawn_backend_that_dies_after_probe().await;
    let balancer = Balancer::new(&config_with_backends(vec![url])).unwrap();

    let response = balancer.handle(&get_request()).await;

    // Not retried; the failure surfaces to the client as a gateway error
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
}
