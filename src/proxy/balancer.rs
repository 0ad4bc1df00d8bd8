//! The request-handling entry point.
//!
//! The balancer owns the selector and exposes a single `handle` operation
//! used by the HTTP layer: pick the next live backend, forward the request,
//! and turn a forwarding failure into a gateway-style error response.

use crate::config::Config;
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::proxy::backend::{Backend, HttpBackend};
use crate::proxy::selector::Selector;
use anyhow::Result;

pub struct Balancer<B: Backend> {
    listen_addr: String,
    selector: Selector<B>,
}

impl Balancer<HttpBackend> {
    /// Builds the balancer from configuration.
    ///
    /// An empty backend list or a malformed backend URL is a fatal startup
    /// error; nothing is started partially.
    pub fn new(cfg: &Config) -> Result<Self> {
        anyhow::ensure!(
            !cfg.backends.is_empty(),
            "at least one backend must be configured"
        );

        let backends = cfg
            .backends
            .iter()
            .map(|b| HttpBackend::new(b, cfg))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            listen_addr: cfg.listen_addr.clone(),
            selector: Selector::new(backends),
        })
    }
}

impl<B: Backend> Balancer<B> {
    /// The address the lifecycle component should bind; the balancer does
    /// not own the listening socket itself.
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Handles one inbound request: select a live backend, forward, relay.
    ///
    /// A backend can die between its probe and the forward; that failure is
    /// not retried and comes back as a 502/504 response.
    pub async fn handle(&self, request: &Request) -> Response {
        let backend = self.selector.next().await;

        tracing::debug!(
            backend = %backend.address(),
            method = request.method.as_str(),
            path = %request.path,
            "Forwarding request to backend"
        );

        match backend.forward(request).await {
            Ok(response) => {
                tracing::info!(
                    backend = %backend.address(),
                    status = response.status.as_u16(),
                    method = request.method.as_str(),
                    path = %request.path,
                    "Request forwarded"
                );
                response
            }
            Err(e) => {
                tracing::warn!(
                    backend = %backend.address(),
                    error = %e,
                    method = request.method.as_str(),
                    path = %request.path,
                    "Failed to forward request to selected backend"
                );
                error_response(&e)
            }
        }
    }
}

/// Maps a forwarding error to the response the client sees.
fn error_response(error: &anyhow::Error) -> Response {
    let (status, body) = if error.to_string().contains("timeout") {
        (
            StatusCode::GATEWAY_TIMEOUT,
            b"504 Gateway Timeout\r\n\r\nThe backend server did not respond in time.".to_vec(),
        )
    } else {
        (
            StatusCode::BAD_GATEWAY,
            b"502 Bad Gateway\r\n\r\nFailed to reach the backend server.".to_vec(),
        )
    };

    ResponseBuilder::new(status)
        .header("Content-Type", "text/plain")
        .header("Connection", "close")
        .body(body)
        .build()
}
