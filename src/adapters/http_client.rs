use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use hyper::{Request, Response, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;

use crate::{
    config::models::ProxyConfig,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

/// Upstream HTTP client adapter using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Responsibilities:
/// * Per-host connection pooling with idle eviction
/// * Connect timeout at the connector level
/// * Host header derivation from the outgoing URI
/// * Mapping hyper failures onto the transport error taxonomy
///
/// Retry and circuit breaking are layered above this adapter in the
/// filter chain; the client itself performs exactly one attempt.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HttpClientAdapter {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs
        http_connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .build::<_, Body>(https_connector);

        tracing::info!(
            connect_timeout_secs = config.connect_timeout_secs,
            max_idle_per_host = config.max_idle_per_host,
            "upstream HTTP client created"
        );
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, mut req: Request<Body>) -> HttpClientResult<Response<Body>> {
        // Derive the Host header from the outgoing URI.
        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(format!(
                "outgoing URI has no host: {}",
                req.uri()
            )));
        };
        let host_value = match req.uri().port() {
            Some(port) => HeaderValue::from_str(&format!("{host}:{}", port.as_u16())),
            None => HeaderValue::from_str(host),
        }
        .map_err(|e| HttpClientError::InvalidRequest(format!("invalid host header: {e}")))?;
        req.headers_mut().insert(header::HOST, host_value);

        let method = req.method().clone();
        let uri = req.uri().clone();

        match self.client.request(req).await {
            Ok(response) => {
                tracing::debug!(
                    status = response.status().as_u16(),
                    %method,
                    %uri,
                    "upstream response"
                );
                let (parts, body) = response.into_parts();
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(e) => {
                tracing::debug!(error = %e, %method, %uri, "upstream request failed");
                Err(HttpClientError::ConnectionError(format!(
                    "request to {method} {uri} failed: {e}"
                )))
            }
        }
    }
}
