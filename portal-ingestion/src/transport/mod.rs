//! HTTP transport seam between the provider protocol and the network.
//!
//! A `Transport` owns whatever connection state a session needs (cookie jar
//! included) and returns raw responses; status interpretation happens in
//! [`crate::session::Session::request`].

pub mod http;
#[cfg(test)]
pub(crate) mod scripted;

use std::sync::Arc;

use serde::de::DeserializeOwned;

pub use http::ReqwestTransport;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Client(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::Decode {
            url: self.url.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Builds a fresh transport (and cookie jar) for each new session.
pub type TransportFactory =
    Arc<dyn Fn() -> Result<Box<dyn Transport>, TransportError> + Send + Sync>;
