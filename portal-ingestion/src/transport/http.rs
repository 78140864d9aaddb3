use std::{sync::Arc, time::Duration};

use reqwest::{header::CONTENT_TYPE, Client};

use super::{HttpRequest, HttpResponse, Method, Transport, TransportError, TransportFactory};

const USER_AGENT: &str = concat!("portal-ingestion/", env!("CARGO_PKG_VERSION"));

/// `reqwest` client with its own cookie store.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Factory producing an independent transport per session.
    pub fn factory(timeout: Duration) -> TransportFactory {
        Arc::new(move || {
            let transport = ReqwestTransport::new(timeout)?;
            Ok(Box::new(transport) as Box<dyn super::Transport>)
        })
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let network = |e: reqwest::Error| TransportError::Network {
            url: request.url.clone(),
            reason: e.to_string(),
        };

        let response = builder.send().await.map_err(network)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(network)?;

        Ok(HttpResponse {
            url: request.url,
            status,
            content_type,
            body,
        })
    }
}
