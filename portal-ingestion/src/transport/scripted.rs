use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use super::{HttpRequest, HttpResponse, Method, Transport, TransportError, TransportFactory};

/// Replays canned responses per `(method, url)` and records every request.
///
/// The last queued response for a route is sticky; unknown routes answer 404.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    routes: Arc<Mutex<HashMap<(Method, String), VecDeque<HttpResponse>>>>,
    log: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, method: Method, url: &str, status: u16, body: &str) -> &Self {
        let response = HttpResponse {
            url: url.to_string(),
            status,
            content_type: Some("application/json; charset=utf-8".to_string()),
            body: body.to_string(),
        };
        self.routes
            .lock()
            .unwrap()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    pub(crate) fn respond_json(&self, method: Method, url: &str, body: serde_json::Value) -> &Self {
        self.respond(method, url, 200, &body.to_string())
    }

    /// Drops anything queued for the route and serves `body` from now on.
    pub(crate) fn replace_json(&self, method: Method, url: &str, body: serde_json::Value) -> &Self {
        self.routes.lock().unwrap().remove(&(method, url.to_string()));
        self.respond_json(method, url, body)
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|r| r.url == url).count()
    }

    pub(crate) fn factory(&self) -> TransportFactory {
        let this = self.clone();
        Arc::new(move || Ok(Box::new(this.clone()) as Box<dyn Transport>))
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let key = (request.method, request.url.clone());
        self.log.lock().unwrap().push(request.clone());

        let mut routes = self.routes.lock().unwrap();
        let response = match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };

        Ok(response.unwrap_or_else(|| HttpResponse {
            url: request.url,
            status: 404,
            content_type: None,
            body: String::new(),
        }))
    }
}
