//! Scripted HTTP fetcher
//!
//! Routes are matched by method and a path fragment, in registration order.
//! Handlers are plain closures so retry tests can keep their own attempt
//! counters. Every dispatched request is recorded for assertions.

use async_trait::async_trait;
use drive_core::{
    AbortSignal, FetchError, HttpFetcher, HttpRequest, HttpResponse, StreamingResponse,
};
use futures::stream;
use parking_lot::Mutex;
use std::sync::Arc;

type Handler = Arc<dyn Fn(&HttpRequest) -> Result<HttpResponse, FetchError> + Send + Sync>;

struct Route {
    method: &'static str,
    path_fragment: String,
    handler: Handler,
}

/// Scripted [`HttpFetcher`] for tests.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

/// Build a 200 response with a JSON body.
pub fn json_ok(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: body.as_bytes().to_vec(),
    }
}

impl ScriptedFetcher {
    /// Fetcher with no routes; every request fails with a 404.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for requests whose URL contains `path_fragment`.
    pub fn on(
        &self,
        method: &'static str,
        path_fragment: impl Into<String>,
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, FetchError> + Send + Sync + 'static,
    ) {
        self.routes.lock().push(Route {
            method,
            path_fragment: path_fragment.into(),
            handler: Arc::new(handler),
        });
    }

    /// Register a fixed JSON response.
    pub fn on_json(&self, method: &'static str, path_fragment: impl Into<String>, body: String) {
        self.on(method, path_fragment, move |_| Ok(json_ok(&body)));
    }

    /// All dispatched requests, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of dispatched requests whose URL contains `path_fragment`.
    pub fn request_count(&self, path_fragment: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.url.contains(path_fragment))
            .count()
    }

    fn dispatch(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let routes = self.routes.lock();
        // Latest registration wins, so tests can override fixture defaults.
        for route in routes.iter().rev() {
            if route.method == request.method.as_str()
                && request.url.contains(&route.path_fragment)
            {
                return (route.handler)(request);
            }
        }
        Ok(HttpResponse {
            status: 404,
            headers: Vec::new(),
            body: format!("no scripted route for {} {}", request.method.as_str(), request.url)
                .into_bytes(),
        })
    }
}

#[async_trait]
impl HttpFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: HttpRequest,
        abort: &AbortSignal,
    ) -> Result<HttpResponse, FetchError> {
        if abort.is_aborted() {
            return Err(FetchError::Aborted);
        }
        self.requests.lock().push(request.clone());
        self.dispatch(&request)
    }

    async fn fetch_stream(
        &self,
        request: HttpRequest,
        abort: &AbortSignal,
    ) -> Result<StreamingResponse, FetchError> {
        if abort.is_aborted() {
            return Err(FetchError::Aborted);
        }
        self.requests.lock().push(request.clone());
        let response = self.dispatch(&request)?;

        // Split the body into small chunks so consumers exercise their
        // reassembly paths.
        let chunks: Vec<Result<Vec<u8>, FetchError>> = response
            .body
            .chunks(128)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(StreamingResponse {
            status: response.status,
            headers: response.headers,
            body: Box::pin(stream::iter(chunks)),
        })
    }
}
