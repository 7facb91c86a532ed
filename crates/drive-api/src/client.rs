//! The API client
//!
//! One instance serves three request shapes: typed JSON request/response,
//! streaming blob GET, and multipart blob POST. The client owns the
//! process-wide circuit breakers and the SDK events bus; every endpoint in
//! the SDK goes through it.

use crate::breaker::CircuitBreaker;
use crate::envelope;
use crate::retry::{
    parse_retry_after, BREAKER_COOLDOWN, DEFAULT_RATE_LIMIT_DELAY, OFFLINE_RETRY_DELAY,
    SERVER_ERROR_RETRY_DELAY, TIMEOUT_RETRY_DELAY, TOO_MANY_SUBSEQUENT_429,
    TOO_MANY_SUBSEQUENT_5XX, TRANSPORT_RETRY_DELAY,
};
use drive_core::config::JSON_REQUEST_TIMEOUT;
use drive_core::{
    AbortSignal, DriveConfig, DriveError, FetchError, HttpFetcher, HttpMethod, HttpRequest,
    HttpResponse, SdkEvent, SdkEventBus, StreamingResponse, TelemetryEvent, TelemetrySink,
    SDK_PLATFORM, SDK_VERSION,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Multipart boundary used for block uploads.
const BLOCK_BOUNDARY: &str = "-----drive-sdk-block";

enum RetryDecision {
    RetryAfter(Duration),
    Fail(DriveError),
}

/// Typed HTTP client wrapping the host-supplied fetcher.
pub struct ApiClient {
    fetcher: Arc<dyn HttpFetcher>,
    config: DriveConfig,
    events: Arc<SdkEventBus>,
    telemetry: Arc<dyn TelemetrySink>,
    breaker_429: CircuitBreaker,
    breaker_5xx: CircuitBreaker,
}

impl ApiClient {
    /// Build a client. The breakers start closed.
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        config: DriveConfig,
        events: Arc<SdkEventBus>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            fetcher,
            config,
            events,
            telemetry,
            breaker_429: CircuitBreaker::new(TOO_MANY_SUBSEQUENT_429, BREAKER_COOLDOWN),
            breaker_5xx: CircuitBreaker::new(TOO_MANY_SUBSEQUENT_5XX, BREAKER_COOLDOWN),
        }
    }

    /// The SDK events bus shared with the host.
    pub fn events(&self) -> &Arc<SdkEventBus> {
        &self.events
    }

    /// The active configuration.
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Record a telemetry event, honoring the observability switch.
    pub fn record(&self, event: TelemetryEvent) {
        if self.config.observability_enabled {
            self.telemetry.record(event);
        }
    }

    /// GET a typed JSON endpoint.
    pub async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        abort: &AbortSignal,
    ) -> Result<R, DriveError> {
        let request = self.json_request(HttpMethod::Get, path, None)?;
        let response = self.execute(&request, false, abort).await?;
        envelope::decode_body(response.status, &response.body, &request.url)
    }

    /// POST a typed JSON endpoint.
    pub async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        abort: &AbortSignal,
    ) -> Result<R, DriveError> {
        let encoded = encode_body(body)?;
        let request = self.json_request(HttpMethod::Post, path, Some(encoded))?;
        let response = self.execute(&request, false, abort).await?;
        envelope::decode_body(response.status, &response.body, &request.url)
    }

    /// PUT a typed JSON endpoint.
    pub async fn put_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        abort: &AbortSignal,
    ) -> Result<R, DriveError> {
        let encoded = encode_body(body)?;
        let request = self.json_request(HttpMethod::Put, path, Some(encoded))?;
        let response = self.execute(&request, false, abort).await?;
        envelope::decode_body(response.status, &response.body, &request.url)
    }

    /// DELETE a typed JSON endpoint.
    pub async fn delete_json<R: DeserializeOwned>(
        &self,
        path: &str,
        abort: &AbortSignal,
    ) -> Result<R, DriveError> {
        let request = self.json_request(HttpMethod::Delete, path, None)?;
        let response = self.execute(&request, false, abort).await?;
        envelope::decode_body(response.status, &response.body, &request.url)
    }

    /// GET an encrypted block from a storage URL. Credentials are omitted;
    /// authorization travels in the `pm-storage-token` header.
    pub async fn get_blob_stream(
        &self,
        url: &str,
        token: &str,
        abort: &AbortSignal,
    ) -> Result<StreamingResponse, DriveError> {
        abort.check()?;
        let mut failed_attempts = 0u32;
        let mut transport_retries = 0u32;
        let mut server_retries = 0u32;

        loop {
            self.gate()?;
            abort.check()?;

            let mut request =
                HttpRequest::new(HttpMethod::Get, url, self.config.download_timeout)
                    .header("pm-storage-token", token);
            request.with_credentials = false;

            let decision = match self.fetcher.fetch_stream(request, abort).await {
                Ok(response) if response.status == 429 => {
                    failed_attempts += 1;
                    let retry_after = response.header("Retry-After").and_then(parse_retry_after);
                    self.on_rate_limited(retry_after, true)
                }
                Ok(response) if response.status >= 500 => {
                    failed_attempts += 1;
                    self.on_server_error(response.status, &mut server_retries)
                }
                Ok(response) if !(200..300).contains(&response.status) => {
                    return Err(DriveError::api_http(response.status, String::new()));
                }
                Ok(response) => {
                    self.on_success(true, failed_attempts, url);
                    return Ok(response);
                }
                Err(err) => {
                    match self.on_fetch_error(err, &mut transport_retries, &mut failed_attempts) {
                        Ok(decision) => decision,
                        Err(err) => return Err(err),
                    }
                }
            };

            match decision {
                RetryDecision::RetryAfter(delay) => self.wait(delay, abort).await?,
                RetryDecision::Fail(err) => return Err(err),
            }
        }
    }

    /// POST one block's ciphertext to its storage URL as multipart data.
    pub async fn post_blob(
        &self,
        url: &str,
        token: &str,
        block: &[u8],
        abort: &AbortSignal,
    ) -> Result<(), DriveError> {
        let mut body = Vec::with_capacity(block.len() + 256);
        body.extend_from_slice(
            format!(
                "--{BLOCK_BOUNDARY}\r\nContent-Disposition: form-data; name=\"Block\"; \
                 filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(block);
        body.extend_from_slice(format!("\r\n--{BLOCK_BOUNDARY}--\r\n").as_bytes());

        let mut request = HttpRequest::new(HttpMethod::Post, url, self.config.upload_timeout)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BLOCK_BOUNDARY}"),
            )
            .header("pm-storage-token", token)
            .body(body);
        request.with_credentials = false;

        let response = self.execute(&request, true, abort).await?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(error_from_response(&response))
        }
    }

    fn json_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpRequest, DriveError> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut request = HttpRequest::new(method, url, JSON_REQUEST_TIMEOUT)
            .header("Accept", "application/vnd.protonmail.v1+json")
            .header("Content-Type", "application/json")
            .header("Language", self.config.language.clone())
            .header(
                "x-pm-drive-sdk-version",
                format!("{SDK_PLATFORM}@{SDK_VERSION}"),
            );
        if let Some(body) = body {
            request = request.body(body);
        }
        Ok(request)
    }

    /// Run one request through the retry matrix.
    async fn execute(
        &self,
        request: &HttpRequest,
        transfer: bool,
        abort: &AbortSignal,
    ) -> Result<HttpResponse, DriveError> {
        // Aborting before dispatch consumes no retry budget.
        abort.check()?;
        let mut failed_attempts = 0u32;
        let mut transport_retries = 0u32;
        let mut server_retries = 0u32;

        loop {
            self.gate()?;
            abort.check()?;

            let decision = match self.fetcher.fetch(request.clone(), abort).await {
                Ok(response) if response.status == 429 => {
                    failed_attempts += 1;
                    let retry_after = response.header("Retry-After").and_then(parse_retry_after);
                    self.on_rate_limited(retry_after, transfer)
                }
                Ok(response) if response.status >= 500 => {
                    failed_attempts += 1;
                    if self.breaker_5xx.record_failure() {
                        warn!(status = response.status, "server error circuit tripped");
                        RetryDecision::Fail(DriveError::server(
                            "too many subsequent server errors",
                        ))
                    } else if server_retries >= 1 {
                        RetryDecision::Fail(error_from_response(&response))
                    } else {
                        server_retries += 1;
                        RetryDecision::RetryAfter(SERVER_ERROR_RETRY_DELAY)
                    }
                }
                Ok(response) => {
                    self.on_success(transfer, failed_attempts, &request.url);
                    return Ok(response);
                }
                Err(err) => {
                    match self.on_fetch_error(err, &mut transport_retries, &mut failed_attempts) {
                        Ok(decision) => decision,
                        Err(err) => return Err(err),
                    }
                }
            };

            match decision {
                RetryDecision::RetryAfter(delay) => self.wait(delay, abort).await?,
                RetryDecision::Fail(err) => return Err(err),
            }
        }
    }

    /// Refuse dispatch while a breaker is open.
    fn gate(&self) -> Result<(), DriveError> {
        if let Err(remaining) = self.breaker_429.check() {
            return Err(DriveError::RateLimited {
                message: "rate limit circuit open".to_string(),
                retry_after_secs: Some(remaining.as_secs().max(1)),
            });
        }
        if self.breaker_5xx.check().is_err() {
            return Err(DriveError::server("server error circuit open"));
        }
        Ok(())
    }

    fn on_rate_limited(&self, retry_after: Option<Duration>, transfer: bool) -> RetryDecision {
        if self.breaker_429.record_failure() {
            warn!("rate limit circuit tripped");
            self.events.emit(SdkEvent::RequestsThrottled);
            if transfer {
                self.events.emit(SdkEvent::TransfersPaused);
            }
            return RetryDecision::Fail(DriveError::RateLimited {
                message: "too many subsequent rate limits".to_string(),
                retry_after_secs: retry_after.map(|delay| delay.as_secs()),
            });
        }
        RetryDecision::RetryAfter(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_DELAY))
    }

    fn on_server_error(&self, status: u16, server_retries: &mut u32) -> RetryDecision {
        if self.breaker_5xx.record_failure() {
            warn!(status, "server error circuit tripped");
            return RetryDecision::Fail(DriveError::server(
                "too many subsequent server errors",
            ));
        }
        if *server_retries >= 1 {
            return RetryDecision::Fail(DriveError::api_http(status, String::new()));
        }
        *server_retries += 1;
        RetryDecision::RetryAfter(SERVER_ERROR_RETRY_DELAY)
    }

    fn on_fetch_error(
        &self,
        err: FetchError,
        transport_retries: &mut u32,
        failed_attempts: &mut u32,
    ) -> Result<RetryDecision, DriveError> {
        match err {
            FetchError::Aborted => Err(DriveError::Aborted),
            FetchError::Offline => {
                *failed_attempts += 1;
                debug!("offline; retrying");
                Ok(RetryDecision::RetryAfter(OFFLINE_RETRY_DELAY))
            }
            FetchError::Timeout => {
                *failed_attempts += 1;
                debug!("request timed out; retrying");
                Ok(RetryDecision::RetryAfter(TIMEOUT_RETRY_DELAY))
            }
            FetchError::Transport(message) => {
                *failed_attempts += 1;
                if *transport_retries >= 1 {
                    return Ok(RetryDecision::Fail(DriveError::network(message)));
                }
                *transport_retries += 1;
                Ok(RetryDecision::RetryAfter(TRANSPORT_RETRY_DELAY))
            }
        }
    }

    fn on_success(&self, transfer: bool, failed_attempts: u32, url: &str) {
        if self.breaker_429.record_success() {
            self.events.emit(SdkEvent::RequestsUnthrottled);
            if transfer {
                self.events.emit(SdkEvent::TransfersResumed);
            }
        }
        self.breaker_5xx.record_success();
        if failed_attempts > 0 {
            self.record(TelemetryEvent::ApiRetrySucceeded {
                url: url.to_string(),
                failed_attempts,
            });
        }
    }

    /// Sleep between attempts, waking early on abort.
    async fn wait(&self, delay: Duration, abort: &AbortSignal) -> Result<(), DriveError> {
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = abort.aborted() => Err(DriveError::Aborted),
        }
    }
}

fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<Vec<u8>, DriveError> {
    serde_json::to_vec(body)
        .map_err(|err| DriveError::validation(format!("encode request body: {err}")))
}

/// Map a non-2xx buffered response to the error taxonomy, preferring the
/// typed envelope when one is present.
fn error_from_response(response: &HttpResponse) -> DriveError {
    match serde_json::from_slice::<envelope::ApiEnvelope>(&response.body) {
        Ok(parsed) if !parsed.is_ok() => {
            DriveError::api_code(parsed.code, parsed.error.unwrap_or_default())
        }
        _ => DriveError::api_http(
            response.status,
            String::from_utf8_lossy(&response.body).into_owned(),
        ),
    }
}
