//! Retry-matrix and circuit-breaker laws, driven with paused time.

use drive_api::retry::{TOO_MANY_SUBSEQUENT_429, TOO_MANY_SUBSEQUENT_5XX};
use drive_api::ApiClient;
use drive_core::{
    AbortController, AbortSignal, DriveConfig, DriveError, FetchError, HttpResponse, SdkEvent,
    SdkEventBus, TelemetryEvent,
};
use drive_testkit::{json_ok, RecordingTelemetry, ScriptedFetcher};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    fetcher: Arc<ScriptedFetcher>,
    client: ApiClient,
    telemetry: Arc<RecordingTelemetry>,
    events: Arc<Mutex<Vec<SdkEvent>>>,
    _subscription: drive_core::SdkEventSubscription,
}

fn harness() -> Harness {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let telemetry = Arc::new(RecordingTelemetry::new());
    let bus = Arc::new(SdkEventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_inner = Arc::clone(&events);
    let subscription = bus.subscribe(move |event| events_inner.lock().push(event));

    let client = ApiClient::new(
        fetcher.clone(),
        DriveConfig::for_testing(),
        bus,
        telemetry.clone(),
    );
    Harness {
        fetcher,
        client,
        telemetry,
        events,
        _subscription: subscription,
    }
}

fn rate_limited(retry_after: Option<&str>) -> HttpResponse {
    HttpResponse {
        status: 429,
        headers: retry_after
            .map(|value| vec![("Retry-After".to_string(), value.to_string())])
            .unwrap_or_default(),
        body: Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_error_retries_once_and_succeeds() {
    let h = harness();
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_inner = Arc::clone(&attempts);
    h.fetcher.on("GET", "/thing", move |_| {
        if attempts_inner.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(FetchError::Transport("connection reset".to_string()))
        } else {
            Ok(json_ok(r#"{"Code":1000}"#))
        }
    });

    let result: serde_json::Value = h
        .client
        .get_json("/thing", &AbortSignal::none())
        .await
        .unwrap();
    assert_eq!(result["Code"], 1000);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    // The cross-over is reported; no transfer error telemetry exists.
    assert_eq!(
        h.telemetry.events(),
        vec![TelemetryEvent::ApiRetrySucceeded {
            url: "https://drive.test/api/thing".to_string(),
            failed_attempts: 1,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn second_transport_error_fails_the_call() {
    let h = harness();
    h.fetcher.on("GET", "/thing", |_| {
        Err(FetchError::Transport("connection reset".to_string()))
    });

    let result = h
        .client
        .get_json::<serde_json::Value>("/thing", &AbortSignal::none())
        .await;
    assert!(matches!(result, Err(DriveError::Network { .. })));
    assert_eq!(h.fetcher.request_count("/thing"), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_after_header_is_honored() {
    let h = harness();
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_inner = Arc::clone(&attempts);
    h.fetcher.on("GET", "/limited", move |_| {
        if attempts_inner.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(rate_limited(Some("30")))
        } else {
            Ok(json_ok(r#"{"Code":1000}"#))
        }
    });

    let start = tokio::time::Instant::now();
    let _: serde_json::Value = h
        .client
        .get_json("/limited", &AbortSignal::none())
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn breaker_trips_after_too_many_subsequent_429() {
    let h = harness();
    h.fetcher
        .on("GET", "/limited", |_| Ok(rate_limited(None)));

    let result = h
        .client
        .get_json::<serde_json::Value>("/limited", &AbortSignal::none())
        .await;
    assert!(matches!(result, Err(DriveError::RateLimited { .. })));
    assert_eq!(
        h.fetcher.request_count("/limited"),
        TOO_MANY_SUBSEQUENT_429 as usize
    );
    assert!(h.events.lock().contains(&SdkEvent::RequestsThrottled));

    // While open, calls are refused without touching the network.
    let result = h
        .client
        .get_json::<serde_json::Value>("/limited", &AbortSignal::none())
        .await;
    assert!(matches!(result, Err(DriveError::RateLimited { .. })));
    assert_eq!(
        h.fetcher.request_count("/limited"),
        TOO_MANY_SUBSEQUENT_429 as usize
    );

    // After the cooldown the circuit closes; a success resets it and emits
    // the unthrottle event.
    tokio::time::advance(Duration::from_secs(61)).await;
    h.fetcher.on("GET", "/fine", |_| Ok(json_ok(r#"{"Code":1000}"#)));
    let _: serde_json::Value = h
        .client
        .get_json("/fine", &AbortSignal::none())
        .await
        .unwrap();
    assert!(h.events.lock().contains(&SdkEvent::RequestsUnthrottled));
}

#[tokio::test(start_paused = true)]
async fn sparse_successes_keep_the_breaker_closed() {
    let h = harness();
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_inner = Arc::clone(&attempts);
    // Four 429s for every success.
    h.fetcher.on("GET", "/mixed", move |_| {
        if attempts_inner.fetch_add(1, Ordering::SeqCst) % 5 == 4 {
            Ok(json_ok(r#"{"Code":1000}"#))
        } else {
            Ok(rate_limited(None))
        }
    });

    for _ in 0..30 {
        let _: serde_json::Value = h
            .client
            .get_json("/mixed", &AbortSignal::none())
            .await
            .unwrap();
    }
    assert!(!h.events.lock().contains(&SdkEvent::RequestsThrottled));
}

#[tokio::test(start_paused = true)]
async fn server_errors_retry_once_then_trip_the_5xx_breaker() {
    let h = harness();
    h.fetcher.on("GET", "/broken", |_| {
        Ok(HttpResponse {
            status: 503,
            headers: Vec::new(),
            body: Vec::new(),
        })
    });

    // Each call burns two attempts (initial + one retry). The breaker trips
    // once the subsequent-failure count reaches the threshold.
    let calls_before_trip = TOO_MANY_SUBSEQUENT_5XX / 2;
    for call in 0..calls_before_trip {
        let result = h
            .client
            .get_json::<serde_json::Value>("/broken", &AbortSignal::none())
            .await;
        if call + 1 < calls_before_trip {
            assert!(matches!(result, Err(DriveError::ApiHttp { status: 503, .. })));
        } else {
            assert!(matches!(result, Err(DriveError::Server { .. })));
        }
    }

    // Circuit open: refused without a network round-trip.
    let before = h.fetcher.request_count("/broken");
    let result = h
        .client
        .get_json::<serde_json::Value>("/broken", &AbortSignal::none())
        .await;
    assert!(matches!(result, Err(DriveError::Server { .. })));
    assert_eq!(h.fetcher.request_count("/broken"), before);

    tokio::time::advance(Duration::from_secs(61)).await;
    h.fetcher.on("GET", "/ok", |_| Ok(json_ok(r#"{"Code":1000}"#)));
    let _: serde_json::Value = h.client.get_json("/ok", &AbortSignal::none()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn abort_before_dispatch_consumes_no_budget() {
    let h = harness();
    h.fetcher.on("GET", "/thing", |_| Ok(json_ok(r#"{"Code":1000}"#)));

    let controller = AbortController::new();
    controller.abort();
    let result = h
        .client
        .get_json::<serde_json::Value>("/thing", &controller.signal())
        .await;
    assert!(matches!(result, Err(DriveError::Aborted)));
    assert_eq!(h.fetcher.request_count("/thing"), 0);
}

#[tokio::test(start_paused = true)]
async fn offline_retries_wait_five_seconds() {
    let h = harness();
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_inner = Arc::clone(&attempts);
    h.fetcher.on("GET", "/thing", move |_| {
        if attempts_inner.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(FetchError::Offline)
        } else {
            Ok(json_ok(r#"{"Code":1000}"#))
        }
    });

    let start = tokio::time::Instant::now();
    let _: serde_json::Value = h
        .client
        .get_json("/thing", &AbortSignal::none())
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
