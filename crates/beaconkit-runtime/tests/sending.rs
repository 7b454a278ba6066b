//! End-to-end tests of the sending subsystem against the scripted transport

use std::sync::Arc;
use std::time::{Duration, Instant};

use beaconkit_runtime::testing::{ok_response, MockHttpClient, RecordedRequest};
use beaconkit_runtime::{BeaconConfig, BeaconRuntime, HttpResponse, SystemTimeSource};

fn start_runtime(client: Arc<MockHttpClient>) -> BeaconRuntime {
    BeaconRuntime::start_with(
        BeaconConfig::testing(),
        client,
        Arc::new(SystemTimeSource::new()),
    )
    .expect("runtime must start")
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses
fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_invalid_config_is_rejected_at_start() {
    let mut config = BeaconConfig::testing();
    config.application_id = String::new();
    let result = BeaconRuntime::start_with(
        config,
        Arc::new(MockHttpClient::new()),
        Arc::new(SystemTimeSource::new()),
    );
    assert!(result.is_err());
}

#[test]
fn test_init_walks_backoff_schedule_until_success() {
    let client = Arc::new(MockHttpClient::new());
    client.push_status_response(HttpResponse::network_error());
    client.push_status_response(HttpResponse::network_error());

    let started = Instant::now();
    let runtime = start_runtime(client.clone());
    assert!(!runtime.is_initialized());
    assert!(runtime.wait_for_init_completion_timeout(Duration::from_secs(10)));
    let elapsed = started.elapsed();

    // Two failures cost 1 s + 2 s of backoff before the third attempt wins.
    assert!(elapsed >= Duration::from_millis(2_900), "took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
    assert!(runtime.is_initialized());

    let status_requests = client
        .requests()
        .iter()
        .filter(|r| matches!(r, RecordedRequest::Status))
        .count();
    assert_eq!(status_requests, 3);

    runtime.shutdown();
}

#[test]
fn test_finished_session_is_transmitted_and_released() {
    let client = Arc::new(MockHttpClient::new());
    // One failed handshake buys a full backoff second to finish the session
    // before the first sending pass runs.
    client.push_status_response(HttpResponse::network_error());
    let runtime = start_runtime(client.clone());

    let session = runtime.create_session("203.0.113.4");
    runtime.add_event_record(session, "et=10&na=loadPage");
    runtime.add_action_record(session, "et=1&na=checkout");
    runtime.end_session(session);

    assert!(runtime.wait_for_init_completion_timeout(Duration::from_secs(5)));

    assert!(wait_until(Duration::from_secs(3), || {
        !client.beacon_payloads().is_empty()
    }));
    let payloads = client.beacon_payloads();
    assert_eq!(payloads.len(), 1);
    // Session metadata up front, then records in insertion order.
    assert!(payloads[0].starts_with("vv=3&ap=test-app&vi=test-device"));
    assert!(payloads[0].ends_with("&et=10&na=loadPage&et=1&na=checkout"));

    let carried_ip = client.requests().iter().any(|r| {
        matches!(r, RecordedRequest::Beacon { client_ip, .. } if client_ip == "203.0.113.4")
    });
    assert!(carried_ip);

    // The cache entry is gone once the server accepted the last chunk.
    assert!(wait_until(Duration::from_secs(1), || {
        runtime.cache_size_bytes() == 0
    }));

    runtime.shutdown();
}

#[test]
fn test_capture_off_buffers_records_and_drops_them_at_shutdown() {
    let client = Arc::new(MockHttpClient::new());
    client.set_default_status_response(ok_response("cp=0&si=120"));

    let runtime = start_runtime(client.clone());
    assert!(runtime.wait_for_init_completion_timeout(Duration::from_secs(5)));

    let session = runtime.create_session("203.0.113.4");
    runtime.add_event_record(session, "et=10&na=neverSent");
    runtime.end_session(session);

    std::thread::sleep(Duration::from_millis(200));
    assert!(client.beacon_payloads().is_empty());
    // The pending session's records stay buffered while capture is off.
    assert!(runtime.cache_size_bytes() > 0);

    runtime.shutdown();
    // Shutdown skipped the flush: the records were discarded, not sent.
    assert!(client.beacon_payloads().is_empty());
}

#[test]
fn test_throttled_beacon_is_retried_with_identical_bytes() {
    let client = Arc::new(MockHttpClient::new());
    client.push_beacon_response(HttpResponse::new(429, "").with_header("Retry-After", "1"));

    let runtime = start_runtime(client.clone());
    assert!(runtime.wait_for_init_completion_timeout(Duration::from_secs(5)));

    let session = runtime.create_session("203.0.113.4");
    runtime.add_event_record(session, "et=10&na=throttled");
    runtime.end_session(session);

    assert!(wait_until(Duration::from_secs(3), || {
        client.beacon_payloads().len() >= 1
    }));
    let first_seen = Instant::now();
    assert!(wait_until(Duration::from_secs(5), || {
        client.beacon_payloads().len() >= 2
    }));

    // The retry waited out the advertised delay and resent the same chunk.
    assert!(first_seen.elapsed() >= Duration::from_millis(800));
    let payloads = client.beacon_payloads();
    assert_eq!(payloads[0], payloads[1]);

    runtime.shutdown();
}

#[test]
fn test_shutdown_interrupts_sender_sleep_quickly() {
    let client = Arc::new(MockHttpClient::new());
    let runtime = start_runtime(client);
    assert!(runtime.wait_for_init_completion_timeout(Duration::from_secs(5)));

    // The sender is asleep in its steady-state pause; shutdown must preempt
    // it and join both threads well within a second.
    let started = Instant::now();
    runtime.shutdown();
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

#[test]
fn test_wait_for_init_completion_times_out() {
    let client = Arc::new(MockHttpClient::new());
    client.set_default_status_response(HttpResponse::network_error());

    let runtime = start_runtime(client);
    let started = Instant::now();
    assert!(!runtime.wait_for_init_completion_timeout(Duration::from_millis(300)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(1_500));
    assert!(!runtime.is_initialized());

    runtime.shutdown();
    // Shutdown abandoned initialization; blocked waiters are released.
    assert!(!runtime.wait_for_init_completion());
}

#[test]
fn test_no_http_traffic_after_shutdown_returns() {
    let client = Arc::new(MockHttpClient::new());
    let runtime = start_runtime(client.clone());
    assert!(runtime.wait_for_init_completion_timeout(Duration::from_secs(5)));

    runtime.shutdown();
    let requests_at_shutdown = client.request_count();

    // Instrumentation degrades to no-ops instead of failing.
    let session = runtime.create_session("203.0.113.4");
    runtime.add_event_record(session, "et=1&na=late");
    runtime.end_session(session);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(client.request_count(), requests_at_shutdown);
    assert_eq!(runtime.cache_size_bytes(), 0);

    // A second shutdown is a no-op.
    runtime.shutdown();
}
