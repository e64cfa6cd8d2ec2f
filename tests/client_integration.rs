//! End-to-end invocation scenarios through a service handle
//!
//! Exercises the full protection chain (breaker gate, limiter admission,
//! classification, refresh, backoff) the way a chatbot task would use it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use guardpost::{
    CircuitState, CredentialRefresher, CredentialStore, ErrorCategory, InvokeError, Limits,
    ProviderError, ServiceSpec,
};

/// Route crate logs to the test harness; `RUST_LOG` controls verbosity
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn limits() -> Limits {
    Limits::builder()
        .max_requests_per_second(100)
        .max_requests_per_minute(1000)
        .max_retries(3)
        .backoff_base_delay(Duration::from_millis(50))
        .backoff_max_delay(Duration::from_millis(400))
        .circuit_failure_threshold(5)
        .circuit_open_duration(Duration::from_secs(60))
        .build()
        .expect("limits are consistent")
}

const DEADLINE: Duration = Duration::from_secs(10);

/// Transient recovery scenario.
///
/// # Test Steps
/// 1. The provider returns 503 twice, then succeeds.
/// 2. The call is retried with backoff and ultimately returns the value.
/// 3. Elapsed time shows two backoff delays were actually served.
/// 4. The breaker ends closed.
#[tokio::test(flavor = "multi_thread")]
async fn test_transient_outage_recovers_within_budget() {
    init_tracing();
    let handle = ServiceSpec::new("scheduling").limits(limits()).rng_seed(7).build().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let result = handle
        .invoke("create_event", DEADLINE, || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ProviderError::http("scheduling", 503, "backend unavailable"))
                } else {
                    Ok("evt_42")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "evt_42");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Two jittered delays: at least 50/2 + 100/2 ms
    assert!(started.elapsed() >= Duration::from_millis(75), "backoff must be served");
    assert_eq!(handle.breaker_state(), CircuitState::Closed);
}

/// Permission denial scenario.
///
/// # Test Steps
/// 1. The provider returns 403 on the first call.
/// 2. The invocation fails immediately: one provider call, no backoff.
/// 3. The surfaced error is tagged `permission`.
#[tokio::test(flavor = "multi_thread")]
async fn test_permission_denial_fails_fast() {
    init_tracing();
    let handle = ServiceSpec::new("crm").limits(limits()).rng_seed(7).build().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let result: Result<(), _> = handle
        .invoke("update_contact", DEADLINE, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::http("crm", 403, "missing scope contacts.write"))
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(started.elapsed() < Duration::from_millis(40), "no backoff for permission errors");
    match result.unwrap_err() {
        InvokeError::Failed { category, attempts, .. } => {
            assert_eq!(category, ErrorCategory::Permission);
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Expired-credential scenario.
///
/// # Test Steps
/// 1. The provider returns 401 on the first call.
/// 2. The refresher succeeds and the call is retried once immediately.
/// 3. The retry succeeds; exactly two provider calls and one refresh.
#[tokio::test(flavor = "multi_thread")]
async fn test_expired_credentials_refresh_once() {
    init_tracing();

    struct CountingRefresher(AtomicU32);

    #[async_trait]
    impl CredentialRefresher for CountingRefresher {
        async fn refresh(&self, _store: &CredentialStore) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    let refresher = Arc::new(CountingRefresher(AtomicU32::new(0)));
    let handle = ServiceSpec::new("assistant")
        .limits(limits())
        .rng_seed(7)
        .refresher(refresher.clone())
        .build()
        .unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let result = handle
        .invoke("send_message", DEADLINE, || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ProviderError::http("assistant", 401, "token expired"))
                } else {
                    Ok("reply")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "reply");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(refresher.0.load(Ordering::SeqCst), 1);
}

/// Sustained outage scenario.
///
/// # Test Steps
/// 1. With a failure threshold of 2 and no retries, two failing calls open
///    the circuit.
/// 2. The next call is rejected without touching the provider.
/// 3. After the cool-down one trial call goes through, succeeds, and
///    closes the circuit; traffic resumes.
#[tokio::test(flavor = "multi_thread")]
async fn test_sustained_outage_opens_then_recovers() {
    init_tracing();
    let limits = Limits::builder()
        .max_requests_per_second(100)
        .max_requests_per_minute(1000)
        .max_retries(0)
        .backoff_base_delay(Duration::from_millis(10))
        .backoff_max_delay(Duration::from_millis(80))
        .circuit_failure_threshold(2)
        .circuit_open_duration(Duration::from_millis(300))
        .build()
        .unwrap();
    let handle = ServiceSpec::new("scheduling").limits(limits).rng_seed(7).build().unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let failing_op = || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ProviderError::http("scheduling", 500, "backend down"))
        }
    };

    for _ in 0..2 {
        let r: Result<(), _> = handle.invoke("create_event", DEADLINE, failing_op.clone()).await;
        assert_eq!(r.unwrap_err().category(), Some(ErrorCategory::TransientServer));
    }
    assert_eq!(handle.breaker_state(), CircuitState::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let rejected: Result<(), _> = handle.invoke("create_event", DEADLINE, failing_op.clone()).await;
    assert!(matches!(rejected.unwrap_err(), InvokeError::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2, "provider untouched while open");

    tokio::time::sleep(Duration::from_millis(350)).await;

    let recovered = handle
        .invoke("create_event", DEADLINE, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>("evt_43")
            }
        })
        .await;

    assert_eq!(recovered.unwrap(), "evt_43");
    assert_eq!(handle.breaker_state(), CircuitState::Closed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

/// Deadline scenario.
///
/// # Test Steps
/// 1. The provider keeps failing transiently while the backoff schedule is
///    far longer than the caller's deadline.
/// 2. The call aborts with a deadline error well before the schedule would
///    complete, and the handle remains usable.
#[tokio::test(flavor = "multi_thread")]
async fn test_deadline_aborts_retry_schedule() {
    init_tracing();
    let limits = Limits::builder()
        .max_requests_per_second(100)
        .max_requests_per_minute(1000)
        .max_retries(5)
        .backoff_base_delay(Duration::from_secs(2))
        .backoff_max_delay(Duration::from_secs(20))
        .build()
        .unwrap();
    let handle = ServiceSpec::new("crm").limits(limits).rng_seed(7).build().unwrap();
    let started = Instant::now();

    let result: Result<(), _> = handle
        .invoke("update_contact", Duration::from_millis(150), || async {
            Err(ProviderError::http("crm", 502, "bad gateway"))
        })
        .await;

    assert!(matches!(result.unwrap_err(), InvokeError::DeadlineExceeded { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));

    let ok = handle
        .invoke("update_contact", DEADLINE, || async { Ok::<_, ProviderError>(()) })
        .await;
    assert!(ok.is_ok());
}
