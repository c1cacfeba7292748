//! Dispatch and watchdog behavior against an in-process fake session

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rfremote::{BoundedCall, Outcome, RemoteFault, RemoteSession};

#[derive(Debug, Clone, Copy, PartialEq)]
enum FaultKind {
    RemoteTimeout,
    ConnectionLost,
    Scripting,
}

#[derive(Debug)]
struct FakeError(FaultKind, &'static str);

impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.1)
    }
}

impl std::error::Error for FakeError {}

impl RemoteFault for FakeError {
    fn is_remote_timeout(&self) -> bool {
        self.0 == FaultKind::RemoteTimeout
    }

    fn is_connection_lost(&self) -> bool {
        self.0 == FaultKind::ConnectionLost
    }
}

/// Session that records the script timeout bounds it was asked to set,
/// and can be told to refuse them
struct FakeSession {
    config_failure: Option<FaultKind>,
    bounds: Mutex<Vec<Duration>>,
}

impl FakeSession {
    fn working() -> Arc<Self> {
        Arc::new(FakeSession {
            config_failure: None,
            bounds: Mutex::new(Vec::new()),
        })
    }

    fn refusing_config(kind: FaultKind) -> Arc<Self> {
        Arc::new(FakeSession {
            config_failure: Some(kind),
            bounds: Mutex::new(Vec::new()),
        })
    }
}

impl RemoteSession for FakeSession {
    type Error = FakeError;

    fn set_script_timeout(&self, bound: Duration) -> Result<(), FakeError> {
        if let Some(kind) = self.config_failure {
            return Err(FakeError(kind, "config refused"));
        }
        self.bounds.lock().unwrap().push(bound);
        Ok(())
    }
}

#[test]
fn test_immediate_tasks_come_back_as_success() {
    let session = FakeSession::working();
    let started = Instant::now();

    let outcome = BoundedCall::new(Duration::from_secs(30)).run(
        &session,
        "/fast.html",
        |_: &FakeSession, target: &str, _| Ok::<_, FakeError>(target.len()),
    );

    assert_eq!(outcome.into_success(), Some(10));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_remote_bound_includes_the_grace_period() {
    let session = FakeSession::working();

    let outcome = BoundedCall::new(Duration::from_millis(200))
        .with_grace(Duration::from_millis(100))
        .run(&session, "/t", |_: &FakeSession, _: &str, _| {
            Ok::<_, FakeError>(())
        });

    assert!(matches!(outcome, Outcome::Success(())));
    assert_eq!(
        session.bounds.lock().unwrap().as_slice(),
        &[Duration::from_millis(300)]
    );
}

#[test]
fn test_slow_tasks_finish_when_they_beat_the_watchdog() {
    let session = FakeSession::working();
    let started = Instant::now();

    let outcome = BoundedCall::new(Duration::from_millis(500))
        .with_grace(Duration::from_millis(500))
        .run(&session, "/slow.html", |_: &FakeSession, _: &str, timeout| {
            thread::sleep(timeout / 2);
            Ok::<_, FakeError>("done")
        });

    assert_eq!(outcome.into_success(), Some("done"));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(1500));
}

#[test]
fn test_wedged_tasks_trip_the_watchdog() {
    let session = FakeSession::working();
    let started = Instant::now();

    let outcome = BoundedCall::new(Duration::from_millis(200))
        .with_grace(Duration::from_millis(100))
        .run(&session, "/wedged.html", |_: &FakeSession, _: &str, _| {
            thread::sleep(Duration::from_secs(3600));
            Ok::<_, FakeError>(())
        });

    let elapsed = started.elapsed();
    assert!(matches!(outcome, Outcome::WatchdogTimeout));
    assert_eq!(outcome.status(), "EXTERNAL-TIMEOUT");
    assert!(outcome.is_fatal());
    // timeout + 2 * grace
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed < Duration::from_millis(1500));
}

#[test]
fn test_remote_reported_timeouts_win_over_the_watchdog() {
    let session = FakeSession::working();

    let outcome = BoundedCall::new(Duration::from_millis(200))
        .with_grace(Duration::from_millis(200))
        .run(&session, "/t", |_: &FakeSession, _: &str, _| {
            thread::sleep(Duration::from_millis(50));
            Err::<(), _>(FakeError(FaultKind::RemoteTimeout, "script deadline"))
        });

    assert!(matches!(outcome, Outcome::RemoteTimeout));
    assert_eq!(outcome.status(), "EXTERNAL-TIMEOUT");
    assert!(!outcome.is_fatal());
}

#[test]
fn test_mid_task_transport_failures_are_fatal() {
    let session = FakeSession::working();

    let outcome = BoundedCall::new(Duration::from_millis(200))
        .with_grace(Duration::from_millis(100))
        .run(&session, "/t", |_: &FakeSession, _: &str, _| {
            Err::<(), _>(FakeError(FaultKind::ConnectionLost, "socket gone"))
        });

    assert!(matches!(outcome, Outcome::ConnectionLost));
    assert_eq!(outcome.status(), "CRASH");
    assert!(outcome.is_fatal());
}

#[test]
fn test_config_connection_loss_skips_the_task() {
    let session = FakeSession::refusing_config(FaultKind::ConnectionLost);
    let invocations = Arc::new(AtomicUsize::new(0));
    let spy = Arc::clone(&invocations);

    let outcome = BoundedCall::new(Duration::from_millis(200)).run(
        &session,
        "/t",
        move |_: &FakeSession, _: &str, _| {
            spy.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(())
        },
    );

    assert!(matches!(outcome, Outcome::ConnectionLost));
    assert!(outcome.is_fatal());
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_other_config_failures_stay_per_test() {
    let session = FakeSession::refusing_config(FaultKind::Scripting);
    let invocations = Arc::new(AtomicUsize::new(0));
    let spy = Arc::clone(&invocations);

    let outcome = BoundedCall::new(Duration::from_millis(200)).run(
        &session,
        "/t",
        move |_: &FakeSession, _: &str, _| {
            spy.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FakeError>(())
        },
    );

    assert_eq!(outcome.status(), "ERROR");
    assert!(!outcome.is_fatal());
    assert!(outcome.message().expect("ERROR carries a message").contains("config refused"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_task_errors_carry_their_diagnostics() {
    let session = FakeSession::working();

    let outcome = BoundedCall::new(Duration::from_secs(5)).run(
        &session,
        "/t",
        |_: &FakeSession, _: &str, _| {
            Err::<(), _>(FakeError(
                FaultKind::Scripting,
                "ReferenceError: add_completion_callback is not defined",
            ))
        },
    );

    assert_eq!(outcome.status(), "ERROR");
    assert!(!outcome.is_fatal());
    let message = outcome.message().expect("ERROR carries a message");
    assert!(message.contains("ReferenceError"));
}

#[test]
fn test_concurrent_calls_do_not_cross_talk() {
    let session = FakeSession::working();
    let mut handles = Vec::new();

    for i in 0..8u64 {
        let session = Arc::clone(&session);
        handles.push(thread::spawn(move || {
            let target = format!("/test-{}.html", i);
            let outcome = BoundedCall::new(Duration::from_secs(5)).run(
                &session,
                &target,
                move |_: &FakeSession, target: &str, _| {
                    thread::sleep(Duration::from_millis(10 * (i % 4)));
                    Ok::<_, FakeError>(target.to_string())
                },
            );
            assert_eq!(outcome.into_success(), Some(target));
        }));
    }

    for handle in handles {
        handle.join().expect("dispatch thread panicked");
    }
}

#[test]
#[should_panic(expected = "without reporting")]
fn test_panicking_tasks_are_a_harness_bug() {
    let session = FakeSession::working();
    let _ = BoundedCall::new(Duration::from_secs(5)).run(
        &session,
        "/t",
        |_: &FakeSession, _: &str, _| -> Result<(), FakeError> { panic!("task exploded") },
    );
}
