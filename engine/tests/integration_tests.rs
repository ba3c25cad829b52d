//! End-to-end scenarios through [`ReconciliationEngine`]:
//! resolve → submit → (immediate mint | pending → monitor → grant / timeout).
//!
//! The contract and verification service are nullables, and every test that
//! involves polling runs on a paused tokio clock so attempt counts are exact.

use futures_util::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use timetoken_engine::{
    CallbackBag, EngineConfig, EngineError, EngineEvent, ErrorKind, EventKind, MonitorExit,
    ReconciliationEngine, RequestOutcome, RequestState,
};
use timetoken_nullables::{NullAccessContract, NullVerificationService, RequestBehavior};
use timetoken_types::{AccessLevel, Subject, TxRef};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const CONTRACT: &str = "0x1111111111111111111111111111111111111111";
const ALICE: &str = "0xAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAa";
const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn subject(raw: &str) -> Subject {
    Subject::parse(raw).unwrap()
}

struct Harness {
    engine: ReconciliationEngine,
    contract: Arc<NullAccessContract>,
    records: Arc<NullVerificationService>,
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl Harness {
    fn new(max_poll_attempts: u32) -> Self {
        let config = EngineConfig {
            poll_interval_secs: 10,
            max_poll_attempts,
            subscription_id: 7,
            secrets_version: 1,
            ..EngineConfig::default()
        };
        let contract = Arc::new(NullAccessContract::new(subject(CONTRACT)));
        let records = Arc::new(NullVerificationService::new());
        let events = Arc::new(Mutex::new(Vec::new()));

        let record = |events: &Arc<Mutex<Vec<EngineEvent>>>| {
            let events = events.clone();
            move |e: &EngineEvent| events.lock().unwrap().push(e.clone())
        };
        let callbacks = CallbackBag::new()
            .on_start(record(&events))
            .on_submitted(record(&events))
            .on_completed(record(&events))
            .on_access_granted(record(&events))
            .on_error(record(&events));

        let engine =
            ReconciliationEngine::new(&config, contract.clone(), records.clone(), callbacks)
                .unwrap();
        Self {
            engine,
            contract,
            records,
            events,
        }
    }

    fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(EngineEvent::kind).collect()
    }
}

fn recorder() -> (
    Arc<Mutex<Vec<RequestOutcome>>>,
    impl FnOnce(RequestOutcome) + Send + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    (seen, move |outcome| s.lock().unwrap().push(outcome))
}

// ---------------------------------------------------------------------------
// 1. Immediate mint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn immediate_mint_completes_without_monitoring() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);
    h.contract.on_request(RequestBehavior::MintImmediately {
        level: AccessLevel::BASIC,
    });

    let outcome = h.engine.submit(ALICE).await.unwrap();

    assert_eq!(
        outcome,
        RequestOutcome::Submitted {
            tx: TxRef::new([1; 32]),
            pending: false,
            immediate_level: Some(AccessLevel::BASIC),
        }
    );
    assert_eq!(
        h.kinds(),
        vec![
            EventKind::Start,
            EventKind::Submitted,
            EventKind::Completed,
            EventKind::AccessGranted,
        ]
    );
    assert!(h.engine.in_flight(&subject(ALICE)).is_none());
    assert!(h.engine.monitored().is_empty());
    assert_eq!(h.engine.metrics().immediate_mints.get(), 1);

    let status = h.engine.resolve(ALICE).await.unwrap();
    assert!(status.has_access);
}

// ---------------------------------------------------------------------------
// 2. Delayed mint
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn delayed_mint_is_granted_on_third_poll() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);
    h.contract.on_request(RequestBehavior::MintAfterPolls {
        polls: 3,
        level: AccessLevel::BASIC,
    });

    let outcome = h.engine.submit(ALICE).await.unwrap();
    assert!(matches!(
        outcome,
        RequestOutcome::Submitted {
            pending: true,
            immediate_level: None,
            ..
        }
    ));
    let reads_before_watch = h.contract.has_access_calls();

    let (seen, on_terminal) = recorder();
    let handle = h.engine.watch(&subject(ALICE), on_terminal);

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(seen.lock().unwrap().is_empty(), "granted before the third poll");
    assert_eq!(
        h.engine.in_flight(&subject(ALICE)).unwrap().state,
        RequestState::Monitoring
    );

    let exit = handle.join().await;
    assert!(matches!(
        exit,
        MonitorExit::Terminal(RequestOutcome::Granted { .. })
    ));
    assert_eq!(h.contract.has_access_calls() - reads_before_watch, 3);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(h.engine.in_flight(&subject(ALICE)).is_none());
}

#[tokio::test(start_paused = true)]
async fn events_are_ordered_start_submitted_granted() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);
    h.contract.on_request(RequestBehavior::MintAfterPolls {
        polls: 1,
        level: AccessLevel::BASIC,
    });

    let outcome = h.engine.submit_and_watch(ALICE).await.unwrap();

    assert!(matches!(outcome, RequestOutcome::Granted { .. }));
    assert_eq!(
        h.kinds(),
        vec![
            EventKind::Start,
            EventKind::Submitted,
            EventKind::Completed,
            EventKind::AccessGranted,
        ]
    );
}

// ---------------------------------------------------------------------------
// 3. Guard
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrent_submissions_send_one_transaction() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);
    h.contract.set_request_delay(Duration::from_secs(5));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.submit(ALICE).await })
        })
        .collect();
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let submitted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::AlreadyInProgress(_))))
        .count();
    assert_eq!(submitted, 1);
    assert_eq!(rejected, 7);
    assert_eq!(h.contract.request_count(), 1);
    assert_eq!(h.engine.metrics().duplicate_submissions.get(), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_on_worker_threads() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);
    h.contract.set_request_delay(Duration::from_millis(50));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.submit(ALICE).await })
        })
        .collect();
    for task in tasks {
        let _ = task.await.unwrap();
    }

    assert_eq!(h.contract.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn different_subjects_proceed_in_parallel() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);
    h.records.approve(&subject(BOB), 1);
    h.contract.set_request_delay(Duration::from_secs(5));

    let (a, b) = tokio::join!(h.engine.submit(ALICE), h.engine.submit(BOB));

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(h.contract.request_count(), 2);
}

#[tokio::test]
async fn resubmission_while_pending_is_rejected() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);

    h.engine.submit(ALICE).await.unwrap();
    let err = h.engine.submit(&ALICE.to_lowercase()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyInProgress);
    assert_eq!(h.contract.request_count(), 1);
    assert_eq!(h.kinds().last(), Some(&EventKind::Error));
}

// ---------------------------------------------------------------------------
// 4. Monitoring bounds and cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn monitor_times_out_and_frees_the_subject() {
    let h = Harness::new(3);
    h.records.approve(&subject(ALICE), 1);

    let outcome = h.engine.submit_and_watch(ALICE).await.unwrap();

    assert_eq!(
        outcome,
        RequestOutcome::Failed {
            reason: EngineError::Timeout { attempts: 3 },
        }
    );
    let errors: Vec<_> = h
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(EngineEvent::error_kind)
        .collect();
    assert_eq!(errors, vec![ErrorKind::Timeout]);
    assert!(h.engine.in_flight(&subject(ALICE)).is_none());
    assert_eq!(h.engine.metrics().monitor_timeouts.get(), 1);

    // The user may try again after a timeout.
    assert!(h.engine.submit(ALICE).await.is_ok());
    assert_eq!(h.contract.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_monitor_never_calls_back() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);
    h.contract.on_request(RequestBehavior::MintAfterPolls {
        polls: 3,
        level: AccessLevel::BASIC,
    });
    h.engine.submit(ALICE).await.unwrap();

    let (seen, on_terminal) = recorder();
    let handle = h.engine.watch(&subject(ALICE), on_terminal);
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert!(h.engine.cancel(&subject(ALICE)));
    assert!(matches!(handle.join().await, MonitorExit::Cancelled { .. }));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(seen.lock().unwrap().is_empty());
    assert!(!h.kinds().contains(&EventKind::AccessGranted));

    // The transaction is still live, so the claim is kept.
    assert_eq!(
        h.engine.in_flight(&subject(ALICE)).unwrap().state,
        RequestState::AwaitingCallback
    );
    assert_eq!(
        h.engine.submit(ALICE).await.unwrap_err().kind(),
        ErrorKind::AlreadyInProgress
    );
}

#[tokio::test(start_paused = true)]
async fn watching_again_replaces_the_running_session() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);
    h.contract.on_request(RequestBehavior::MintAfterPolls {
        polls: 4,
        level: AccessLevel::BASIC,
    });
    h.engine.submit(ALICE).await.unwrap();

    let (first_seen, first) = recorder();
    let first_handle = h.engine.watch(&subject(ALICE), first);
    tokio::time::sleep(Duration::from_secs(15)).await;

    let (second_seen, second) = recorder();
    let second_handle = h.engine.watch(&subject(ALICE), second);

    assert!(matches!(
        first_handle.join().await,
        MonitorExit::Cancelled { .. }
    ));
    assert!(matches!(
        second_handle.join().await,
        MonitorExit::Terminal(RequestOutcome::Granted { .. })
    ));
    assert!(first_seen.lock().unwrap().is_empty());
    assert_eq!(second_seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_all_stops_every_session() {
    let h = Harness::new(30);
    h.records.approve(&subject(ALICE), 1);
    h.records.approve(&subject(BOB), 1);
    h.engine.submit(ALICE).await.unwrap();
    h.engine.submit(BOB).await.unwrap();

    let (_, a) = recorder();
    let (_, b) = recorder();
    let ha = h.engine.watch(&subject(ALICE), a);
    let hb = h.engine.watch(&subject(BOB), b);
    assert_eq!(h.engine.cancel_all(), 2);

    assert!(matches!(ha.join().await, MonitorExit::Cancelled { .. }));
    assert!(matches!(hb.join().await, MonitorExit::Cancelled { .. }));
    assert!(h.engine.monitored().is_empty());
}

// ---------------------------------------------------------------------------
// 5. Resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn on_chain_access_survives_verification_outage() {
    let h = Harness::new(30);
    h.contract.grant(&subject(ALICE), AccessLevel::new(2));
    h.records.set_failing(true);

    let status = h.engine.resolve(ALICE).await.unwrap();
    assert!(status.has_access);
    assert_eq!(status.level, AccessLevel::new(2));

    let outcome = h.engine.submit(ALICE).await.unwrap();
    assert!(matches!(outcome, RequestOutcome::Granted { .. }));
    assert_eq!(h.contract.request_count(), 0);
}

#[tokio::test]
async fn unavailable_contract_is_reported_not_hidden() {
    let h = Harness::new(30);
    h.contract.set_unavailable(true);
    h.records.approve(&subject(ALICE), 1);

    assert_eq!(
        h.engine.resolve(ALICE).await.unwrap_err().kind(),
        ErrorKind::ContractUnavailable
    );
    assert_eq!(
        h.engine.submit(ALICE).await.unwrap_err().kind(),
        ErrorKind::ContractUnavailable
    );
    assert!(h.engine.in_flight(&subject(ALICE)).is_none());
}

#[tokio::test]
async fn invalid_subject_is_rejected() {
    let h = Harness::new(30);
    assert_eq!(
        h.engine.resolve("0x12").await.unwrap_err().kind(),
        ErrorKind::InvalidSubject
    );
    assert_eq!(
        h.engine.submit("").await.unwrap_err().kind(),
        ErrorKind::InvalidSubject
    );
}
