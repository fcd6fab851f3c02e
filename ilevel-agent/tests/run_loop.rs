//! The tokio-driven loop: real timers, external refresh requests, shutdown

use ilevel_agent::session::REQUEST_TIMEOUT;
use ilevel_agent::{Credentials, PollSettings, Poller, SessionManager, TankRegistry, TokioScheduler};
use ilevel_devkit::test_utils::{PASSWORD, USERNAME};
use ilevel_devkit::{IlevelPayloads, IlevelStub, RecordingSink};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const CLIENT_ID: u64 = 88;

fn settings(initial_ms: u64, refresh_ms: u64) -> PollSettings {
    PollSettings {
        retry_delay: Duration::from_millis(refresh_ms),
        refresh_interval: Duration::from_millis(refresh_ms),
        initial_delay: Duration::from_millis(initial_ms),
    }
}

fn poller_for(stub: &IlevelStub, sink: &RecordingSink, settings: PollSettings) -> Poller<TokioScheduler, RecordingSink> {
    let sessions = SessionManager::new(Credentials::new(USERNAME, PASSWORD), &stub.base_url(), REQUEST_TIMEOUT).unwrap();
    Poller::new(sessions, TankRegistry::new(sink.clone()), TokioScheduler::new(), settings)
}

async fn wait_until(condition: impl Fn() -> bool) {
    while !condition() {
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_loop_stops_after_halt_without_trigger_source() {
    let mut stub = IlevelStub::start().await;
    stub.login_invalid(1).await;

    let sink = RecordingSink::new();
    let poller = poller_for(&stub, &sink, settings(10, 60_000));

    let (tx, rx) = mpsc::channel(1);
    drop(tx);

    timeout(Duration::from_secs(10), poller.run(rx))
        .await
        .expect("loop should stop once halted with no trigger source");

    assert!(sink.calls().is_empty());
    stub.verify_expectations().await.unwrap();
}

#[tokio::test]
async fn test_external_trigger_starts_cycle_early() {
    let mut stub = IlevelStub::start().await;
    stub.login_ok(CLIENT_ID, 1).await;
    let body = IlevelPayloads::tank_list(&[IlevelPayloads::tank(5, "Basement", 72)]);
    stub.tanks(CLIENT_ID, &body, 1).await;

    // Timers far in the future: only the trigger can start a cycle
    let sink = RecordingSink::new();
    let poller = poller_for(&stub, &sink, settings(3_600_000, 3_600_000));
    let (tx, rx) = mpsc::channel(4);

    let driver = async {
        tx.send(()).await.unwrap();
        wait_until(|| !sink.registered_ids().is_empty()).await;
    };

    let finished = timeout(Duration::from_secs(10), async {
        tokio::select! {
            _ = poller.run(rx) => panic!("loop stopped while a refresh timer was armed"),
            _ = driver => {}
        }
    })
    .await;

    assert!(finished.is_ok(), "trigger never produced a cycle");
    assert_eq!(sink.registered_ids(), vec![5]);
    stub.verify_expectations().await.unwrap();
}

#[tokio::test]
async fn test_refresh_timer_rearms_cycle_after_cycle() {
    let mut stub = IlevelStub::start().await;
    stub.login_ok(CLIENT_ID, 3).await;
    let body = IlevelPayloads::tank_list(&[IlevelPayloads::tank(9, "Shed", 41)]);
    stub.tanks(CLIENT_ID, &body, 3).await;

    let sink = RecordingSink::new();
    let poller = poller_for(&stub, &sink, settings(10, 200));
    let (_tx, rx) = mpsc::channel(1);

    let finished = timeout(Duration::from_secs(10), async {
        tokio::select! {
            _ = poller.run(rx) => panic!("loop stopped while a refresh timer was armed"),
            _ = wait_until(|| sink.calls().len() >= 3) => {}
        }
    })
    .await;

    assert!(finished.is_ok(), "refresh timer did not keep cycling");
    assert_eq!(sink.registered_ids(), vec![9]);
    assert_eq!(sink.updated_ids(), vec![9, 9]);
    stub.verify_expectations().await.unwrap();
}
