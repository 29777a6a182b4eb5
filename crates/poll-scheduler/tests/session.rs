//! End-to-end session tests against the loopback transport

use poll_scheduler::{
    DispatchMode, PollSession, PolledRequest, Registry, SchedulerConfig, SignalId,
};
use std::collections::HashMap;
use storage::NullResultSink;
use uds_protocol::{CapacityMap, LoopbackConfig, ResponseCode, UdsTransport};

const SERVER_A: u16 = 0x1781;
const SERVER_B: u16 = 0x1782;
const TESTER: u16 = 0x0E80;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn registry(ids: &[(u16, u16)], interval_min: f64, interval_max: f64) -> Registry {
    let requests: Vec<PolledRequest> = ids
        .iter()
        .map(|&(server_id, did)| {
            PolledRequest::new(
                SignalId {
                    server_id,
                    tester_id: TESTER,
                    did,
                    payload_length: 4,
                },
                interval_min,
                interval_max,
            )
        })
        .collect();
    Registry::new(requests)
}

fn loopback(ids: &[(u16, u16)]) -> LoopbackConfig {
    LoopbackConfig {
        payload_lengths: ids.iter().map(|&(server, did)| ((server, did), 4)).collect(),
        default_payload_len: 4,
        ..Default::default()
    }
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        pool_size: 2,
        queue_capacity: 20,
        slot_timeout_ms: 300,
        session_duration_secs: 2,
        interval_min_secs: 0.1,
        interval_max_secs: 5.0,
        tick_ms: 20,
        read_timeout_ms: 100,
        calibration_iterations: 5,
        dispatch_mode: DispatchMode::Serial,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_batch_round_trip_matches_every_request() {
    init_tracing();
    let ids = [
        (SERVER_A, 0x0001),
        (SERVER_A, 0x0002),
        (SERVER_A, 0x0003),
        (SERVER_A, 0x0004),
        (SERVER_B, 0x0010),
        (SERVER_B, 0x0011),
    ];
    let transport = UdsTransport::loopback(loopback(&ids));
    let mut session = PollSession::new(
        transport,
        registry(&ids, 0.1, 5.0),
        fast_config(),
        CapacityMap::new(),
        Box::new(NullResultSink),
    )
    .unwrap();

    session.run().await.unwrap();

    let snapshot = session.stats().snapshot();
    assert!(snapshot.resolved >= ids.len() as u64, "{snapshot:?}");
    assert_eq!(snapshot.timed_out, 0, "{snapshot:?}");
    for shared in session.registry().requests() {
        let request = shared.lock().unwrap();
        assert!(
            !request.history.is_empty(),
            "request {} never got a sample",
            request.id.unique_id()
        );
        assert!(!request.blacklisted);
    }
}

#[tokio::test]
async fn test_silent_did_times_out_and_backs_off() {
    init_tracing();
    let ids = [(SERVER_A, 0x0001), (SERVER_A, 0x0002)];
    let mut config = loopback(&ids);
    config.silent.insert((SERVER_A, 0x0002));
    let transport = UdsTransport::loopback(config);

    let mut session = PollSession::new(
        transport,
        registry(&ids, 0.1, 5.0),
        fast_config(),
        CapacityMap::new(),
        Box::new(NullResultSink),
    )
    .unwrap();

    session.run().await.unwrap();

    let snapshot = session.stats().snapshot();
    assert!(snapshot.resolved >= 1, "{snapshot:?}");
    assert!(snapshot.timed_out >= 1, "{snapshot:?}");

    let requests = session.registry().requests();
    let responsive = requests[0].lock().unwrap();
    let silent = requests[1].lock().unwrap();
    assert!(!responsive.history.is_empty());
    assert!(silent.history.is_empty());
    assert_eq!(silent.interval.current(), silent.interval.maximum());
}

#[tokio::test]
async fn test_structural_mismatch_requeues_batch() {
    init_tracing();
    let ids = [(SERVER_A, 0x0001), (SERVER_A, 0x0002)];
    let mut config = loopback(&ids);
    config
        .negative
        .insert((SERVER_A, 0x0002), ResponseCode::RequestOutOfRange);
    let transport = UdsTransport::loopback(config);

    let mut scheduler_config = fast_config();
    scheduler_config.session_duration_secs = 1;
    let mut session = PollSession::new(
        transport,
        registry(&ids, 0.1, 5.0),
        scheduler_config,
        CapacityMap::new(),
        Box::new(NullResultSink),
    )
    .unwrap();

    session.run().await.unwrap();

    // the poisoned batch is cleared and requeued instead of timing out
    let snapshot = session.stats().snapshot();
    assert!(snapshot.requeued >= 2, "{snapshot:?}");
    assert_eq!(snapshot.resolved, 0, "{snapshot:?}");
}

#[tokio::test]
async fn test_calibration_measures_and_blacklists() {
    init_tracing();
    let ids = [(SERVER_A, 0x0001), (SERVER_A, 0x0002), (SERVER_A, 0x0003)];
    let mut config = loopback(&ids);
    config.silent.insert((SERVER_A, 0x0003));
    let transport = UdsTransport::loopback(config);

    let mut session = PollSession::new(
        transport,
        registry(&ids, 0.1, 5.0),
        fast_config(),
        CapacityMap::new(),
        Box::new(NullResultSink),
    )
    .unwrap();

    session.calibrate().await.unwrap();

    let requests = session.registry().requests();
    for shared in &requests[..2] {
        let request = shared.lock().unwrap();
        assert!(!request.blacklisted);
        assert_eq!(request.history.len(), 5);
        // generated payloads vary, so the feature law engages
        assert!(request.features.feature_sum() > 0.0);
        assert!(request.interval.current() < request.interval.maximum());
    }
    let silent = requests[2].lock().unwrap();
    assert!(silent.blacklisted);
    assert!(silent.history.is_empty());
    assert_eq!(silent.interval.current(), silent.interval.maximum());
}

#[tokio::test]
async fn test_stop_handle_ends_session_early() {
    init_tracing();
    let ids = [(SERVER_A, 0x0001)];
    let transport = UdsTransport::loopback(loopback(&ids));

    let mut config = fast_config();
    config.session_duration_secs = 30;
    let mut session = PollSession::new(
        transport,
        registry(&ids, 0.1, 5.0),
        config,
        CapacityMap::new(),
        Box::new(NullResultSink),
    )
    .unwrap();

    let stop = session.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        stop.stop();
    });

    let started = std::time::Instant::now();
    session.run().await.unwrap();
    assert!(
        started.elapsed() < std::time::Duration::from_secs(5),
        "session did not stop promptly"
    );
}

#[tokio::test]
async fn test_parallel_mode_polls_whole_registry() {
    init_tracing();
    let ids: Vec<(u16, u16)> = (0..8).map(|i| (SERVER_A, 0x0100 + i)).collect();
    let transport = UdsTransport::loopback(loopback(&ids));

    let mut config = fast_config();
    config.dispatch_mode = DispatchMode::Parallel;
    let mut session = PollSession::new(
        transport,
        registry(&ids, 0.1, 5.0),
        config,
        CapacityMap::new(),
        Box::new(NullResultSink),
    )
    .unwrap();

    session.run().await.unwrap();

    let snapshot = session.stats().snapshot();
    assert!(snapshot.resolved >= ids.len() as u64, "{snapshot:?}");
}

#[tokio::test]
async fn test_results_reach_the_sink() {
    init_tracing();
    use std::sync::{Arc, Mutex};
    use storage::{ResultRecord, ResultSink, StorageError};

    #[derive(Default)]
    struct RecordingSink {
        rows: Arc<Mutex<Vec<ResultRecord>>>,
    }
    impl ResultSink for RecordingSink {
        fn append(&mut self, record: &ResultRecord) -> Result<(), StorageError> {
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    let rows = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink { rows: rows.clone() };

    let ids = [(SERVER_A, 0x0001), (SERVER_A, 0x0002)];
    let transport = UdsTransport::loopback(loopback(&ids));
    let mut session = PollSession::new(
        transport,
        registry(&ids, 0.1, 5.0),
        fast_config(),
        CapacityMap::new(),
        Box::new(sink),
    )
    .unwrap();

    session.run().await.unwrap();

    let rows = rows.lock().unwrap();
    assert!(rows.len() >= 2);
    let unique_ids: HashMap<&str, usize> =
        rows.iter()
            .fold(HashMap::new(), |mut acc, row| {
                *acc.entry(row.unique_id.as_str()).or_insert(0) += 1;
                acc
            });
    assert!(unique_ids.contains_key("1781_1"));
    assert!(unique_ids.contains_key("1781_2"));
    assert!(rows.iter().all(|row| !row.timed_out));
}
