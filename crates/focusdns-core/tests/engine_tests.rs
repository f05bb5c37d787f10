//! Integration tests for the blocking engine
//!
//! The engine runs on the in-memory tunnel; session and presentation
//! collaborators are mockall mocks.

use focusdns_core::engine::{AlwaysActive, EngineOptions, LogNotifier};
use focusdns_core::filter::{MatchKind, RuleSpec};
use focusdns_core::packet::{build_dns_query, inspect_dns_query, parse_ipv4_header};
use focusdns_core::tunnel::memory::MemoryProvider;
use focusdns_core::tunnel::TunnelError;
use focusdns_core::{BlockNotifier, BlockingEngine, EngineState, Error, SessionMonitor};
use mockall::mock;
use mockall::predicate::function;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mock! {
    pub Session {}

    impl SessionMonitor for Session {
        fn should_remain_active(&self) -> bool;
        fn record_interruption(&self, domain: &str);
    }
}

mock! {
    pub Notifier {}

    impl BlockNotifier for Notifier {
        fn show_blocked_notice(&self, domain: &str, reason: &str);
        fn blocking_unavailable(&self, reason: &str);
    }
}

const WAIT: Duration = Duration::from_secs(3);

fn fast_options() -> EngineOptions {
    EngineOptions {
        restart_backoff: Duration::from_millis(50),
        ..EngineOptions::default()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn video_rule() -> Vec<RuleSpec> {
    vec![RuleSpec::new("video.example", MatchKind::Exact)]
}

// ====== Packet Loop Tests ======

#[test]
fn test_blocked_query_spoofed_and_reported() {
    let provider = MemoryProvider::new();

    let mut session = MockSession::new();
    session
        .expect_record_interruption()
        .with(function(|d: &str| d == "video.example"))
        .times(1)
        .return_const(());
    session.expect_should_remain_active().return_const(true);
    let session = Arc::new(session);

    let mut notifier = MockNotifier::new();
    notifier
        .expect_show_blocked_notice()
        .withf(|domain, reason| domain == "video.example" && reason.contains("exact rule"))
        .times(1)
        .return_const(());
    let notifier = Arc::new(notifier);

    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .options(fast_options())
        .session_monitor(session.clone())
        .notifier(notifier.clone())
        .build()
        .unwrap();
    assert!(engine.start(video_rule()).unwrap().is_clean());
    assert_eq!(engine.state(), EngineState::Running);

    // Blocked: spoofed answer written instead of the query
    let query = build_dns_query("video.example", 0x1234).unwrap();
    provider.inject(query.clone());
    let response = provider.recv_written(WAIT).unwrap();
    assert_ne!(response, query);
    let ip = parse_ipv4_header(&response).unwrap();
    assert_eq!(ip.dst_addr(), parse_ipv4_header(&query).unwrap().src_addr());
    assert_eq!(&response[28..30], &[0x12, 0x34]);
    assert_eq!(&response[response.len() - 4..], &[127, 0, 0, 1]);

    // No subdomain rule: passes through unmodified
    let sub = build_dns_query("cdn.video.example", 2).unwrap();
    provider.inject(sub.clone());
    assert_eq!(provider.recv_written(WAIT).unwrap(), sub);

    drop(engine);
    // Mock expectations are verified when the last handles drop here
}

#[test]
fn test_non_dns_traffic_forwarded() {
    let provider = MemoryProvider::new();
    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .build()
        .unwrap();
    engine.start(video_rule()).unwrap();

    let garbage = vec![0x45, 0x00, 0x00, 0x05, 0xFF];
    provider.inject(garbage.clone());
    assert_eq!(provider.recv_written(WAIT).unwrap(), garbage);

    let stats = engine.stats();
    assert_eq!(stats.packets_read, 1);
    assert_eq!(stats.packets_forwarded, 1);
    assert_eq!(stats.queries_blocked, 0);
}

#[test]
fn test_packets_up_to_mtu_forwarded_whole() {
    let provider = MemoryProvider::new();
    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .options(EngineOptions {
            max_packet_size: 576,
            ..EngineOptions::default()
        })
        .build()
        .unwrap();
    engine.start(Vec::new()).unwrap();

    // TCP segment the size of a full 1500-byte MTU frame
    let mut packet = vec![0u8; 1400];
    packet[0] = 0x45;
    packet[2..4].copy_from_slice(&1400u16.to_be_bytes());
    packet[9] = 6;
    for (i, byte) in packet.iter_mut().enumerate().skip(20) {
        *byte = (i % 251) as u8;
    }

    provider.inject(packet.clone());
    assert_eq!(provider.recv_written(WAIT).unwrap(), packet);
}

#[test]
fn test_rule_update_applies_to_running_loop() {
    let provider = MemoryProvider::new();
    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .build()
        .unwrap();
    engine.start(video_rule()).unwrap();

    let query = build_dns_query("video.example", 5).unwrap();
    engine.update_rules(Vec::new());
    provider.inject(query.clone());
    assert_eq!(provider.recv_written(WAIT).unwrap(), query);

    engine.update_rules(video_rule());
    provider.inject(query.clone());
    let response = provider.recv_written(WAIT).unwrap();
    assert!(inspect_dns_query(&response).is_none());
}

// ====== Lifecycle Tests ======

#[test]
fn test_establish_failure_reports_unavailable() {
    let provider = MemoryProvider::new();
    provider.fail_next_establish(TunnelError::PermissionDenied("CAP_NET_ADMIN required".into()));

    let mut notifier = MockNotifier::new();
    notifier
        .expect_blocking_unavailable()
        .withf(|reason| reason.contains("permission denied"))
        .times(1)
        .return_const(());
    let notifier = Arc::new(notifier);

    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .notifier(notifier.clone())
        .build()
        .unwrap();

    let err = engine.start(video_rule()).unwrap_err();
    assert!(matches!(err, Error::Tunnel(TunnelError::PermissionDenied(_))));
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(engine.registry().is_empty());

    // A later start can still succeed
    assert!(engine.start(video_rule()).is_ok());
}

#[test]
fn test_stop_unblocks_pending_read() {
    let provider = MemoryProvider::new();
    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .build()
        .unwrap();
    engine.start(video_rule()).unwrap();
    thread::sleep(Duration::from_millis(30));

    let started = Instant::now();
    engine.stop();
    assert!(started.elapsed() < WAIT);
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(!engine.registry().is_blocked("video.example"));
    assert!(!provider.is_open());
}

#[test]
fn test_restart_after_io_error() {
    let provider = MemoryProvider::new();
    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .options(fast_options())
        .session_monitor(Arc::new(AlwaysActive))
        .notifier(Arc::new(LogNotifier))
        .build()
        .unwrap();
    engine.start(video_rule()).unwrap();

    provider.inject_read_error(io::ErrorKind::BrokenPipe);
    assert!(wait_until(|| engine.stats().restarts == 1));
    assert_eq!(provider.establish_count(), 2);
    assert_eq!(engine.state(), EngineState::Running);

    // Rules survive the restart
    let query = build_dns_query("video.example", 9).unwrap();
    provider.inject(query.clone());
    assert_ne!(provider.recv_written(WAIT).unwrap(), query);
}

#[test]
fn test_no_restart_when_session_over() {
    let provider = MemoryProvider::new();

    let mut session = MockSession::new();
    session.expect_should_remain_active().return_const(false);
    let session = Arc::new(session);

    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .options(fast_options())
        .session_monitor(session.clone())
        .build()
        .unwrap();
    engine.start(video_rule()).unwrap();

    provider.inject_read_error(io::ErrorKind::Other);
    assert!(wait_until(|| engine.state() == EngineState::Stopped
        && !engine.restart_pending()));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(provider.establish_count(), 1);
    assert_eq!(engine.stats().restarts, 0);
    assert!(engine.registry().is_empty());
}

#[test]
fn test_failed_restart_reports_unavailable() {
    let provider = MemoryProvider::new();

    let mut notifier = MockNotifier::new();
    notifier
        .expect_blocking_unavailable()
        .times(1)
        .return_const(());
    let notifier = Arc::new(notifier);

    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .options(fast_options())
        .notifier(notifier.clone())
        .build()
        .unwrap();
    engine.start(video_rule()).unwrap();

    provider.fail_next_establish(TunnelError::Establish("device busy".into()));
    provider.inject_read_error(io::ErrorKind::BrokenPipe);

    assert!(wait_until(|| engine.state() == EngineState::Stopped
        && !engine.restart_pending()));
    assert_eq!(provider.establish_count(), 1);
    assert!(engine.start(video_rule()).is_ok());
}

#[test]
fn test_stop_during_backoff_cancels_restart() {
    let provider = MemoryProvider::new();
    let engine = BlockingEngine::builder(Arc::new(provider.clone()))
        .options(EngineOptions {
            restart_backoff: Duration::from_millis(400),
            ..EngineOptions::default()
        })
        .build()
        .unwrap();
    engine.start(video_rule()).unwrap();

    provider.inject_read_error(io::ErrorKind::BrokenPipe);
    assert!(wait_until(|| engine.restart_pending()));
    engine.stop();

    assert!(wait_until(|| !engine.restart_pending()));
    assert_eq!(provider.establish_count(), 1);
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn test_concurrent_stop_calls() {
    let provider = MemoryProvider::new();
    let engine = Arc::new(
        BlockingEngine::builder(Arc::new(provider.clone()))
            .build()
            .unwrap(),
    );
    engine.start(video_rule()).unwrap();

    let stoppers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.stop())
        })
        .collect();
    for stopper in stoppers {
        stopper.join().unwrap();
    }
    assert_eq!(engine.state(), EngineState::Stopped);
}
