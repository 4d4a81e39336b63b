//! Dispatch cycles and fallback against emulated engines on an in-memory bus

use hookbus_common::{
    Blackboard, Error, EventChannel, MemoryBus, StatusCode, StepVerdict, TestRecord,
    WaitTimeout,
};
use futures::future::join_all;
use hookbus_dispatch::testing::LoopbackEngine;
use hookbus_dispatch::{Candidates, DispatchCoordinator, FallbackPolicy, MORE_ENGINES};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn bus() -> Arc<MemoryBus> {
    Arc::new(MemoryBus::default())
}

fn step() -> TestRecord {
    TestRecord::new("T,LoginWindow,OKButton,Click", ",").with_source("Login.sdd", 7)
}

fn quick(bus: &Arc<MemoryBus>) -> DispatchCoordinator {
    DispatchCoordinator::new(bus.clone()).with_timeout(WaitTimeout::from_secs(5))
}

fn engines(prefixes: &[&str]) -> Candidates {
    Candidates::Explicit(prefixes.iter().map(|p| p.to_string()).collect())
}

#[tokio::test]
async fn test_single_cycle_round_trip() {
    let bus = bus();
    let engine = LoopbackEngine::new(bus.clone(), "SAFS/TID").spawn();

    let result = quick(&bus).dispatch("SAFS/TID", &step()).await.unwrap();
    assert_eq!(result.status_code, StatusCode::NO_SCRIPT_FAILURE);
    assert_eq!(result.input_record, step().input_record);
    assert_eq!(result.source_id, "Login.sdd");
    assert_eq!(result.line_number, 7);
    assert_eq!(engine.cycles(), 1);
}

#[tokio::test]
async fn test_repeated_cycles_on_one_engine() {
    let bus = bus();
    let engine = LoopbackEngine::new(bus.clone(), "SAFS/TID").spawn();
    let coordinator = quick(&bus);

    for line in 1..=5 {
        let record = step().with_source("Login.sdd", line);
        let result = coordinator.dispatch("SAFS/TID", &record).await.unwrap();
        assert_eq!(result.line_number, line);
    }
    assert_eq!(engine.cycles(), 5);
}

#[tokio::test]
async fn test_all_engines_decline() {
    let bus = bus();
    let prefixes = ["SAFS/A", "SAFS/B", "SAFS/C"];
    let handles: Vec<_> = prefixes
        .iter()
        .map(|p| LoopbackEngine::new(bus.clone(), *p).declining().spawn())
        .collect();

    let policy = FallbackPolicy::new(quick(&bus));
    let outcome = policy.run(engines(&prefixes), &step()).await.unwrap();

    assert_eq!(outcome.cycles, 3);
    assert_eq!(outcome.engine, "SAFS/C");
    assert_eq!(outcome.status_code(), StatusCode::NOT_EXECUTED);
    assert_eq!(outcome.verdict(), StepVerdict::NotExecuted);
    assert!(!outcome.handled());
    assert!(outcome.diagnostics.is_empty());
    assert!(handles.iter().all(|h| h.cycles() == 1));
}

#[tokio::test]
async fn test_chain_stops_at_first_handler() {
    let bus = bus();
    let a = LoopbackEngine::new(bus.clone(), "SAFS/A").declining().spawn();
    let b = LoopbackEngine::new(bus.clone(), "SAFS/B")
        .responding(StatusCode::GENERAL_SCRIPT_FAILURE)
        .spawn();
    let c = LoopbackEngine::new(bus.clone(), "SAFS/C").spawn();

    let policy = FallbackPolicy::new(quick(&bus));
    let outcome = policy
        .run(engines(&["SAFS/A", "SAFS/B", "SAFS/C"]), &step())
        .await
        .unwrap();

    assert_eq!(outcome.cycles, 2);
    assert_eq!(outcome.engine, "SAFS/B");
    assert_eq!(outcome.verdict(), StepVerdict::Failed);
    assert!(outcome.handled());
    assert_eq!((a.cycles(), b.cycles(), c.cycles()), (1, 1, 0));
}

/// Engine that declines one record and reports the status info it was handed.
fn declining_once(bus: &Arc<MemoryBus>, prefix: &'static str) -> tokio::task::JoinHandle<String> {
    let bus = bus.clone();
    tokio::spawn(async move {
        let event = |suffix: &str| format!("{}{}", prefix, suffix);
        bus.post(&event("Ready")).await.unwrap();
        bus.wait(&event("Dispatch"), WaitTimeout::from_secs(5)).await.unwrap();
        bus.reset(&event("Ready")).await.unwrap();
        let info = bus.get(&format!("{}statusinfo", prefix)).await.unwrap();
        bus.post(&event("Results")).await.unwrap();
        bus.wait(&event("Done"), WaitTimeout::from_secs(5)).await.unwrap();
        info
    })
}

#[tokio::test]
async fn test_more_engines_tag_reaches_all_but_last() {
    let bus = bus();
    let a = declining_once(&bus, "SAFS/A");
    let b = declining_once(&bus, "SAFS/B");

    let policy = FallbackPolicy::new(quick(&bus));
    let outcome = policy.run(engines(&["SAFS/A", "SAFS/B"]), &step()).await.unwrap();
    assert_eq!(outcome.cycles, 2);

    assert!(a.await.unwrap().ends_with(MORE_ENGINES));
    assert!(!b.await.unwrap().contains(MORE_ENGINES));
}

#[tokio::test]
async fn test_silent_engine_times_out_and_is_released() {
    let bus = bus();
    let engine = LoopbackEngine::new(bus.clone(), "SAFS/TID").hanging().spawn();
    let coordinator =
        DispatchCoordinator::new(bus.clone()).with_timeout(WaitTimeout::from_millis(100));

    let started = Instant::now();
    let err = coordinator.dispatch("SAFS/TID", &step()).await.unwrap_err();

    assert!(matches!(err, Error::Timeout { ref event, .. } if event == "SAFS/TIDResults"));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(bus.is_posted("SAFS/TIDDone").await.unwrap());
    assert_eq!(engine.cycles(), 1);
}

#[tokio::test]
async fn test_timeout_moves_fallback_on() {
    let bus = bus();
    let _a = LoopbackEngine::new(bus.clone(), "SAFS/A").hanging().spawn();
    let _b = LoopbackEngine::new(bus.clone(), "SAFS/B").spawn();

    let coordinator =
        DispatchCoordinator::new(bus.clone()).with_timeout(WaitTimeout::from_millis(100));
    let outcome = FallbackPolicy::new(coordinator)
        .run(engines(&["SAFS/A", "SAFS/B"]), &step())
        .await
        .unwrap();

    assert_eq!(outcome.engine, "SAFS/B");
    assert_eq!(outcome.cycles, 2);
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].engine, "SAFS/A");
    assert_eq!(outcome.diagnostics[0].kind, "Timeout");
}

#[tokio::test]
async fn test_corrupt_status_is_malformed() {
    let bus = bus();
    let _engine = LoopbackEngine::new(bus.clone(), "SAFS/Eng1").corrupting().spawn();

    let err = quick(&bus).dispatch("SAFS/Eng1", &step()).await.unwrap_err();
    match err {
        Error::MalformedField { key, value } => {
            assert_eq!(key, "SAFS/Eng1statuscode");
            assert_eq!(value, "abc");
        }
        other => panic!("unexpected error: {}", other),
    }
    // Released by Done, the engine comes back well before its own Done timeout
    bus.wait("SAFS/Eng1Ready", WaitTimeout::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_no_engine_reachable() {
    let bus = bus();
    let _a = LoopbackEngine::new(bus.clone(), "SAFS/A").corrupting().spawn();
    bus.post("SAFS/BShutdown").await.unwrap();

    let err = FallbackPolicy::new(quick(&bus))
        .run(engines(&["SAFS/A", "SAFS/B"]), &step())
        .await
        .unwrap_err();

    match err {
        Error::NoEngineReachable { attempted, diagnostics } => {
            assert_eq!(attempted, vec!["SAFS/A", "SAFS/B"]);
            let kinds: Vec<_> = diagnostics.iter().map(|d| d.kind.as_str()).collect();
            assert_eq!(kinds, vec!["MalformedField", "EngineShutdown"]);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_discovery_feeds_fallback() {
    let bus = bus();
    let down = LoopbackEngine::new(bus.clone(), "SAFS/DROID").spawn();
    let _up = LoopbackEngine::new(bus.clone(), "SAFS/RobotJ").spawn();
    bus.wait("SAFS/DROIDReady", WaitTimeout::from_secs(5)).await.unwrap();
    bus.wait("SAFS/RobotJReady", WaitTimeout::from_secs(5)).await.unwrap();
    down.shutdown().await.unwrap();

    let outcome = FallbackPolicy::new(quick(&bus))
        .run(Candidates::Discover, &step())
        .await
        .unwrap();
    assert_eq!(outcome.engine, "SAFS/RobotJ");
    assert_eq!(outcome.cycles, 1);
}

#[tokio::test]
async fn test_broker_loss_aborts_chain() {
    let bus = bus();
    let a = LoopbackEngine::new(bus.clone(), "SAFS/A").declining().spawn();
    let b = LoopbackEngine::new(bus.clone(), "SAFS/B").spawn();
    bus.wait("SAFS/AReady", WaitTimeout::from_secs(5)).await.unwrap();
    bus.set_offline(true);

    let err = FallbackPolicy::new(quick(&bus))
        .run(engines(&["SAFS/A", "SAFS/B"]), &step())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BrokerUnavailable(_)));
    assert_eq!(b.cycles(), 0);
    drop(a);
}

#[tokio::test]
async fn test_engines_run_in_parallel() {
    let bus = bus();
    let delay = Duration::from_millis(300);
    let prefixes = ["SAFS/A", "SAFS/B", "SAFS/C"];
    let _handles: Vec<_> = prefixes
        .iter()
        .map(|p| LoopbackEngine::new(bus.clone(), *p).with_delay(delay).spawn())
        .collect();
    let coordinator = quick(&bus);
    let record = step();

    let started = Instant::now();
    let results = join_all(prefixes.iter().map(|p| coordinator.dispatch(p, &record))).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(started.elapsed() < delay * 2);
}

#[tokio::test]
async fn test_same_engine_is_serialised() {
    let bus = bus();
    let engine = LoopbackEngine::new(bus.clone(), "SAFS/A")
        .with_delay(Duration::from_millis(50))
        .spawn();
    let coordinator = quick(&bus);

    let first = step().with_source("Login.sdd", 1);
    let second = step().with_source("Login.sdd", 2);
    let (r1, r2) = tokio::join!(
        coordinator.dispatch("SAFS/A", &first),
        coordinator.dispatch("SAFS/A", &second),
    );
    let mut lines = vec![r1.unwrap().line_number, r2.unwrap().line_number];
    lines.sort();
    assert_eq!(lines, vec![1, 2]);
    assert_eq!(engine.cycles(), 2);
}

#[tokio::test]
async fn test_shared_record_root() {
    let bus = bus();
    let _engine = LoopbackEngine::new(bus.clone(), "SAFS/TID")
        .with_root("SAFS/HOOK/")
        .responding(StatusCode::SCRIPT_WARNING)
        .spawn();
    let coordinator = quick(&bus).with_trd_root("SAFS/HOOK/");

    let result = coordinator.dispatch("SAFS/TID", &step()).await.unwrap();
    assert_eq!(result.status_code.verdict(), StepVerdict::Warning);
    assert_eq!(bus.get("SAFS/HOOK/statuscode").await.unwrap(), "-2");
    assert!(bus.blackboard.keys_with_prefix("SAFS/TID").is_empty());
}
