//! Session lifecycle and host protocol, driven through the public handle.

use std::time::Duration;

use bms_hil::channel::{EngineMessage, HostMessage, LogLevel};
use bms_hil::config::Config;
use bms_hil::domain::{ControlPatch, FaultDirective};
use bms_hil::session::{EngineEvents, Session, SessionHandle};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> Config {
    let mut cfg = Config::default();
    cfg.simulation.tick_ms = 10;
    cfg.simulation.max_step_ms = 100;
    cfg
}

/// Receive until `pred` matches, returning everything seen up to and
/// including the match.
async fn collect_until<F>(events: &mut EngineEvents, mut pred: F) -> Vec<EngineMessage>
where
    F: FnMut(&EngineMessage) -> bool,
{
    let mut seen = Vec::new();
    timeout(WAIT, async {
        while let Some(msg) = events.recv().await {
            let done = pred(&msg);
            seen.push(msg);
            if done {
                return;
            }
        }
        panic!("event stream closed early");
    })
    .await
    .expect("timed out waiting for engine message");
    seen
}

/// Everything that arrives within `window`.
async fn drain_for(events: &mut EngineEvents, window: Duration) -> Vec<EngineMessage> {
    let mut seen = Vec::new();
    let _ = timeout(window, async {
        while let Some(msg) = events.recv().await {
            seen.push(msg);
        }
    })
    .await;
    seen
}

fn is_log(msg: &EngineMessage, level: LogLevel, needle: &str) -> bool {
    matches!(msg, EngineMessage::Log { message, level: l } if *l == level && message.contains(needle))
}

async fn started(cfg: Config) -> (SessionHandle, EngineEvents) {
    let (handle, mut events) = Session::start(cfg);
    collect_until(&mut events, |m| matches!(m, EngineMessage::Ready)).await;
    (handle, events)
}

fn patch(f: impl FnOnce(&mut ControlPatch)) -> HostMessage {
    let mut p = ControlPatch::default();
    f(&mut p);
    HostMessage::UpdateControl(p)
}

#[tokio::test]
async fn ready_then_ticks() {
    let (handle, mut events) = started(fast_config()).await;

    let seen = collect_until(&mut events, |m| matches!(m, EngineMessage::Tick(_))).await;
    let EngineMessage::Tick(state) = seen.last().unwrap() else {
        unreachable!()
    };
    assert!(state.contactors_closed);
    assert!(state.faults.is_empty());

    handle.stop().await;
}

#[tokio::test]
async fn ticks_are_in_order() {
    let (handle, mut events) = started(fast_config()).await;

    let mut stamps = Vec::new();
    collect_until(&mut events, |m| {
        if let EngineMessage::Tick(s) = m {
            stamps.push(s.timestamp);
        }
        stamps.len() >= 5
    })
    .await;
    assert!(stamps.windows(2).all(|w| w[1] > w[0]), "{stamps:?}");

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_loop_advances_at_most_max_step() {
    let cfg = fast_config();
    let max_step = cfg.simulation.max_step_ms as f64 / 1000.0;
    let (handle, mut events) = started(cfg).await;
    collect_until(&mut events, |m| matches!(m, EngineMessage::Tick(_))).await;

    // The loop is not polled while the clock jumps: a 5 s stall
    tokio::time::advance(Duration::from_secs(5)).await;

    let mut stamps = Vec::new();
    collect_until(&mut events, |m| {
        if let EngineMessage::Tick(s) = m {
            stamps.push(s.timestamp);
        }
        stamps.len() >= 4
    })
    .await;

    let deltas: Vec<f64> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(deltas.iter().all(|d| *d <= max_step + 1e-9), "{deltas:?}");
    assert!(
        deltas.iter().any(|d| (*d - max_step).abs() < 1e-9),
        "stall should be absorbed as one capped step: {deltas:?}"
    );

    handle.stop().await;
}

#[tokio::test]
async fn startup_failure_is_terminal() {
    let mut cfg = fast_config();
    cfg.pack.capacity_ah = -1.0;
    let (handle, mut events) = Session::start(cfg);

    let first = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(is_log(&first, LogLevel::Error, "startup failed"), "{first:?}");

    handle.send(HostMessage::Init).unwrap();
    let rest = drain_for(&mut events, Duration::from_millis(200)).await;
    assert!(rest.iter().all(|m| !matches!(m, EngineMessage::Ready | EngineMessage::Tick(_))));

    handle.stop().await;
}

#[tokio::test]
async fn waits_for_init_without_auto_start() {
    let mut cfg = fast_config();
    cfg.simulation.auto_start = false;
    let (handle, mut events) = Session::start(cfg);

    let early = drain_for(&mut events, Duration::from_millis(100)).await;
    assert!(early.is_empty(), "{early:?}");

    handle.send(HostMessage::Init).unwrap();
    collect_until(&mut events, |m| matches!(m, EngineMessage::Ready)).await;

    handle.stop().await;
}

#[tokio::test]
async fn invalid_control_is_dropped_with_warning() {
    let (handle, mut events) = started(fast_config()).await;

    handle.send(patch(|p| p.fan_duty = Some(150.0))).unwrap();
    collect_until(&mut events, |m| is_log(m, LogLevel::Warn, "Control update dropped")).await;

    let seen = collect_until(&mut events, |m| matches!(m, EngineMessage::Tick(_))).await;
    let EngineMessage::Tick(state) = seen.last().unwrap() else {
        unreachable!()
    };
    assert_eq!(state.fan_duty, 0.0);

    handle.stop().await;
}

#[tokio::test]
async fn control_update_reaches_next_tick() {
    let (handle, mut events) = started(fast_config()).await;

    handle
        .send(patch(|p| {
            p.charger_amps = Some(10.0);
            p.fan_duty = Some(40.0);
        }))
        .unwrap();
    collect_until(&mut events, |m| {
        matches!(m, EngineMessage::Tick(s) if s.pack_current == 10.0 && s.fan_duty == 40.0)
    })
    .await;

    handle.stop().await;
}

#[tokio::test]
async fn injected_fault_is_logged_and_latched() {
    let (handle, mut events) = started(fast_config()).await;

    handle
        .send(patch(|p| p.inject_fault = Some(FaultDirective::Overvoltage)))
        .unwrap();
    let seen = collect_until(&mut events, |m| {
        matches!(m, EngineMessage::Tick(s) if !s.contactors_closed)
    })
    .await;

    assert!(seen.iter().any(|m| is_log(m, LogLevel::Error, "FAULT: OVERVOLTAGE")));
    assert!(seen.iter().any(|m| is_log(m, LogLevel::Error, "Contactors OPEN")));

    // Reset while the injected reading is still high is rejected, then the
    // reading relaxes and a later reset is accepted.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle
        .send(patch(|p| p.inject_fault = Some(FaultDirective::Reset)))
        .unwrap();
    collect_until(&mut events, |m| {
        is_log(m, LogLevel::Warn, "Reset rejected") || is_log(m, LogLevel::Success, "Reset accepted")
    })
    .await;

    handle.stop().await;
}

#[tokio::test]
async fn completed_run_sends_report_then_complete() {
    let (handle, mut events) = started(fast_config()).await;

    handle.run_tests().unwrap();
    let seen = collect_until(&mut events, |m| matches!(m, EngineMessage::TestComplete)).await;

    let results = seen
        .iter()
        .filter(|m| matches!(m, EngineMessage::TestResult { .. }))
        .count();
    assert_eq!(results, 13);

    let report_at = seen
        .iter()
        .position(|m| matches!(m, EngineMessage::TestReport(_)))
        .expect("report sent");
    assert_eq!(report_at, seen.len() - 2);
    let EngineMessage::TestReport(report) = &seen[report_at] else {
        unreachable!()
    };
    assert_eq!(report.summary.total, 13);
    assert_eq!(report.summary.failed, 0);

    handle.stop().await;
}

#[tokio::test]
async fn second_run_request_is_ignored() {
    let mut cfg = fast_config();
    cfg.harness.scenario_pacing_ms = 20;
    let (handle, mut events) = started(cfg).await;

    handle.run_tests().unwrap();
    handle.run_tests().unwrap();

    let seen = collect_until(&mut events, |m| matches!(m, EngineMessage::TestComplete)).await;
    assert!(seen.iter().any(|m| is_log(m, LogLevel::Warn, "already in progress")));
    let results = seen
        .iter()
        .filter(|m| matches!(m, EngineMessage::TestResult { .. }))
        .count();
    assert_eq!(results, 13);

    let after = drain_for(&mut events, Duration::from_millis(400)).await;
    assert!(!after.iter().any(|m| matches!(m, EngineMessage::TestComplete)));

    handle.stop().await;
}

#[tokio::test]
async fn watchdog_releases_stalled_run() {
    let mut cfg = fast_config();
    cfg.harness.scenario_pacing_ms = 500;
    cfg.harness.watchdog_timeout_ms = 100;
    let (handle, mut events) = started(cfg).await;

    handle.run_tests().unwrap();
    let seen = collect_until(&mut events, |m| matches!(m, EngineMessage::TestComplete)).await;

    assert!(seen.iter().any(|m| is_log(m, LogLevel::Warn, "Watchdog")));
    assert!(!seen.iter().any(|m| matches!(m, EngineMessage::TestReport(_))));

    // Lock released: a new request is accepted
    handle.run_tests().unwrap();
    collect_until(&mut events, |m| is_log(m, LogLevel::Info, "Starting test run")).await;

    handle.stop().await;
}

#[tokio::test]
async fn sabotaged_session_fails_safety_scenarios() {
    let (handle, mut events) = started(fast_config()).await;

    handle
        .send(patch(|p| p.inject_fault = Some(FaultDirective::Sabotage)))
        .unwrap();
    collect_until(&mut events, |m| is_log(m, LogLevel::Warn, "SABOTAGE")).await;

    handle.run_tests().unwrap();
    let seen = collect_until(&mut events, |m| matches!(m, EngineMessage::TestComplete)).await;
    let report = seen
        .iter()
        .find_map(|m| match m {
            EngineMessage::TestReport(r) => Some(r),
            _ => None,
        })
        .expect("report sent");
    assert!(report.summary.failed > 0);
    assert!(report.failures().any(|r| r.id == "TC-SAFE-001"));

    handle.stop().await;
}

#[tokio::test]
async fn stop_closes_the_session() {
    let (handle, _events) = started(fast_config()).await;

    handle.stop().await;
    assert!(handle.send(HostMessage::RunTests).is_err());

    // Idempotent
    handle.stop().await;
}
