//! # Test Harness
//!
//! Deterministic self-test of the safety state machine. Every scenario runs
//! on its own fresh [`PackEngine`](crate::controller::PackEngine), never the
//! live one, so a run cannot disturb the simulation the host is watching.
//!
//! The session owns the run lock and the [`Watchdog`]; this module only knows
//! how to execute the battery and build the report.

pub mod report;
pub mod scenarios;
pub mod watchdog;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::EngineMessage;
use crate::config::{HarnessConfig, PackConfig, SafetyConfig};

pub use report::{HarnessReport, ReportSummary, ScenarioCategory, TestCaseResult, TestVerdict};
pub use scenarios::{battery, Scenario, ScenarioEnv, ScenarioFailure};
pub use watchdog::Watchdog;

#[derive(Debug, Clone)]
pub struct TestHarness {
    pack: PackConfig,
    safety: SafetyConfig,
    config: HarnessConfig,
}

impl TestHarness {
    pub fn new(pack: PackConfig, safety: SafetyConfig, config: HarnessConfig) -> Self {
        Self {
            pack,
            safety,
            config,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Execute the full battery, streaming one `TEST_RESULT` per scenario.
    ///
    /// `bypass` mirrors the live session: when set, every scenario engine
    /// starts with the safety bypass active.
    pub async fn run(self, bypass: bool, events: UnboundedSender<EngineMessage>) -> HarnessReport {
        let run_id = Uuid::new_v4();
        let mut report = HarnessReport::new(run_id, Utc::now());
        let env = ScenarioEnv {
            pack: self.pack,
            safety: self.safety,
            bypass,
            dt: self.config.step(),
        };
        let pacing = self.config.scenario_pacing();
        let scenarios = battery();

        info!(%run_id, scenarios = scenarios.len(), bypass, "harness run started");

        for (i, scenario) in scenarios.iter().enumerate() {
            if i > 0 && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            } else {
                tokio::task::yield_now().await;
            }

            let result = scenario.execute(&env);
            if result.passed() {
                info!(id = %result.id, "scenario passed");
            } else {
                warn!(id = %result.id, message = %result.message, "scenario failed");
            }

            let _ = events.send(EngineMessage::TestResult {
                name: format!("{}: {}", result.id, result.name),
                passed: result.passed(),
                message: result.message.clone(),
            });
            report.record(result);
        }

        info!(
            %run_id,
            passed = report.summary.passed,
            failed = report.summary.failed,
            pass_rate = %report.summary.pass_rate,
            "harness run finished"
        );
        report
    }
}
