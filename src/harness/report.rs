use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TestVerdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScenarioCategory {
    Safety,
    Functional,
    Boundary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub id: String,
    pub name: String,
    pub category: ScenarioCategory,
    pub result: TestVerdict,
    pub message: String,
    /// Wall-clock time spent in the scenario body
    pub duration_ms: f64,
}

impl TestCaseResult {
    pub fn passed(&self) -> bool {
        self.result == TestVerdict::Pass
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage with one decimal (`"92.3%"`), `"N/A"` for an empty run
    pub pass_rate: String,
}

impl ReportSummary {
    pub fn from_results(results: &[TestCaseResult]) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed()).count();
        Self {
            total,
            passed,
            failed: total - passed,
            pass_rate: format_pass_rate(passed, total),
        }
    }
}

/// Aggregate report of one harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub tests: Vec<TestCaseResult>,
    pub summary: ReportSummary,
}

impl HarnessReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            tests: Vec::new(),
            summary: ReportSummary::from_results(&[]),
        }
    }

    pub fn record(&mut self, result: TestCaseResult) {
        self.tests.push(result);
        self.summary = ReportSummary::from_results(&self.tests);
    }

    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestCaseResult> {
        self.tests.iter().filter(|r| !r.passed())
    }
}

fn format_pass_rate(passed: usize, total: usize) -> String {
    if total == 0 {
        return "N/A".to_string();
    }
    format!("{:.1}%", passed as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, verdict: TestVerdict) -> TestCaseResult {
        TestCaseResult {
            id: id.to_string(),
            name: format!("case {id}"),
            category: ScenarioCategory::Safety,
            result: verdict,
            message: String::new(),
            duration_ms: 0.5,
        }
    }

    #[test]
    fn test_empty_report_summary() {
        let report = HarnessReport::new(Uuid::new_v4(), Utc::now());
        assert_eq!(report.summary.total, 0);
        assert_eq!(report.summary.pass_rate, "N/A");
        assert!(report.all_passed());
    }

    #[test]
    fn test_summary_counts_and_rate() {
        let mut report = HarnessReport::new(Uuid::new_v4(), Utc::now());
        for i in 0..12 {
            report.record(result(&format!("T{i}"), TestVerdict::Pass));
        }
        report.record(result("T12", TestVerdict::Fail));

        assert_eq!(report.summary.total, 13);
        assert_eq!(report.summary.passed, 12);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.pass_rate, "92.3%");
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_report_serialization_shape() {
        let mut report = HarnessReport::new(Uuid::nil(), Utc::now());
        report.record(result("TC-SAFE-001", TestVerdict::Pass));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["tests"][0]["result"], "PASS");
        assert_eq!(value["tests"][0]["category"], "safety");
        assert_eq!(value["tests"][0]["duration_ms"], 0.5);
        assert_eq!(value["summary"]["pass_rate"], "100.0%");
        assert!(value.get("run_id").is_some());
        assert!(value.get("started_at").is_some());
    }
}
