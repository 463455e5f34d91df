//! # Fault Monitor
//!
//! Rule engine evaluating cell and pack readings against the safety envelope:
//! - Cell overvoltage / undervoltage
//! - Cell over-temperature
//! - Current spike (short circuit)
//!
//! The fault set is recomputed from scratch on every tick. Nothing is
//! accumulated here; the contactor latch is what remembers a past fault.

use serde::{Deserialize, Serialize};

use crate::config::SafetyConfig;
use crate::domain::{Cell, FaultCode, FaultSet, CELL_COUNT};

/// One threshold violation with the reading that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultViolation {
    pub code: FaultCode,
    /// Offending cell, `None` for pack-level rules
    pub cell: Option<u8>,
    pub value: f64,
    pub limit: f64,
    pub message: String,
}

impl FaultViolation {
    fn new(code: FaultCode, cell: Option<u8>, value: f64, limit: f64, message: String) -> Self {
        Self {
            code,
            cell,
            value,
            limit,
            message,
        }
    }
}

/// Result of evaluating one tick's readings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultEvaluation {
    pub faults: FaultSet,
    pub violations: Vec<FaultViolation>,
}

impl FaultEvaluation {
    pub fn is_clear(&self) -> bool {
        self.faults.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FaultMonitor {
    config: SafetyConfig,
}

impl FaultMonitor {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Evaluate every rule against the readings.
    ///
    /// Thresholds are strict: a cell sitting exactly at a limit is not a fault.
    pub fn evaluate(&self, cells: &[Cell; CELL_COUNT], measured_current_a: f64) -> FaultEvaluation {
        let mut violations = Vec::new();

        for cell in cells {
            if cell.voltage > self.config.overvoltage_v {
                violations.push(FaultViolation::new(
                    FaultCode::Overvoltage,
                    Some(cell.id),
                    cell.voltage,
                    self.config.overvoltage_v,
                    format!(
                        "Cell {} voltage {:.3}V above maximum {:.2}V",
                        cell.id, cell.voltage, self.config.overvoltage_v
                    ),
                ));
            }

            if cell.voltage < self.config.undervoltage_v {
                violations.push(FaultViolation::new(
                    FaultCode::Undervoltage,
                    Some(cell.id),
                    cell.voltage,
                    self.config.undervoltage_v,
                    format!(
                        "Cell {} voltage {:.3}V below minimum {:.2}V",
                        cell.id, cell.voltage, self.config.undervoltage_v
                    ),
                ));
            }

            if cell.temperature > self.config.overtemp_c {
                violations.push(FaultViolation::new(
                    FaultCode::Overtemp,
                    Some(cell.id),
                    cell.temperature,
                    self.config.overtemp_c,
                    format!(
                        "Cell {} temperature {:.1}°C above maximum {:.1}°C",
                        cell.id, cell.temperature, self.config.overtemp_c
                    ),
                ));
            }
        }

        if measured_current_a.abs() > self.config.short_circuit_a {
            violations.push(FaultViolation::new(
                FaultCode::ShortCircuit,
                None,
                measured_current_a,
                self.config.short_circuit_a,
                format!(
                    "Pack current {:.1}A exceeds spike threshold {:.1}A",
                    measured_current_a.abs(),
                    self.config.short_circuit_a
                ),
            ));
        }

        FaultEvaluation {
            faults: violations.iter().map(|v| v.code).collect(),
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn nominal_cells() -> [Cell; CELL_COUNT] {
        std::array::from_fn(|i| Cell::new(i as u8, 3.7, 25.0))
    }

    fn monitor() -> FaultMonitor {
        FaultMonitor::new(SafetyConfig::default())
    }

    #[test]
    fn test_no_faults_with_nominal_readings() {
        let eval = monitor().evaluate(&nominal_cells(), 10.0);
        assert!(eval.is_clear());
        assert!(eval.violations.is_empty());
    }

    #[test]
    fn test_overvoltage_detection() {
        let mut cells = nominal_cells();
        cells[0].voltage = 4.3;

        let eval = monitor().evaluate(&cells, 0.0);
        assert!(eval.faults.contains(FaultCode::Overvoltage));
        assert_eq!(eval.violations[0].cell, Some(0));
        assert_eq!(eval.violations[0].limit, 4.25);
    }

    #[test]
    fn test_undervoltage_detection() {
        let mut cells = nominal_cells();
        cells[1].voltage = 2.3;

        let eval = monitor().evaluate(&cells, 0.0);
        assert!(eval.faults.contains(FaultCode::Undervoltage));
        assert_eq!(eval.faults.len(), 1);
    }

    #[test]
    fn test_overtemp_detection() {
        let mut cells = nominal_cells();
        cells[3].temperature = 75.0;

        let eval = monitor().evaluate(&cells, 0.0);
        assert!(eval.faults.contains(FaultCode::Overtemp));
    }

    #[rstest]
    #[case(149.0, false)]
    #[case(150.0, false)]
    #[case(151.0, true)]
    #[case(-151.0, true)]
    fn test_short_circuit_threshold(#[case] current: f64, #[case] expect_fault: bool) {
        let eval = monitor().evaluate(&nominal_cells(), current);
        assert_eq!(eval.faults.contains(FaultCode::ShortCircuit), expect_fault);
    }

    #[rstest]
    #[case(4.24, false)]
    #[case(4.25, false)]
    #[case(4.26, true)]
    fn test_overvoltage_boundary(#[case] voltage: f64, #[case] expect_fault: bool) {
        let mut cells = nominal_cells();
        cells[0].voltage = voltage;

        let eval = monitor().evaluate(&cells, 0.0);
        assert_eq!(eval.faults.contains(FaultCode::Overvoltage), expect_fault);
    }

    #[test]
    fn test_multiple_cells_same_fault_reported_once_in_set() {
        let mut cells = nominal_cells();
        cells[0].voltage = 4.4;
        cells[2].voltage = 4.5;

        let eval = monitor().evaluate(&cells, 0.0);
        assert_eq!(eval.faults.len(), 1);
        assert_eq!(eval.violations.len(), 2);
    }

    #[test]
    fn test_configurable_undervoltage_threshold() {
        let monitor = FaultMonitor::new(SafetyConfig {
            undervoltage_v: 3.0,
            ..Default::default()
        });
        let mut cells = nominal_cells();
        cells[2].voltage = 2.9;

        assert!(monitor.evaluate(&cells, 0.0).faults.contains(FaultCode::Undervoltage));
    }
}
