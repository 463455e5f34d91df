use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use super::fault::FaultSet;

/// Number of series cells in the pack (4S). Fixed for the life of the engine.
pub const CELL_COUNT: usize = 4;

/// Single cell reading as published to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub id: u8,
    /// Terminal voltage (V)
    #[validate(range(min = 0.0, max = 5.0))]
    pub voltage: f64,
    /// Cell temperature (°C)
    #[validate(range(min = -40.0, max = 150.0))]
    pub temperature: f64,
    /// Passive balancing flag (informational)
    pub is_balancing: bool,
}

impl Cell {
    pub fn new(id: u8, voltage: f64, temperature: f64) -> Self {
        Self {
            id,
            voltage,
            temperature,
            is_balancing: false,
        }
    }
}

/// Pack snapshot published once per tick.
///
/// Invariants maintained by the engine:
/// - `pack_voltage` is the sum of cell voltages
/// - `pack_temperature` is the maximum cell temperature
/// - `soc` stays within [0, 100]
/// - `contactors_closed` is false whenever `faults` is non-empty, unless the
///   safety bypass is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PackState {
    /// Simulation time (s)
    pub timestamp: f64,
    pub cells: [Cell; CELL_COUNT],
    pub pack_voltage: f64,
    /// Signed pack current (A): positive charging, negative discharging
    pub pack_current: f64,
    pub pack_temperature: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub soc: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub fan_duty: f64,
    pub faults: FaultSet,
    pub contactors_closed: bool,
}

impl PackState {
    /// Full schema check applied to outbound telemetry.
    ///
    /// Covers the derived range rules, every cell, cell ids, and that all
    /// numeric fields are finite (range rules alone let NaN through).
    pub fn validate_snapshot(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        for cell in &self.cells {
            cell.validate()?;
        }

        let mut errors = ValidationErrors::new();
        for (idx, cell) in self.cells.iter().enumerate() {
            if usize::from(cell.id) != idx {
                errors.add("cells", ValidationError::new("cell_id_mismatch"));
            }
            if !cell.voltage.is_finite() || !cell.temperature.is_finite() {
                errors.add("cells", ValidationError::new("non_finite"));
            }
        }
        let scalars = [
            ("timestamp", self.timestamp),
            ("packVoltage", self.pack_voltage),
            ("packCurrent", self.pack_current),
            ("packTemperature", self.pack_temperature),
            ("soc", self.soc),
            ("fanDuty", self.fan_duty),
        ];
        for (field, value) in scalars {
            if !value.is_finite() {
                errors.add(field, ValidationError::new("non_finite"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
