//! # Cell Model
//!
//! Per-cell electrical and thermal integrator for the 4S pack.
//!
//! ## Physics Model
//!
//! All cells are in series and carry the same applied current `I`
//! (positive = charging). Each cell integrates its own charge fraction with
//! its own capacity, so capacity mismatch makes cells drift apart while
//! charging:
//!
//! dq/dt = I / (C_cell * 3600)
//!
//! The terminal voltage relaxes toward the loaded open-circuit voltage with a
//! first-order time constant τ:
//!
//! V_target = OCV(q) + I * R_internal
//! V(t + dt) = V + (V_target - V) * (1 - e^(-dt/τ))
//!
//! OCV is linear between `ocv_empty_v` (q = 0) and `ocv_full_v` (q = 1).
//! Because the voltage relaxes rather than being overwritten, a reading
//! injected by a fault directive or the test harness stays visible for the
//! tick it was injected in and decays out afterwards.
//!
//! Temperature follows a lumped model with fan-assisted cooling:
//!
//! dT/dt = I² * R * k_heat - (T - T_ambient) * k_cool * (1 + fan/100)
//!
//! ## Balancing
//!
//! While charging, a cell whose voltage leads the mean of the other three by
//! more than `balance_threshold_v` is flagged as balancing. The flag is
//! informational only: no bleed current is modelled.

use std::time::Duration;

use crate::config::PackConfig;
use crate::domain::{Cell, CELL_COUNT};

pub const CELL_VOLTAGE_MIN_V: f64 = 0.0;
pub const CELL_VOLTAGE_MAX_V: f64 = 5.0;
pub const CELL_TEMP_MIN_C: f64 = -40.0;
pub const CELL_TEMP_MAX_C: f64 = 150.0;

/// Cell physics integrator. Holds the hidden per-cell charge state that the
/// published `Cell` readings are derived from.
#[derive(Debug, Clone)]
pub struct CellModel {
    config: PackConfig,
    charge: [f64; CELL_COUNT],
}

impl CellModel {
    /// Create a model whose charge state matches the configured initial
    /// cell voltages at rest.
    pub fn new(config: PackConfig) -> Self {
        let mut charge = [0.0; CELL_COUNT];
        for (q, v) in charge.iter_mut().zip(config.initial_cell_voltages_v.iter()) {
            *q = Self::charge_at_rest(&config, *v);
        }
        Self { config, charge }
    }

    /// Initial cell readings at ambient temperature.
    pub fn initial_cells(&self) -> [Cell; CELL_COUNT] {
        std::array::from_fn(|i| {
            Cell::new(
                i as u8,
                self.config.initial_cell_voltages_v[i],
                self.config.ambient_temp_c,
            )
        })
    }

    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    /// Hidden charge fraction (0..=1) of cell `index`.
    pub fn charge(&self, index: usize) -> f64 {
        self.charge[index]
    }

    /// Open-circuit voltage for a charge fraction.
    pub fn ocv(&self, charge: f64) -> f64 {
        let span = self.config.ocv_full_v - self.config.ocv_empty_v;
        self.config.ocv_empty_v + span * charge.clamp(0.0, 1.0)
    }

    fn charge_at_rest(config: &PackConfig, voltage_v: f64) -> f64 {
        let span = config.ocv_full_v - config.ocv_empty_v;
        ((voltage_v - config.ocv_empty_v) / span).clamp(0.0, 1.0)
    }

    /// Advance every cell by `delta` under the applied pack current.
    ///
    /// # Arguments
    /// * `cells` - Readings to update in place
    /// * `current_a` - Applied pack current (positive = charging); 0 when the
    ///   contactors are open
    /// * `fan_duty` - Cooling fan duty (0-100 %)
    /// * `delta` - Time step duration
    pub fn step(
        &mut self,
        cells: &mut [Cell; CELL_COUNT],
        current_a: f64,
        fan_duty: f64,
        delta: Duration,
    ) {
        let dt = delta.as_secs_f64();
        if dt <= 0.0 {
            return;
        }

        let cfg = &self.config;
        let alpha = 1.0 - (-dt / cfg.relaxation_tau_s).exp();
        let heat_rate = current_a.powi(2) * cfg.internal_resistance_ohm * cfg.heat_gain_c_per_j;
        let cooling_scale = cfg.cooling_coeff_per_s * (1.0 + fan_duty.clamp(0.0, 100.0) / 100.0);

        for (i, cell) in cells.iter_mut().enumerate() {
            let capacity_ah = cfg.capacity_ah * cfg.cell_capacity_scale[i];
            self.charge[i] = (self.charge[i] + current_a * dt / (capacity_ah * 3600.0)).clamp(0.0, 1.0);

            let span = cfg.ocv_full_v - cfg.ocv_empty_v;
            let target_v = cfg.ocv_empty_v + span * self.charge[i] + current_a * cfg.internal_resistance_ohm;
            cell.voltage = (cell.voltage + (target_v - cell.voltage) * alpha)
                .clamp(CELL_VOLTAGE_MIN_V, CELL_VOLTAGE_MAX_V);

            let temp_rate = heat_rate - (cell.temperature - cfg.ambient_temp_c) * cooling_scale;
            cell.temperature =
                (cell.temperature + temp_rate * dt).clamp(CELL_TEMP_MIN_C, CELL_TEMP_MAX_C);
        }

        update_balancing(cells, current_a > 0.0, cfg.balance_threshold_v);
    }
}

/// Raise the balancing flag on cells leading their peers while charging.
pub fn update_balancing(cells: &mut [Cell; CELL_COUNT], charging: bool, threshold_v: f64) {
    if !charging {
        for cell in cells.iter_mut() {
            cell.is_balancing = false;
        }
        return;
    }

    let total: f64 = cells.iter().map(|c| c.voltage).sum();
    let peers = (CELL_COUNT - 1) as f64;
    for cell in cells.iter_mut() {
        let peer_mean = (total - cell.voltage) / peers;
        cell.is_balancing = cell.voltage - peer_mean > threshold_v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Duration = Duration::from_millis(100);

    fn model() -> (CellModel, [Cell; CELL_COUNT]) {
        let model = CellModel::new(PackConfig::default());
        let cells = model.initial_cells();
        (model, cells)
    }

    #[test]
    fn test_initial_cells_match_config() {
        let (model, cells) = model();
        for (i, cell) in cells.iter().enumerate() {
            assert_eq!(cell.id as usize, i);
            assert_eq!(cell.voltage, model.config().initial_cell_voltages_v[i]);
            assert_eq!(cell.temperature, model.config().ambient_temp_c);
            assert!(!cell.is_balancing);
        }
        assert!((model.ocv(model.charge(0)) - 3.70).abs() < 1e-9);
    }

    #[test]
    fn test_charging_raises_voltage() {
        let (mut model, mut cells) = model();
        let before: Vec<f64> = cells.iter().map(|c| c.voltage).collect();

        for _ in 0..100 {
            model.step(&mut cells, 10.0, 0.0, DT);
        }

        for (cell, v0) in cells.iter().zip(before) {
            assert!(cell.voltage > v0, "cell {} did not rise", cell.id);
        }
    }

    #[test]
    fn test_discharging_lowers_voltage() {
        let (mut model, mut cells) = model();
        let before: Vec<f64> = cells.iter().map(|c| c.voltage).collect();

        for _ in 0..100 {
            model.step(&mut cells, -20.0, 0.0, DT);
        }

        for (cell, v0) in cells.iter().zip(before) {
            assert!(cell.voltage < v0);
        }
    }

    #[test]
    fn test_injected_voltage_relaxes_toward_ocv() {
        let (mut model, mut cells) = model();
        cells[0].voltage = 4.5;

        model.step(&mut cells, 0.0, 0.0, DT);
        assert!(cells[0].voltage > 4.25, "one tick should not erase the injection");

        for _ in 0..200 {
            model.step(&mut cells, 0.0, 0.0, DT);
        }
        assert!((cells[0].voltage - 3.70).abs() < 0.01);
    }

    #[test]
    fn test_heat_generation_under_load() {
        let (mut model, mut cells) = model();
        let ambient = model.config().ambient_temp_c;

        for _ in 0..600 {
            model.step(&mut cells, -100.0, 0.0, DT);
        }

        assert!(cells.iter().all(|c| c.temperature > ambient));
    }

    #[test]
    fn test_fan_increases_cooling() {
        let (mut still_model, mut still) = model();
        let (mut fan_model, mut fanned) = model();
        for cells in [&mut still, &mut fanned] {
            for cell in cells.iter_mut() {
                cell.temperature = 70.0;
            }
        }

        for _ in 0..50 {
            still_model.step(&mut still, 0.0, 0.0, DT);
            fan_model.step(&mut fanned, 0.0, 100.0, DT);
        }

        assert!(fanned[0].temperature < still[0].temperature);
        assert!(still[0].temperature < 70.0);
    }

    #[test]
    fn test_thermal_equilibrium_at_rest() {
        let (mut model, mut cells) = model();
        for _ in 0..1000 {
            model.step(&mut cells, 0.0, 0.0, DT);
        }
        let ambient = model.config().ambient_temp_c;
        assert!(cells.iter().all(|c| (c.temperature - ambient).abs() < 0.01));
    }

    #[test]
    fn test_readings_stay_clamped() {
        let (mut model, mut cells) = model();
        for _ in 0..100 {
            model.step(&mut cells, 5000.0, 0.0, Duration::from_secs(1));
        }
        for cell in &cells {
            assert!(cell.voltage <= CELL_VOLTAGE_MAX_V);
            assert!(cell.temperature <= CELL_TEMP_MAX_C);
        }
    }

    #[test]
    fn test_zero_step_is_noop() {
        let (mut model, mut cells) = model();
        let before = cells.clone();
        model.step(&mut cells, 50.0, 0.0, Duration::ZERO);
        assert_eq!(cells, before);
    }

    #[test]
    fn test_balancing_flags_leading_cell_only_while_charging() {
        let mut cells = [
            Cell::new(0, 4.10, 25.0),
            Cell::new(1, 3.90, 25.0),
            Cell::new(2, 3.90, 25.0),
            Cell::new(3, 3.90, 25.0),
        ];

        update_balancing(&mut cells, true, 0.05);
        assert!(cells[0].is_balancing);
        assert!(cells[1..].iter().all(|c| !c.is_balancing));

        update_balancing(&mut cells, false, 0.05);
        assert!(cells.iter().all(|c| !c.is_balancing));
    }
}
