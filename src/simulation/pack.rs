use std::time::Duration;

use crate::domain::{Cell, ControlInput, CELL_COUNT};

/// Pack-level readings derived from the cells and the latest control input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackReadings {
    pub pack_voltage: f64,
    pub pack_current: f64,
    pub pack_temperature: f64,
    pub soc: f64,
}

/// Combines the four cells into pack voltage, max temperature, current and SOC.
#[derive(Debug, Clone)]
pub struct PackAggregator {
    capacity_ah: f64,
}

impl PackAggregator {
    pub fn new(capacity_ah: f64) -> Self {
        Self { capacity_ah }
    }

    pub fn pack_voltage(cells: &[Cell; CELL_COUNT]) -> f64 {
        cells.iter().map(|c| c.voltage).sum()
    }

    pub fn pack_temperature(cells: &[Cell; CELL_COUNT]) -> f64 {
        cells
            .iter()
            .map(|c| c.temperature)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Coulomb-count `soc` (%) forward by `applied_current_a` over `delta`.
    pub fn advance_soc(&self, soc: f64, applied_current_a: f64, delta: Duration) -> f64 {
        let delta_pct = applied_current_a * delta.as_secs_f64() / (self.capacity_ah * 3600.0) * 100.0;
        (soc + delta_pct).clamp(0.0, 100.0)
    }

    /// Derive pack readings.
    ///
    /// `pack_current` always reports the commanded `charger - load`; SOC only
    /// moves by the current actually applied (0 with contactors open).
    pub fn aggregate(
        &self,
        cells: &[Cell; CELL_COUNT],
        control: &ControlInput,
        soc: f64,
        applied_current_a: f64,
        delta: Duration,
    ) -> PackReadings {
        PackReadings {
            pack_voltage: Self::pack_voltage(cells),
            pack_current: control.net_current(),
            pack_temperature: Self::pack_temperature(cells),
            soc: self.advance_soc(soc, applied_current_a, delta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cells(voltages: [f64; CELL_COUNT], temps: [f64; CELL_COUNT]) -> [Cell; CELL_COUNT] {
        std::array::from_fn(|i| Cell::new(i as u8, voltages[i], temps[i]))
    }

    #[test]
    fn test_aggregate_sum_max_and_current() {
        let agg = PackAggregator::new(2.5);
        let cells = cells([3.7, 3.72, 3.69, 3.71], [25.0, 31.0, 24.0, 26.0]);
        let control = ControlInput {
            load_amps: 4.0,
            charger_amps: 10.0,
            ..Default::default()
        };

        let readings = agg.aggregate(&cells, &control, 50.0, 6.0, Duration::ZERO);

        assert!((readings.pack_voltage - 14.82).abs() < 1e-9);
        assert_eq!(readings.pack_temperature, 31.0);
        assert_eq!(readings.pack_current, 6.0);
        assert_eq!(readings.soc, 50.0);
    }

    #[test]
    fn test_soc_coulomb_counting() {
        let agg = PackAggregator::new(2.5);
        // 2.5 A for one hour moves a 2.5 Ah pack by 100 %
        let soc = agg.advance_soc(0.0, 2.5, Duration::from_secs(1800));
        assert!((soc - 50.0).abs() < 1e-9);

        let soc = agg.advance_soc(50.0, -2.5, Duration::from_secs(900));
        assert!((soc - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_soc_ignores_commanded_current_when_not_applied() {
        let agg = PackAggregator::new(2.5);
        let cells = cells([3.7; CELL_COUNT], [25.0; CELL_COUNT]);
        let control = ControlInput {
            charger_amps: 10.0,
            ..Default::default()
        };

        let readings = agg.aggregate(&cells, &control, 42.0, 0.0, Duration::from_secs(60));
        assert_eq!(readings.pack_current, 10.0);
        assert_eq!(readings.soc, 42.0);
    }

    proptest! {
        #[test]
        fn prop_soc_stays_clamped(
            soc in 0.0f64..=100.0,
            current in -500.0f64..500.0,
            millis in 0u64..3_600_000,
        ) {
            let agg = PackAggregator::new(2.5);
            let next = agg.advance_soc(soc, current, Duration::from_millis(millis));
            prop_assert!((0.0..=100.0).contains(&next));
            if current >= 0.0 {
                prop_assert!(next >= soc);
            } else {
                prop_assert!(next <= soc);
            }
        }

        #[test]
        fn prop_pack_voltage_is_sum_and_temp_is_max(
            v in proptest::array::uniform4(0.0f64..5.0),
            t in proptest::array::uniform4(-40.0f64..150.0),
        ) {
            let cells = cells(v, t);
            let sum: f64 = v.iter().sum();
            let max = t.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!((PackAggregator::pack_voltage(&cells) - sum).abs() < 1e-9);
            prop_assert_eq!(PackAggregator::pack_temperature(&cells), max);
        }
    }
}
