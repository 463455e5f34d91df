use std::time::Duration;
use thiserror::Error;

use super::contactor::{ContactorController, ContactorEvent};
use super::fault_monitor::{FaultEvaluation, FaultMonitor};
use crate::config::{PackConfig, SafetyConfig};
use crate::domain::{Cell, ControlInput, FaultDirective, FaultSet, PackState, CELL_COUNT};
use crate::simulation::{CellModel, PackAggregator};

/// Cell 0 voltage written by the `OVERVOLTAGE` directive (V)
pub const INJECTED_OVERVOLTAGE_V: f64 = 4.5;
/// Cell 0 voltage written by the `UNDERVOLTAGE` directive (V)
pub const INJECTED_UNDERVOLTAGE_V: f64 = 2.3;
/// Cell 0 temperature written by the `OVERTEMP` directive (°C)
pub const INJECTED_OVERTEMP_C: f64 = 80.0;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid pack configuration: {0}")]
    InvalidPackConfig(String),
    #[error("invalid safety configuration: {0}")]
    InvalidSafetyConfig(String),
    #[error("non-finite {field} produced by tick")]
    NonFinite { field: &'static str },
    #[error("cell index {0} out of range")]
    CellIndex(usize),
}

/// Result of one pipeline pass.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub state: PackState,
    pub evaluation: FaultEvaluation,
    pub contactor: ContactorEvent,
    /// Directive consumed by this pass, if any
    pub directive: Option<FaultDirective>,
}

/// Direct state injection used by the test harness.
///
/// Only physical readings can be injected; the contactor bit and fault set
/// stay owned by the latch and the monitor.
#[derive(Debug, Clone, Default)]
pub struct StateInjection {
    cells: Option<[Cell; CELL_COUNT]>,
    cell_voltages: Vec<(usize, f64)>,
    cell_temperatures: Vec<(usize, f64)>,
    pack_current: Option<f64>,
    soc: Option<f64>,
}

impl StateInjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cells(mut self, cells: [Cell; CELL_COUNT]) -> Self {
        self.cells = Some(cells);
        self
    }

    pub fn cell_voltage(mut self, index: usize, voltage: f64) -> Self {
        self.cell_voltages.push((index, voltage));
        self
    }

    pub fn cell_temperature(mut self, index: usize, temperature: f64) -> Self {
        self.cell_temperatures.push((index, temperature));
        self
    }

    pub fn pack_current(mut self, current: f64) -> Self {
        self.pack_current = Some(current);
        self
    }

    pub fn soc(mut self, soc: f64) -> Self {
        self.soc = Some(soc);
        self
    }
}

/// Simulation and safety pipeline:
/// CellModel -> PackAggregator -> FaultMonitor -> ContactorController.
///
/// Owns the current `PackState`. Every pass works on copies and commits only
/// when the whole pass succeeded, so a failed tick leaves the previous state
/// untouched.
#[derive(Debug, Clone)]
pub struct PackEngine {
    cell_model: CellModel,
    aggregator: PackAggregator,
    monitor: FaultMonitor,
    contactor: ContactorController,
    state: PackState,
}

impl PackEngine {
    /// Build the engine at its baseline: contactors closed, no faults, SOC at
    /// the configured starting value.
    pub fn new(pack: PackConfig, safety: SafetyConfig) -> Result<Self, EngineError> {
        pack.validate().map_err(EngineError::InvalidPackConfig)?;
        safety.validate().map_err(EngineError::InvalidSafetyConfig)?;

        let aggregator = PackAggregator::new(pack.capacity_ah);
        let initial_soc = pack.initial_soc_percent;
        let cell_model = CellModel::new(pack);
        let cells = cell_model.initial_cells();

        let state = PackState {
            timestamp: 0.0,
            pack_voltage: PackAggregator::pack_voltage(&cells),
            pack_temperature: PackAggregator::pack_temperature(&cells),
            cells,
            pack_current: 0.0,
            soc: initial_soc,
            fan_duty: 0.0,
            faults: FaultSet::empty(),
            contactors_closed: true,
        };

        Ok(Self {
            cell_model,
            aggregator,
            monitor: FaultMonitor::new(safety),
            contactor: ContactorController::new(),
            state,
        })
    }

    pub fn state(&self) -> &PackState {
        &self.state
    }

    /// Immutable copy for publishing.
    pub fn snapshot(&self) -> PackState {
        self.state.clone()
    }

    pub fn bypass_active(&self) -> bool {
        self.contactor.bypass_active()
    }

    pub fn set_bypass(&mut self, active: bool) {
        self.contactor.set_bypass(active);
    }

    /// Full physics tick driven by the latest control input.
    pub fn tick(
        &mut self,
        control: &ControlInput,
        delta: Duration,
    ) -> Result<TickOutcome, EngineError> {
        let dt = delta.as_secs_f64();
        let directive = control.inject_fault;
        let (reset_requested, bypass) = self.resolve_directive(directive);

        // Open contactors isolate the pack: nothing flows through the cells.
        let applied_current = if self.contactor.is_closed() {
            control.net_current()
        } else {
            0.0
        };

        let mut cell_model = self.cell_model.clone();
        let mut cells = self.state.cells.clone();
        cell_model.step(&mut cells, applied_current, control.fan_duty, delta);

        let measured_current = self.apply_injection(directive, &mut cells, applied_current);

        let readings =
            self.aggregator
                .aggregate(&cells, control, self.state.soc, applied_current, delta);
        let evaluation = self.monitor.evaluate(&cells, measured_current);

        let next = PackState {
            timestamp: self.state.timestamp + dt,
            cells,
            pack_voltage: readings.pack_voltage,
            pack_current: readings.pack_current,
            pack_temperature: readings.pack_temperature,
            soc: readings.soc,
            fan_duty: control.fan_duty.clamp(0.0, 100.0),
            faults: evaluation.faults.clone(),
            contactors_closed: self.contactor.is_closed(),
        };
        check_finite(&next)?;

        self.cell_model = cell_model;
        Ok(self.commit(next, evaluation, reset_requested, bypass, directive))
    }

    /// Overwrite physical readings, bypassing the cell model and aggregator.
    pub fn inject_state(&mut self, injection: StateInjection) -> Result<(), EngineError> {
        let mut next = self.state.clone();
        if let Some(cells) = injection.cells {
            next.cells = cells;
            for (i, cell) in next.cells.iter_mut().enumerate() {
                cell.id = i as u8;
            }
        }
        for (index, voltage) in injection.cell_voltages {
            next.cells
                .get_mut(index)
                .ok_or(EngineError::CellIndex(index))?
                .voltage = voltage;
        }
        for (index, temperature) in injection.cell_temperatures {
            next.cells
                .get_mut(index)
                .ok_or(EngineError::CellIndex(index))?
                .temperature = temperature;
        }
        if let Some(current) = injection.pack_current {
            next.pack_current = current;
        }
        if let Some(soc) = injection.soc {
            next.soc = soc.clamp(0.0, 100.0);
        }
        next.pack_voltage = PackAggregator::pack_voltage(&next.cells);
        next.pack_temperature = PackAggregator::pack_temperature(&next.cells);
        check_finite(&next)?;

        self.state = next;
        Ok(())
    }

    /// Safety-only pass: FaultMonitor -> ContactorController on the current
    /// readings, without advancing physics or time.
    ///
    /// The measured current is the current `pack_current` reading.
    pub fn evaluate(&mut self, directive: Option<FaultDirective>) -> TickOutcome {
        let (reset_requested, bypass) = self.resolve_directive(directive);

        let mut next = self.state.clone();
        let measured_current = self.apply_injection(directive, &mut next.cells, next.pack_current);
        next.pack_voltage = PackAggregator::pack_voltage(&next.cells);
        next.pack_temperature = PackAggregator::pack_temperature(&next.cells);

        let evaluation = self.monitor.evaluate(&next.cells, measured_current);
        next.faults = evaluation.faults.clone();

        self.commit(next, evaluation, reset_requested, bypass, directive)
    }

    fn resolve_directive(&self, directive: Option<FaultDirective>) -> (bool, bool) {
        match directive {
            Some(FaultDirective::Reset) => (true, false),
            Some(FaultDirective::Sabotage) => (false, true),
            _ => (false, self.contactor.bypass_active()),
        }
    }

    /// Write the reading an injection directive calls for. Returns the current
    /// the fault monitor should see.
    fn apply_injection(
        &self,
        directive: Option<FaultDirective>,
        cells: &mut [Cell; CELL_COUNT],
        current_a: f64,
    ) -> f64 {
        match directive {
            Some(FaultDirective::Overvoltage) => cells[0].voltage = INJECTED_OVERVOLTAGE_V,
            Some(FaultDirective::Undervoltage) => cells[0].voltage = INJECTED_UNDERVOLTAGE_V,
            Some(FaultDirective::Overtemp) => cells[0].temperature = INJECTED_OVERTEMP_C,
            Some(FaultDirective::ShortCircuit) => {
                return self.monitor.config().short_circuit_inject_a;
            }
            Some(FaultDirective::Reset) | Some(FaultDirective::Sabotage) | None => {}
        }
        current_a
    }

    fn commit(
        &mut self,
        mut next: PackState,
        evaluation: FaultEvaluation,
        reset_requested: bool,
        bypass: bool,
        directive: Option<FaultDirective>,
    ) -> TickOutcome {
        self.contactor.set_bypass(bypass);
        let event = self.contactor.update(&evaluation.faults, reset_requested);
        next.contactors_closed = self.contactor.is_closed();
        self.state = next;

        TickOutcome {
            state: self.state.clone(),
            evaluation,
            contactor: event,
            directive,
        }
    }
}

fn check_finite(state: &PackState) -> Result<(), EngineError> {
    for cell in &state.cells {
        if !cell.voltage.is_finite() {
            return Err(EngineError::NonFinite { field: "cell voltage" });
        }
        if !cell.temperature.is_finite() {
            return Err(EngineError::NonFinite {
                field: "cell temperature",
            });
        }
    }
    let fields = [
        ("packVoltage", state.pack_voltage),
        ("packCurrent", state.pack_current),
        ("packTemperature", state.pack_temperature),
        ("soc", state.soc),
        ("fanDuty", state.fan_duty),
    ];
    match fields.iter().find(|(_, v)| !v.is_finite()) {
        Some((field, _)) => Err(EngineError::NonFinite { field: *field }),
        None => Ok(()),
    }
}
