use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::report::{ScenarioCategory, TestCaseResult, TestVerdict};
use crate::config::{PackConfig, SafetyConfig};
use crate::controller::{EngineError, PackEngine, StateInjection};
use crate::domain::{Cell, ControlInput, FaultCode, FaultDirective};

/// Physics ticks run by the charging scenario.
const CHARGE_TICKS: usize = 50;
const NOMINAL_CELL_V: f64 = 3.7;

#[derive(Debug, Error)]
pub enum ScenarioFailure {
    #[error("{0}")]
    Assertion(String),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// What every scenario starts from: a fresh engine built from these configs.
#[derive(Debug, Clone)]
pub struct ScenarioEnv {
    pub pack: PackConfig,
    pub safety: SafetyConfig,
    /// Start engines with the safety bypass already active
    pub bypass: bool,
    pub dt: Duration,
}

impl ScenarioEnv {
    pub fn engine(&self) -> Result<PackEngine, ScenarioFailure> {
        let mut engine = PackEngine::new(self.pack.clone(), self.safety.clone())?;
        engine.set_bypass(self.bypass);
        Ok(engine)
    }
}

type ScenarioFn = Box<dyn Fn(&ScenarioEnv) -> Result<String, ScenarioFailure> + Send + Sync>;

pub struct Scenario {
    pub id: String,
    pub name: String,
    pub category: ScenarioCategory,
    run: ScenarioFn,
}

impl Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .finish()
    }
}

impl Scenario {
    pub fn new<F>(id: impl Into<String>, name: impl Into<String>, category: ScenarioCategory, run: F) -> Self
    where
        F: Fn(&ScenarioEnv) -> Result<String, ScenarioFailure> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            run: Box::new(run),
        }
    }

    /// Run the scenario under its guard. Assertion failures, engine errors and
    /// panics all become a `FAIL` result.
    pub fn execute(&self, env: &ScenarioEnv) -> TestCaseResult {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.run)(env)));
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let (result, message) = match outcome {
            Ok(Ok(message)) => (TestVerdict::Pass, message),
            Ok(Err(failure)) => (TestVerdict::Fail, failure.to_string()),
            Err(payload) => (
                TestVerdict::Fail,
                format!("Unexpected error: {}", panic_message(payload.as_ref())),
            ),
        };

        TestCaseResult {
            id: self.id.clone(),
            name: self.name.clone(),
            category: self.category,
            result,
            message,
            duration_ms,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "scenario panicked".to_string()
    }
}

fn ensure(condition: bool, message: impl Into<String>) -> Result<(), ScenarioFailure> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioFailure::Assertion(message.into()))
    }
}

fn ensure_eq<T: PartialEq + Debug>(expected: T, actual: T, message: &str) -> Result<(), ScenarioFailure> {
    if expected == actual {
        Ok(())
    } else {
        Err(ScenarioFailure::Assertion(format!(
            "{message}. Expected: {expected:?}, Got: {actual:?}"
        )))
    }
}

/// The fixed scenario battery, in execution order.
pub fn battery() -> Vec<Scenario> {
    use ScenarioCategory::*;

    let mut scenarios = vec![
        Scenario::new("TC-SAFE-001", "Overvoltage cutoff", Safety, |env| {
            cutoff(
                env,
                StateInjection::new().cell_voltage(0, 4.3),
                FaultCode::Overvoltage,
                "cell 0 at 4.30V",
            )
        }),
        Scenario::new("TC-SAFE-002", "Overtemp cutoff", Safety, |env| {
            cutoff(
                env,
                StateInjection::new().cell_temperature(0, 75.0),
                FaultCode::Overtemp,
                "cell 0 at 75.0°C",
            )
        }),
        Scenario::new("TC-SAFE-003", "Undervoltage cutoff", Safety, |env| {
            cutoff(
                env,
                StateInjection::new().cell_voltage(1, 2.3),
                FaultCode::Undervoltage,
                "cell 1 at 2.30V",
            )
        }),
        Scenario::new("TC-SAFE-004", "Short circuit cutoff", Safety, |env| {
            let spike = env.safety.short_circuit_inject_a;
            cutoff(
                env,
                StateInjection::new().pack_current(spike),
                FaultCode::ShortCircuit,
                &format!("{spike:.1}A"),
            )
        }),
        Scenario::new("TC-FUNC-001", "Charging raises SOC", Functional, charging_raises_soc),
        Scenario::new("TC-FUNC-002", "Cell balancing activation", Functional, balancing_activation),
        Scenario::new("TC-FUNC-003", "Latch persistence", Functional, latch_persistence),
        Scenario::new("TC-FUNC-004", "Reset after fault clear", Functional, reset_after_clear),
        Scenario::new("TC-FUNC-005", "Reset rejected while fault persists", Functional, reset_rejected),
        Scenario::new("TC-FUNC-006", "Sabotage bypass observable", Functional, sabotage_observable),
    ];

    let boundaries = [
        (4.24, false, "just under limit"),
        (4.25, false, "at limit"),
        (4.26, true, "just over limit"),
    ];
    for (i, (voltage, expect_fault, desc)) in boundaries.into_iter().enumerate() {
        scenarios.push(Scenario::new(
            format!("TC-BOUND-001-{}", i + 1),
            format!("Voltage boundary ({desc})"),
            Boundary,
            move |env| voltage_boundary(env, voltage, expect_fault),
        ));
    }

    scenarios
}

fn cutoff(
    env: &ScenarioEnv,
    injection: StateInjection,
    code: FaultCode,
    condition: &str,
) -> Result<String, ScenarioFailure> {
    let mut engine = env.engine()?;
    engine.inject_state(injection)?;
    let outcome = engine.evaluate(None);

    ensure(
        outcome.state.faults.contains(code),
        format!("{code} fault not detected with {condition}"),
    )?;
    ensure_eq(
        false,
        outcome.state.contactors_closed,
        &format!("Contactors should open on {code}"),
    )?;
    Ok(format!("{code} raised with {condition}; contactors opened"))
}

/// Trip the latch with an overvoltage on cell 0 and confirm it opened.
fn trip_overvoltage(engine: &mut PackEngine) -> Result<(), ScenarioFailure> {
    engine.inject_state(StateInjection::new().cell_voltage(0, 4.5))?;
    let outcome = engine.evaluate(None);
    ensure_eq(
        false,
        outcome.state.contactors_closed,
        "Pre-check failed: contactors should open on OVERVOLTAGE",
    )
}

fn clear_overvoltage(engine: &mut PackEngine) -> Result<(), ScenarioFailure> {
    engine.inject_state(StateInjection::new().cell_voltage(0, NOMINAL_CELL_V))?;
    Ok(())
}

fn charging_raises_soc(env: &ScenarioEnv) -> Result<String, ScenarioFailure> {
    let mut engine = env.engine()?;
    let control = ControlInput {
        charger_amps: 10.0,
        ..Default::default()
    };

    let start = engine.state().soc;
    let mut previous = start;
    for tick in 0..CHARGE_TICKS {
        let outcome = engine.tick(&control, env.dt)?;
        ensure(
            outcome.state.soc >= previous,
            format!("SOC decreased at tick {tick}: {previous:.4}% -> {:.4}%", outcome.state.soc),
        )?;
        ensure_eq(10.0, outcome.state.pack_current, "Pack current should follow the charger")?;
        previous = outcome.state.soc;
    }

    ensure(
        previous > start,
        format!("SOC did not rise: {start:.4}% -> {previous:.4}%"),
    )?;
    Ok(format!(
        "SOC {start:.3}% -> {previous:.3}% over {CHARGE_TICKS} ticks at 10A"
    ))
}

fn balancing_activation(env: &ScenarioEnv) -> Result<String, ScenarioFailure> {
    let mut engine = env.engine()?;
    let ambient = env.pack.ambient_temp_c;
    let cells = [4.1, 3.9, 3.9, 3.9].map(|v| Cell::new(0, v, ambient));
    engine.inject_state(StateInjection::new().cells(cells))?;

    let control = ControlInput {
        charger_amps: 5.0,
        ..Default::default()
    };
    let outcome = engine.tick(&control, env.dt)?;

    ensure(
        outcome.state.cells[0].is_balancing,
        "High-voltage cell should be balancing",
    )?;
    ensure(
        outcome.state.cells[1..].iter().all(|c| !c.is_balancing),
        "Low-voltage cells should NOT be balancing",
    )?;
    Ok("Cell 0 balancing at 4.1V while peers at 3.9V".to_string())
}

fn latch_persistence(env: &ScenarioEnv) -> Result<String, ScenarioFailure> {
    let mut engine = env.engine()?;
    trip_overvoltage(&mut engine)?;
    clear_overvoltage(&mut engine)?;

    let outcome = engine.evaluate(None);
    ensure(outcome.state.faults.is_empty(), "Fault condition should have cleared")?;
    ensure_eq(
        false,
        outcome.state.contactors_closed,
        "Contactors must stay open without a reset",
    )?;
    Ok("Contactors stayed open after the fault cleared".to_string())
}

fn reset_after_clear(env: &ScenarioEnv) -> Result<String, ScenarioFailure> {
    let mut engine = env.engine()?;
    trip_overvoltage(&mut engine)?;
    clear_overvoltage(&mut engine)?;

    let outcome = engine.evaluate(Some(FaultDirective::Reset));
    ensure(outcome.state.faults.is_empty(), "Faults should be clear after reset")?;
    ensure_eq(
        true,
        outcome.state.contactors_closed,
        "Contactors should reclose after reset",
    )?;
    Ok("Reset accepted; contactors reclosed".to_string())
}

fn reset_rejected(env: &ScenarioEnv) -> Result<String, ScenarioFailure> {
    let mut engine = env.engine()?;
    trip_overvoltage(&mut engine)?;

    let outcome = engine.evaluate(Some(FaultDirective::Reset));
    ensure(
        outcome.state.faults.contains(FaultCode::Overvoltage),
        "Overvoltage should still be active",
    )?;
    ensure_eq(
        false,
        outcome.state.contactors_closed,
        "Contactors must stay open while a fault persists",
    )?;
    Ok("Reset rejected while OVERVOLTAGE persists".to_string())
}

fn sabotage_observable(env: &ScenarioEnv) -> Result<String, ScenarioFailure> {
    let mut engine = env.engine()?;
    engine.evaluate(Some(FaultDirective::Sabotage));
    engine.inject_state(StateInjection::new().cell_voltage(0, 4.5))?;

    let outcome = engine.evaluate(None);
    ensure(
        outcome.state.faults.contains(FaultCode::Overvoltage),
        "Overvoltage should still be detected in bypass",
    )?;
    ensure_eq(
        true,
        outcome.state.contactors_closed,
        "Bypass should keep contactors closed",
    )?;
    Ok("Bypass active: OVERVOLTAGE present, contactors closed (unsafe)".to_string())
}

fn voltage_boundary(env: &ScenarioEnv, voltage: f64, expect_fault: bool) -> Result<String, ScenarioFailure> {
    let mut engine = env.engine()?;
    engine.inject_state(StateInjection::new().cell_voltage(0, voltage))?;
    let outcome = engine.evaluate(None);

    let has_fault = outcome.state.faults.contains(FaultCode::Overvoltage);
    ensure_eq(expect_fault, has_fault, &format!("Voltage {voltage:.2}V"))?;
    if expect_fault {
        ensure_eq(false, outcome.state.contactors_closed, "Contactors should open")?;
    }
    Ok(format!(
        "{voltage:.2}V: {}",
        if has_fault { "fault raised" } else { "no fault" }
    ))
}
