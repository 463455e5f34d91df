use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::CELL_COUNT;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
    pub pack: PackConfig,
    pub safety: SafetyConfig,
    pub harness: HarnessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: false,
            request_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fixed tick period (ms)
    pub tick_ms: u64,
    /// Upper bound on the integration step after a host stall (ms)
    pub max_step_ms: u64,
    /// Start the engine immediately instead of waiting for `INIT`
    pub auto_start: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100, // 10 Hz
            max_step_ms: 1000,
            auto_start: true,
        }
    }
}

impl SimulationConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn max_step(&self) -> Duration {
        Duration::from_millis(self.max_step_ms.max(self.tick_ms.max(1)))
    }
}

/// Cell and pack physics parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackConfig {
    /// Nominal cell (and series pack) capacity (Ah)
    pub capacity_ah: f64,
    pub initial_soc_percent: f64,
    pub ambient_temp_c: f64,
    pub initial_cell_voltages_v: [f64; CELL_COUNT],
    /// Per-cell capacity mismatch relative to `capacity_ah`
    pub cell_capacity_scale: [f64; CELL_COUNT],
    pub internal_resistance_ohm: f64,
    /// Temperature rise per joule of I²R heat (°C/J)
    pub heat_gain_c_per_j: f64,
    /// Passive cooling coefficient (1/s), scaled by (1 + fan/100)
    pub cooling_coeff_per_s: f64,
    /// Terminal voltage relaxation time constant (s)
    pub relaxation_tau_s: f64,
    pub ocv_empty_v: f64,
    pub ocv_full_v: f64,
    /// Balancing trips when a cell leads the mean of its peers by this much (V)
    pub balance_threshold_v: f64,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            capacity_ah: 2.5,
            initial_soc_percent: 50.0,
            ambient_temp_c: 25.0,
            initial_cell_voltages_v: [3.70, 3.72, 3.69, 3.71],
            cell_capacity_scale: [1.0, 0.98, 1.01, 0.99],
            internal_resistance_ohm: 0.004,
            heat_gain_c_per_j: 0.05,
            cooling_coeff_per_s: 0.05,
            relaxation_tau_s: 2.0,
            ocv_empty_v: 3.2,
            ocv_full_v: 4.2,
            balance_threshold_v: 0.05,
        }
    }
}

impl PackConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.capacity_ah.is_finite() && self.capacity_ah > 0.0) {
            return Err(format!("capacity_ah must be positive, got {}", self.capacity_ah));
        }
        if !(0.0..=100.0).contains(&self.initial_soc_percent) {
            return Err(format!(
                "initial_soc_percent must be within 0..=100, got {}",
                self.initial_soc_percent
            ));
        }
        if !(-40.0..=150.0).contains(&self.ambient_temp_c) {
            return Err(format!(
                "ambient_temp_c must be within -40..=150, got {}",
                self.ambient_temp_c
            ));
        }
        if let Some(v) = self
            .initial_cell_voltages_v
            .iter()
            .find(|v| !(0.0..=5.0).contains(*v))
        {
            return Err(format!("initial cell voltage {} outside 0..=5 V", v));
        }
        if let Some(s) = self
            .cell_capacity_scale
            .iter()
            .find(|s| !(s.is_finite() && **s > 0.0))
        {
            return Err(format!("cell capacity scale must be positive, got {}", s));
        }
        if !(self.internal_resistance_ohm.is_finite() && self.internal_resistance_ohm >= 0.0) {
            return Err("internal_resistance_ohm must be non-negative".to_string());
        }
        if !(self.relaxation_tau_s.is_finite() && self.relaxation_tau_s > 0.0) {
            return Err("relaxation_tau_s must be positive".to_string());
        }
        if !(self.heat_gain_c_per_j >= 0.0 && self.cooling_coeff_per_s >= 0.0) {
            return Err("thermal coefficients must be non-negative".to_string());
        }
        if !(self.ocv_empty_v < self.ocv_full_v && self.ocv_full_v <= 5.0 && self.ocv_empty_v >= 0.0)
        {
            return Err(format!(
                "OCV curve {}..{} V is not a valid range",
                self.ocv_empty_v, self.ocv_full_v
            ));
        }
        Ok(())
    }
}

/// Safety envelope thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub overvoltage_v: f64,
    pub undervoltage_v: f64,
    pub overtemp_c: f64,
    /// Current magnitude treated as a short circuit (A)
    pub short_circuit_a: f64,
    /// Current forced for one tick by the SHORT_CIRCUIT directive (A)
    pub short_circuit_inject_a: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            overvoltage_v: 4.25,
            undervoltage_v: 2.50,
            overtemp_c: 60.0,
            short_circuit_a: 150.0,
            short_circuit_inject_a: 500.0,
        }
    }
}

impl SafetyConfig {
    pub fn validate(&self) -> Result<(), String> {
        let all_finite = [
            self.overvoltage_v,
            self.undervoltage_v,
            self.overtemp_c,
            self.short_circuit_a,
            self.short_circuit_inject_a,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !all_finite {
            return Err("safety thresholds must be finite".to_string());
        }
        if self.undervoltage_v >= self.overvoltage_v {
            return Err(format!(
                "undervoltage threshold {} V must be below overvoltage threshold {} V",
                self.undervoltage_v, self.overvoltage_v
            ));
        }
        if self.short_circuit_a <= 0.0 {
            return Err("short_circuit_a must be positive".to_string());
        }
        if self.short_circuit_inject_a <= self.short_circuit_a {
            return Err(format!(
                "short_circuit_inject_a ({} A) must exceed short_circuit_a ({} A)",
                self.short_circuit_inject_a, self.short_circuit_a
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Forced release of the run lock after this long (ms)
    pub watchdog_timeout_ms: u64,
    /// Delay between scenarios (ms); 0 runs back-to-back
    pub scenario_pacing_ms: u64,
    /// Integration step used by scenarios (s)
    pub dt_s: f64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout_ms: 10_000,
            scenario_pacing_ms: 0,
            dt_s: 0.1,
        }
    }
}

impl HarnessConfig {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn scenario_pacing(&self) -> Duration {
        Duration::from_millis(self.scenario_pacing_ms)
    }

    /// Scenario step; falls back to 100 ms for a negative or non-finite `dt_s`.
    pub fn step(&self) -> Duration {
        Duration::try_from_secs_f64(self.dt_s).unwrap_or(Duration::from_millis(100))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("BMS__").split("__"));
        Ok(figment.extract()?)
    }
}
