use serde::{Deserialize, Serialize};
use validator::Validate;

use super::fault::FaultCode;

/// Fault-injection and safety directives carried by `injectFault`.
///
/// `NONE` and `SABOTAGE` are directives only; they never appear in a
/// `FaultSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultDirective {
    /// Clear the bypass and request a contactor reset
    #[serde(rename = "NONE")]
    Reset,
    /// Disable the contactor reaction to faults
    Sabotage,
    Overvoltage,
    Undervoltage,
    Overtemp,
    ShortCircuit,
}

impl FaultDirective {
    /// The fault condition this directive injects, if any.
    pub fn injected_fault(self) -> Option<FaultCode> {
        match self {
            FaultDirective::Reset | FaultDirective::Sabotage => None,
            FaultDirective::Overvoltage => Some(FaultCode::Overvoltage),
            FaultDirective::Undervoltage => Some(FaultCode::Undervoltage),
            FaultDirective::Overtemp => Some(FaultCode::Overtemp),
            FaultDirective::ShortCircuit => Some(FaultCode::ShortCircuit),
        }
    }
}

/// Operator input consumed by the simulation loop.
///
/// All defaults live here. `inject_fault` is one-shot: the tick that reads
/// it consumes it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlInput {
    pub load_amps: f64,
    pub charger_amps: f64,
    pub fan_duty: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inject_fault: Option<FaultDirective>,
}

impl ControlInput {
    /// Net commanded pack current: positive charging, negative discharging.
    pub fn net_current(&self) -> f64 {
        self.charger_amps - self.load_amps
    }

    /// Overlay every field present in `patch` onto `self`.
    pub fn merged(&self, patch: &ControlPatch) -> ControlInput {
        ControlInput {
            load_amps: patch.load_amps.unwrap_or(self.load_amps),
            charger_amps: patch.charger_amps.unwrap_or(self.charger_amps),
            fan_duty: patch.fan_duty.unwrap_or(self.fan_duty),
            inject_fault: patch.inject_fault.or(self.inject_fault),
        }
    }
}

/// Partial `UPDATE_CONTROL` payload as received from the host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ControlPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 10000.0))]
    pub load_amps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 10000.0))]
    pub charger_amps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub fan_duty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject_fault: Option<FaultDirective>,
}

impl ControlPatch {
    /// Resolve the patch against the control defaults.
    pub fn into_control(self) -> ControlInput {
        ControlInput::default().merged(&self)
    }
}
