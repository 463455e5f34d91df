//! # Control Channel
//!
//! The only boundary between the engine and a host. Messages are a tagged
//! union serialised as `{ "type": "...", "payload": ... }`; payload-less kinds
//! carry only the tag.
//!
//! Inbound `UPDATE_CONTROL` and outbound `TICK` payloads are schema-checked
//! here. A payload that fails is dropped and reported as a `LOG` warning; it
//! never reaches engine state.

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::domain::{ControlPatch, PackState};
use crate::harness::HarnessReport;

/// Host -> engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    /// Explicit start when the session was created without auto-start
    Init,
    UpdateControl(ControlPatch),
    RunTests,
}

/// Engine -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineMessage {
    Ready,
    Tick(PackState),
    Log { message: String, level: LogLevel },
    TestResult {
        name: String,
        passed: bool,
        message: String,
    },
    /// Aggregate report, sent right before `TEST_COMPLETE` of a finished run
    TestReport(HarnessReport),
    TestComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl EngineMessage {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        EngineMessage::Log {
            message: message.into(),
            level,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Error, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::log(LogLevel::Success, message)
    }

    /// Wrap a snapshot for publishing, checking it against the telemetry schema.
    pub fn tick(state: PackState) -> Result<Self, ChannelError> {
        state
            .validate_snapshot()
            .map_err(ChannelError::InvalidTelemetry)?;
        Ok(EngineMessage::Tick(state))
    }

    /// Protocol tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineMessage::Ready => "READY",
            EngineMessage::Tick(_) => "TICK",
            EngineMessage::Log { .. } => "LOG",
            EngineMessage::TestResult { .. } => "TEST_RESULT",
            EngineMessage::TestReport(_) => "TEST_REPORT",
            EngineMessage::TestComplete => "TEST_COMPLETE",
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("control payload rejected: {0}")]
    InvalidControl(ValidationErrors),
    #[error("telemetry snapshot rejected: {0}")]
    InvalidTelemetry(ValidationErrors),
    #[error("session closed")]
    Closed,
}

impl HostMessage {
    /// Schema check for inbound payloads.
    pub fn validate(&self) -> Result<(), ChannelError> {
        match self {
            HostMessage::UpdateControl(patch) => validate_control(patch),
            HostMessage::Init | HostMessage::RunTests => Ok(()),
        }
    }
}

/// Range rules plus a finiteness check the range rules do not cover.
pub fn validate_control(patch: &ControlPatch) -> Result<(), ChannelError> {
    patch.validate().map_err(ChannelError::InvalidControl)?;
    let values = [patch.load_amps, patch.charger_amps, patch.fan_duty];
    if values.iter().flatten().any(|v| !v.is_finite()) {
        let mut errors = ValidationErrors::new();
        errors.add("control", ValidationError::new("non_finite"));
        return Err(ChannelError::InvalidControl(errors));
    }
    Ok(())
}

/// Decode and validate one inbound text frame.
pub fn decode_host_message(text: &str) -> Result<HostMessage, ChannelError> {
    let message: HostMessage = serde_json::from_str(text)?;
    message.validate()?;
    Ok(message)
}

/// Encode one outbound message as a JSON text frame.
pub fn encode_engine_message(message: &EngineMessage) -> Result<String, ChannelError> {
    Ok(serde_json::to_string(message)?)
}
