//! `fieldbot-types` – shared vocabulary of the field-painting robot.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here: the [`Instruction`] program model and its parser, the immutable
//! [`CalibrationProfile`], the per-tick [`MotorCommand`], the [`Progress`]
//! counters reported over telemetry, and the [`FieldError`] taxonomy.

pub mod calibration;
pub mod instruction;
pub mod pattern;

pub use calibration::CalibrationProfile;
pub use instruction::{INSTRUCTION_TYPES, Instruction, InstructionKind};
pub use pattern::{FieldMap, ParserConfig, Pattern};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One tick's worth of actuation: wheel duties in `[-1, 1]` (sign selects
/// direction) and sprayer duty in `[0, 1]`.
///
/// Produced by the motion executor every control tick and consumed
/// immediately by the drive; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorCommand {
    pub left_duty: f64,
    pub right_duty: f64,
    pub spray_duty: f64,
}

impl MotorCommand {
    /// Build a command, clamping every duty into its legal range.
    pub fn new(left_duty: f64, right_duty: f64, spray_duty: f64) -> Self {
        Self {
            left_duty: left_duty.clamp(-1.0, 1.0),
            right_duty: right_duty.clamp(-1.0, 1.0),
            spray_duty: spray_duty.clamp(0.0, 1.0),
        }
    }

    /// Both wheels stopped, sprayer off.
    pub fn halt() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// 1-based pattern progress: `current` is the step being executed, `total`
/// the length of the running pattern.  Both are zero before any run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
}

/// One telemetry sample as sent to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub battery_percent: f64,
    pub progress: Progress,
}

/// Error taxonomy shared by the whole robot stack.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldError {
    /// The pattern payload could not be interpreted at all; nothing runs.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The instruction's movement type is not one the engine can execute.
    #[error("Unknown instruction '{kind}' at order {order}")]
    UnknownInstruction { order: i64, kind: String },

    /// A hardware or sensor fault interrupted the instruction at `order`.
    #[error("Execution failed at order {order}: {details}")]
    Execution { order: i64, details: String },

    /// The obstacle range sensor could not be acquired or read.
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// A single hardware component rejected a command.
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    /// The operator (or a lost connection) cancelled the instruction at `order`.
    #[error("Cancelled at order {order}")]
    Cancelled { order: i64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FieldError {
    /// Shorthand for a [`FieldError::HardwareFault`].
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        Self::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }

    /// The instruction order a step-level failure refers to, if any.
    pub fn order(&self) -> Option<i64> {
        match self {
            Self::UnknownInstruction { order, .. }
            | Self::Execution { order, .. }
            | Self::Cancelled { order } => Some(*order),
            _ => None,
        }
    }
}
