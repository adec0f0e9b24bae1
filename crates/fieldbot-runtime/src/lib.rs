//! `fieldbot-runtime` – Motion Engine
//!
//! Turns instructions into timed, heading-corrected wheel and sprayer
//! commands.
//!
//! # Modules
//!
//! - [`kinematics`] – pure open-loop planning: wheel duties, durations and
//!   correction mode per instruction, plus a dead-reckoning
//!   [`trace_path`][kinematics::trace_path] sharing the same sign convention.
//! - [`executor`] – [`MotionExecutor`][executor::MotionExecutor]: the
//!   per-instruction state machine with pause/resume, cancel and
//!   emergency-stop handling.
//! - [`runner`] – [`PatternRunner`][runner::PatternRunner]: sequences a
//!   pattern, maintains progress, aborts on the first failure.
//! - [`manual`] – remote-control button edges applied directly to the drive.
//! - [`actuation`] – the single worker thread through which every
//!   actuation request flows.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: log
//!   formatting and optional OTLP span export.

pub mod actuation;
pub mod executor;
pub mod kinematics;
pub mod manual;
pub mod runner;
pub mod telemetry;

pub use actuation::{ActuationHandle, Job, spawn_worker};
pub use executor::{ExecutorState, MotionExecutor};
pub use kinematics::{Correction, MotionPlan, Pose};
pub use manual::{ButtonState, ManualAction, ManualCommand};
pub use runner::{DEFAULT_INTER_STEP_PAUSE, PatternRunner, RunResult};
pub use telemetry::{TracerProviderGuard, init_tracing};
