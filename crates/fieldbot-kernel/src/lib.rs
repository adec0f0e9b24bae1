//! `fieldbot-kernel` – Safety & Coordination
//!
//! The shared control state every concurrent task agrees on, and the
//! independent loop allowed to stop the robot when something is in the way.
//!
//! # Modules
//!
//! - [`safety_state`] – [`SafetyState`][safety_state::SafetyState]: the
//!   process-wide pause flag (with wake-on-resume) and the run progress
//!   counters, injected into every component that needs them.
//! - [`obstacle_monitor`] – [`ObstacleMonitor`][obstacle_monitor::ObstacleMonitor]:
//!   polls the forward range sensor, pauses and resumes with hysteresis,
//!   and reconnects the sensor with capped backoff.
//! - [`backoff`] – [`Backoff`][backoff::Backoff]: doubling retry delay with
//!   an upper bound.

pub mod backoff;
pub mod obstacle_monitor;
pub mod safety_state;

pub use backoff::Backoff;
pub use obstacle_monitor::{HysteresisGate, MonitorConfig, ObstacleMonitor, Transition};
pub use safety_state::SafetyState;
