//! `fieldbot-hal` – Hardware Abstraction Layer
//!
//! The only layer that touches physical hardware.  Everything above it talks
//! to the traits defined here, so drivers can be swapped (or simulated)
//! without touching motion or safety logic.
//!
//! # Modules
//!
//! - [`drive`] – [`ActuatorDrive`][drive::ActuatorDrive]: the two drive
//!   wheels plus the sprayer, with [`DifferentialDrive`][drive::DifferentialDrive]
//!   composing per-wheel [`Motor`][drive::Motor]s and a [`Sprayer`][drive::Sprayer].
//! - [`heading`] – [`HeadingSensor`][heading::HeadingSensor] and the
//!   gyro-integrating [`IntegratedYaw`][heading::IntegratedYaw].
//! - [`heading_controller`] – proportional yaw correction applied to wheel
//!   duty pairs.
//! - [`range`] – forward ranging sensor used by the obstacle monitor.
//! - [`battery`] – battery percentage source for telemetry.
//! - [`sim`] – recording, fault-injectable simulated drivers for tests and
//!   hardware-free runs.

pub mod battery;
pub mod drive;
pub mod heading;
pub mod heading_controller;
pub mod range;
pub mod sim;

pub use battery::{BatterySource, VoltageBattery, VoltageCurve, VoltageReader};
pub use drive::{ActuatorDrive, DifferentialDrive, Direction, Motor, Sprayer};
pub use heading::{GyroRate, HeadingSensor, IntegratedYaw};
pub use heading_controller::HeadingController;
pub use range::{RangeSample, RangeSensor, RangeSensorConnector};
