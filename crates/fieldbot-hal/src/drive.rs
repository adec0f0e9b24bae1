//! Differential drive and sprayer actuation.
//!
//! [`ActuatorDrive`] is the contract the motion engine consumes.
//! [`DifferentialDrive`] implements it on top of two [`Motor`] drivers (a
//! PWM channel plus a direction line each) and a [`Sprayer`], converting
//! signed duties into direction + magnitude and clamping them to their legal
//! ranges.  The motion engine issues a full [`MotorCommand`] every control
//! tick; the sprayer valve is only rewritten when its duty changes.

use fieldbot_types::{FieldError, MotorCommand};
use tracing::{error, warn};

/// Rotation sense of a single wheel motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// One wheel motor.
pub trait Motor: Send {
    /// Stable identifier, e.g. `"left_wheel"`.
    fn id(&self) -> &str;

    /// Drive the motor in `direction` at `magnitude` (`[0, 1]`).
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] if the command cannot be applied.
    fn set_output(&mut self, direction: Direction, magnitude: f64) -> Result<(), FieldError>;

    /// Cut power to the motor.
    fn stop(&mut self) -> Result<(), FieldError>;
}

/// The paint sprayer.
pub trait Sprayer: Send {
    fn id(&self) -> &str;

    /// Set the spray duty (`[0, 1]`, `0` = off).
    fn set_duty(&mut self, duty: f64) -> Result<(), FieldError>;
}

/// The drive wheels and sprayer of the robot: the single point through
/// which hardware is commanded.
///
/// Duties are signed for wheels (`[-1, 1]`, negative = reverse) and
/// unsigned for the sprayer (`[0, 1]`).
pub trait ActuatorDrive: Send {
    fn drive_left(&mut self, duty: f64) -> Result<(), FieldError>;
    fn drive_right(&mut self, duty: f64) -> Result<(), FieldError>;
    fn halt_left(&mut self) -> Result<(), FieldError>;
    fn halt_right(&mut self) -> Result<(), FieldError>;
    fn set_spray(&mut self, duty: f64) -> Result<(), FieldError>;

    /// Halt both wheels and the sprayer.
    ///
    /// Must be callable from any state, including right after a fault: every
    /// actuator is commanded even when an earlier one fails, and the first
    /// failure is returned.
    fn emergency_stop_all(&mut self) -> Result<(), FieldError>;

    /// Apply one tick's [`MotorCommand`] (left, right, spray in that order).
    fn apply(&mut self, command: &MotorCommand) -> Result<(), FieldError> {
        self.drive_left(command.left_duty)?;
        self.drive_right(command.right_duty)?;
        self.set_spray(command.spray_duty)
    }

    /// Halt both wheels, leaving the sprayer untouched.
    fn halt_wheels(&mut self) -> Result<(), FieldError> {
        self.halt_left()?;
        self.halt_right()
    }
}

/// [`ActuatorDrive`] built from two wheel [`Motor`]s and a [`Sprayer`].
pub struct DifferentialDrive<L, R, S> {
    left: L,
    right: R,
    sprayer: S,
    /// Last duty the sprayer accepted; NaN after a failed write.  The valve
    /// is assumed closed at power-up.
    spray_duty: f64,
}

impl<L: Motor, R: Motor, S: Sprayer> DifferentialDrive<L, R, S> {
    pub fn new(left: L, right: R, sprayer: S) -> Self {
        Self {
            left,
            right,
            sprayer,
            spray_duty: 0.0,
        }
    }

    pub fn left(&self) -> &L {
        &self.left
    }

    pub fn right(&self) -> &R {
        &self.right
    }

    pub fn sprayer(&self) -> &S {
        &self.sprayer
    }
}

fn drive_motor<M: Motor>(motor: &mut M, duty: f64) -> Result<(), FieldError> {
    if !duty.is_finite() {
        return Err(FieldError::hardware(motor.id(), format!("non-finite duty {duty}")));
    }
    let duty = duty.clamp(-1.0, 1.0);
    if duty == 0.0 {
        return motor.stop();
    }
    let direction = if duty > 0.0 {
        Direction::Forward
    } else {
        Direction::Reverse
    };
    motor.set_output(direction, duty.abs())
}

impl<L: Motor, R: Motor, S: Sprayer> ActuatorDrive for DifferentialDrive<L, R, S> {
    fn drive_left(&mut self, duty: f64) -> Result<(), FieldError> {
        drive_motor(&mut self.left, duty)
    }

    fn drive_right(&mut self, duty: f64) -> Result<(), FieldError> {
        drive_motor(&mut self.right, duty)
    }

    fn halt_left(&mut self) -> Result<(), FieldError> {
        self.left.stop()
    }

    fn halt_right(&mut self) -> Result<(), FieldError> {
        self.right.stop()
    }

    fn set_spray(&mut self, duty: f64) -> Result<(), FieldError> {
        if !duty.is_finite() {
            return Err(FieldError::hardware(self.sprayer.id(), format!("non-finite duty {duty}")));
        }
        let duty = duty.clamp(0.0, 1.0);
        let result = self.sprayer.set_duty(duty);
        self.spray_duty = if result.is_ok() { duty } else { f64::NAN };
        result
    }

    fn apply(&mut self, command: &MotorCommand) -> Result<(), FieldError> {
        self.drive_left(command.left_duty)?;
        self.drive_right(command.right_duty)?;
        if command.spray_duty == self.spray_duty {
            return Ok(());
        }
        self.set_spray(command.spray_duty)
    }

    fn emergency_stop_all(&mut self) -> Result<(), FieldError> {
        let results = [
            self.left.stop(),
            self.right.stop(),
            self.sprayer.set_duty(0.0),
        ];
        self.spray_duty = if results[2].is_ok() { 0.0 } else { f64::NAN };
        let mut first = None;
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "emergency stop could not command an actuator");
                first.get_or_insert(e);
            }
        }
        match first {
            None => Ok(()),
            Some(e) => {
                warn!("emergency stop completed with failures");
                Err(e)
            }
        }
    }
}
