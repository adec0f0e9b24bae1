//! Direct remote-control actuation.
//!
//! The operator's app sends one message per button edge:
//! `{"command": "forward", "state": "pressed"}`.  Movement buttons drive the
//! wheels while held and halt them on release; the spray button opens the
//! valve while held.
//!
//! A held movement stays latched on the executor until it is released,
//! stopped, or halted by [`MotionExecutor::hold_manual_motion`] when the
//! obstacle monitor pauses the robot.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fieldbot_hal::{ActuatorDrive, HeadingSensor};
use fieldbot_types::FieldError;

use crate::executor::MotionExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualCommand {
    Forward,
    Backward,
    Left,
    Right,
    Spray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonState {
    Pressed,
    Released,
}

/// One button edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAction {
    pub command: ManualCommand,
    pub state: ButtonState,
}

impl ManualAction {
    pub fn new(command: ManualCommand, state: ButtonState) -> Self {
        Self { command, state }
    }
}

impl<D: ActuatorDrive, H: HeadingSensor> MotionExecutor<D, H> {
    /// Apply one manual button edge.
    ///
    /// Pressing a movement button while the obstacle monitor holds the
    /// robot paused is refused (the wheels stay halted).  Releases and the
    /// spray button are always honoured.  A pause arriving while a button is
    /// held is handled by [`MotionExecutor::hold_manual_motion`].
    ///
    /// # Errors
    ///
    /// Returns the drive's [`FieldError::HardwareFault`] after
    /// emergency-stopping.
    pub fn manual(&mut self, action: ManualAction) -> Result<(), FieldError> {
        let result = self.apply_manual(action);
        if let Err(e) = &result {
            warn!(error = %e, ?action, "manual command failed, stopping all actuators");
            self.emergency_stop();
        }
        result
    }

    fn apply_manual(&mut self, action: ManualAction) -> Result<(), FieldError> {
        use ButtonState::{Pressed, Released};
        use ManualCommand::*;

        debug!(?action, "manual command");
        let drive = self.profile.drive_duty;
        let turn = self.profile.turn_duty;
        let duties = match (action.command, action.state) {
            (Spray, Pressed) => return self.set_spray(1.0),
            (Spray, Released) => return self.set_spray(0.0),
            (_, Released) => {
                self.manual_motion = None;
                return self.drive.halt_wheels();
            }
            (Forward, Pressed) => (drive, drive),
            (Backward, Pressed) => (-drive, -drive),
            (Left, Pressed) => (-turn, turn),
            (Right, Pressed) => (turn, -turn),
        };

        if self.safety.is_paused() {
            warn!(?action, "obstacle ahead, manual movement refused");
            return Ok(());
        }
        self.drive.drive_left(duties.0)?;
        self.drive.drive_right(duties.1)?;
        self.manual_motion = Some(duties);
        Ok(())
    }

    /// `true` while a manual movement button is held and driving the wheels.
    pub fn manual_motion_active(&self) -> bool {
        self.manual_motion.is_some()
    }

    /// Halt a held manual movement once the robot is paused.
    ///
    /// The operator has to press the button again after the obstacle
    /// clears.  Does nothing when no movement is held or the robot is not
    /// paused.
    pub fn hold_manual_motion(&mut self) {
        if self.manual_motion.is_none() || !self.safety.is_paused() {
            return;
        }
        self.manual_motion = None;
        warn!("obstacle ahead, halting manual movement");
        if let Err(e) = self.drive.halt_wheels() {
            warn!(error = %e, "could not halt manual movement, stopping all actuators");
            self.emergency_stop();
        }
    }
}
