//! Proportional yaw correction for straight and curved drives.
//!
//! The controller turns a heading error (degrees, positive = the robot has
//! rotated counter-clockwise further than intended) into a duty correction
//! that is added to the left wheel and removed from the right wheel, so the
//! over-driving side slows down.  Proportional only: no integral wind-up to
//! manage and no derivative noise from a jittery gyro.
//!
//! # Example
//!
//! ```rust
//! use fieldbot_hal::heading_controller::HeadingController;
//!
//! let ctl = HeadingController::new(0.02);
//! // Drifted 5° counter-clockwise: slow the right wheel, speed up the left.
//! let (left, right) = ctl.correct(0.3, 0.3, 5.0);
//! assert!(left > 0.3 && right < 0.3);
//! ```

/// Proportional heading controller.
#[derive(Debug, Clone)]
pub struct HeadingController {
    kp: f64,
}

impl HeadingController {
    /// Create a controller with gain `kp` (duty per degree of error).
    pub fn new(kp: f64) -> Self {
        Self { kp }
    }

    /// Duty correction for a heading error in degrees.
    pub fn correction(&self, error_deg: f64) -> f64 {
        self.kp * error_deg
    }

    /// Apply the correction for `error_deg` to a base duty pair, returning
    /// `(left, right)` clamped to `[0, 1]`.
    pub fn correct(&self, base_left: f64, base_right: f64, error_deg: f64) -> (f64, f64) {
        let c = self.correction(error_deg);
        ((base_left + c).clamp(0.0, 1.0), (base_right - c).clamp(0.0, 1.0))
    }
}
