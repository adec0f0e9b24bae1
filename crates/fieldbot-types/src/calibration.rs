//! [`CalibrationProfile`] – measured constants of one physical robot.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::FieldError;

/// Immutable drive calibration, loaded once at startup.
///
/// Speeds are measured at the configured duty levels: running both wheels
/// at `drive_duty` covers `cm_per_second`, spinning in place at `turn_duty`
/// covers `degrees_per_second`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    #[serde(default = "default_wheel_diameter_cm")]
    pub wheel_diameter_cm: f64,
    /// Distance between the two drive wheels' contact points.
    #[serde(default = "default_wheel_base_cm")]
    pub wheel_base_cm: f64,
    #[serde(default = "default_duty")]
    pub drive_duty: f64,
    #[serde(default = "default_duty")]
    pub turn_duty: f64,
    #[serde(default = "default_cm_per_second")]
    pub cm_per_second: f64,
    #[serde(default = "default_degrees_per_second")]
    pub degrees_per_second: f64,
    /// Proportional gain of the yaw correction loop (duty per degree).
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_wheel_diameter_cm() -> f64 {
    6.5
}
fn default_wheel_base_cm() -> f64 {
    15.0
}
fn default_duty() -> f64 {
    0.3
}
fn default_cm_per_second() -> f64 {
    50.0
}
fn default_degrees_per_second() -> f64 {
    90.0
}
fn default_kp() -> f64 {
    0.02
}
fn default_tick_ms() -> u64 {
    50
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self {
            wheel_diameter_cm: default_wheel_diameter_cm(),
            wheel_base_cm: default_wheel_base_cm(),
            drive_duty: default_duty(),
            turn_duty: default_duty(),
            cm_per_second: default_cm_per_second(),
            degrees_per_second: default_degrees_per_second(),
            kp: default_kp(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl CalibrationProfile {
    /// Length of one control tick.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Reject profiles the kinematics cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), FieldError> {
        let positive = [
            ("wheel_diameter_cm", self.wheel_diameter_cm),
            ("cm_per_second", self.cm_per_second),
            ("degrees_per_second", self.degrees_per_second),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(FieldError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        for (name, value) in [("drive_duty", self.drive_duty), ("turn_duty", self.turn_duty)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FieldError::Config(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        if !(self.wheel_base_cm.is_finite() && self.wheel_base_cm >= 0.0) {
            return Err(FieldError::Config(format!(
                "wheel_base_cm must be non-negative, got {}",
                self.wheel_base_cm
            )));
        }
        if !(self.kp.is_finite() && self.kp >= 0.0) {
            return Err(FieldError::Config(format!("kp must be non-negative, got {}", self.kp)));
        }
        if self.tick_ms == 0 {
            return Err(FieldError::Config("tick_ms must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let profile = CalibrationProfile::default();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.tick(), Duration::from_millis(50));
    }

    #[test]
    fn rejects_zero_speed() {
        let profile = CalibrationProfile {
            cm_per_second: 0.0,
            ..CalibrationProfile::default()
        };
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("cm_per_second"));
    }

    #[test]
    fn rejects_out_of_range_duty() {
        let profile = CalibrationProfile {
            turn_duty: 1.5,
            ..CalibrationProfile::default()
        };
        assert!(matches!(profile.validate(), Err(FieldError::Config(_))));
    }

    #[test]
    fn rejects_zero_tick() {
        let profile = CalibrationProfile {
            tick_ms: 0,
            ..CalibrationProfile::default()
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let profile: CalibrationProfile =
            serde_json::from_str(r#"{"cm_per_second": 42.0, "kp": 0.1}"#).unwrap();
        assert_eq!(profile.cm_per_second, 42.0);
        assert_eq!(profile.kp, 0.1);
        assert_eq!(profile.drive_duty, 0.3);
        assert_eq!(profile.tick_ms, 50);
    }
}
