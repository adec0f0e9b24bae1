//! Heading (yaw) estimation.
//!
//! The motion engine only needs the integrated yaw angle.  [`IntegratedYaw`]
//! produces it from any [`GyroRate`] source by integrating the z-axis rate
//! over the wall time elapsed between reads:
//!
//! ```text
//! yaw += rate_z · dt
//! ```
//!
//! Counter-clockwise rotation is positive.

use std::time::Instant;

use fieldbot_types::FieldError;

/// Integrated heading estimate, in degrees.
pub trait HeadingSensor: Send {
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] when the underlying sensor
    /// cannot be read.
    fn current_yaw(&mut self) -> Result<f64, FieldError>;
}

/// Raw angular rate about the vertical axis, in degrees per second.
pub trait GyroRate: Send {
    fn yaw_rate(&mut self) -> Result<f64, FieldError>;
}

/// [`HeadingSensor`] that integrates a [`GyroRate`] over time.
pub struct IntegratedYaw<G> {
    gyro: G,
    yaw: f64,
    last_sample: Option<Instant>,
}

impl<G: GyroRate> IntegratedYaw<G> {
    pub fn new(gyro: G) -> Self {
        Self {
            gyro,
            yaw: 0.0,
            last_sample: None,
        }
    }

    /// Sample the gyro as of `now` and fold it into the estimate.
    ///
    /// The first sample only establishes the time base and returns the
    /// current estimate unchanged.
    pub fn sample_at(&mut self, now: Instant) -> Result<f64, FieldError> {
        let rate = self.gyro.yaw_rate()?;
        if let Some(last) = self.last_sample {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            self.yaw += rate * dt;
        }
        self.last_sample = Some(now);
        Ok(self.yaw)
    }

    /// Re-zero the estimate and forget the time base.
    pub fn reset(&mut self) {
        self.yaw = 0.0;
        self.last_sample = None;
    }
}

impl<G: GyroRate> HeadingSensor for IntegratedYaw<G> {
    fn current_yaw(&mut self) -> Result<f64, FieldError> {
        self.sample_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct ConstantRate(f64);

    impl GyroRate for ConstantRate {
        fn yaw_rate(&mut self) -> Result<f64, FieldError> {
            Ok(self.0)
        }
    }

    struct BrokenGyro;

    impl GyroRate for BrokenGyro {
        fn yaw_rate(&mut self) -> Result<f64, FieldError> {
            Err(FieldError::hardware("mpu6050", "i2c nack"))
        }
    }

    #[test]
    fn first_sample_does_not_integrate() {
        let mut yaw = IntegratedYaw::new(ConstantRate(100.0));
        assert_eq!(yaw.sample_at(Instant::now()).unwrap(), 0.0);
    }

    #[test]
    fn integrates_rate_over_elapsed_time() {
        let mut yaw = IntegratedYaw::new(ConstantRate(20.0));
        let t0 = Instant::now();
        yaw.sample_at(t0).unwrap();
        let est = yaw.sample_at(t0 + Duration::from_millis(500)).unwrap();
        assert!((est - 10.0).abs() < 1e-9);
        let est = yaw.sample_at(t0 + Duration::from_millis(1500)).unwrap();
        assert!((est - 30.0).abs() < 1e-9);
    }

    #[test]
    fn reset_rezeroes() {
        let mut yaw = IntegratedYaw::new(ConstantRate(-45.0));
        let t0 = Instant::now();
        yaw.sample_at(t0).unwrap();
        yaw.sample_at(t0 + Duration::from_secs(1)).unwrap();
        yaw.reset();
        assert_eq!(yaw.sample_at(t0 + Duration::from_secs(2)).unwrap(), 0.0);
    }

    #[test]
    fn gyro_failure_propagates() {
        let mut yaw = IntegratedYaw::new(BrokenGyro);
        assert!(matches!(
            yaw.current_yaw(),
            Err(FieldError::HardwareFault { .. })
        ));
    }
}
