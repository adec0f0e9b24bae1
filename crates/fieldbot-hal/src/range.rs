//! Forward ranging sensor (e.g. a spinning LiDAR) used for obstacle
//! detection.

use fieldbot_types::FieldError;

/// A single range measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSample {
    /// Bearing in degrees, `[0, 360)`, `0` = straight ahead.
    pub angle_deg: f64,
    /// Measured distance in millimetres; `0` means "no return".
    pub distance_mm: f64,
}

impl RangeSample {
    pub fn new(angle_deg: f64, distance_mm: f64) -> Self {
        Self {
            angle_deg,
            distance_mm,
        }
    }
}

/// An acquired ranging sensor.
pub trait RangeSensor: Send {
    /// Return one full scan.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::SensorUnavailable`] when the device stops
    /// answering (e.g. it was unplugged).
    fn scan(&mut self) -> Result<Vec<RangeSample>, FieldError>;

    /// Stop the device and release its handle.  Called before a reconnect.
    fn release(&mut self) {}
}

/// Acquires (and re-acquires) a [`RangeSensor`].
pub trait RangeSensorConnector: Send {
    type Sensor: RangeSensor;

    /// # Errors
    ///
    /// Returns [`FieldError::SensorUnavailable`] when the device cannot be
    /// opened.
    fn connect(&mut self) -> Result<Self::Sensor, FieldError>;
}
