//! Battery state-of-charge for telemetry.
//!
//! Voltage sampling is done by an external ADC behind [`VoltageReader`];
//! [`VoltageBattery`] scales the divided reading back up and maps it onto a
//! linear [`VoltageCurve`].

use fieldbot_types::FieldError;

/// Battery charge in percent, `[0, 100]`.
pub trait BatterySource: Send + Sync {
    fn battery_percent(&self) -> Result<f64, FieldError>;
}

/// Raw voltage at the ADC pin.
pub trait VoltageReader: Send + Sync {
    fn read_voltage(&self) -> Result<f64, FieldError>;
}

/// Linear empty→full voltage mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageCurve {
    pub empty_volts: f64,
    pub full_volts: f64,
}

impl Default for VoltageCurve {
    /// Single Li-ion cell.
    fn default() -> Self {
        Self {
            empty_volts: 3.0,
            full_volts: 4.2,
        }
    }
}

impl VoltageCurve {
    pub fn percent(&self, volts: f64) -> f64 {
        let span = self.full_volts - self.empty_volts;
        if span <= 0.0 {
            return 0.0;
        }
        ((volts - self.empty_volts) / span * 100.0).clamp(0.0, 100.0)
    }
}

/// [`BatterySource`] backed by an ADC behind a resistor divider.
pub struct VoltageBattery<R> {
    reader: R,
    divider_ratio: f64,
    curve: VoltageCurve,
}

impl<R: VoltageReader> VoltageBattery<R> {
    /// `divider_ratio` multiplies the pin voltage back to pack voltage
    /// (10 kΩ / 27 kΩ divider → `3.7`).
    pub fn new(reader: R, divider_ratio: f64, curve: VoltageCurve) -> Self {
        Self {
            reader,
            divider_ratio,
            curve,
        }
    }
}

impl<R: VoltageReader> BatterySource for VoltageBattery<R> {
    fn battery_percent(&self) -> Result<f64, FieldError> {
        let volts = self.reader.read_voltage()? * self.divider_ratio;
        Ok(self.curve.percent(volts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPin(f64);

    impl VoltageReader for FixedPin {
        fn read_voltage(&self) -> Result<f64, FieldError> {
            Ok(self.0)
        }
    }

    #[test]
    fn curve_is_linear_and_clamped() {
        let curve = VoltageCurve::default();
        assert!((curve.percent(3.6) - 50.0).abs() < 1e-9);
        assert_eq!(curve.percent(2.5), 0.0);
        assert_eq!(curve.percent(5.0), 100.0);
    }

    #[test]
    fn degenerate_curve_reports_zero() {
        let curve = VoltageCurve {
            empty_volts: 4.0,
            full_volts: 4.0,
        };
        assert_eq!(curve.percent(4.1), 0.0);
    }

    #[test]
    fn divider_ratio_is_applied() {
        let battery = VoltageBattery::new(FixedPin(1.0), 3.7, VoltageCurve::default());
        // 3.7 V on a 3.0–4.2 V cell → 58.33 %
        let pct = battery.battery_percent().unwrap();
        assert!((pct - 58.333_333).abs() < 1e-3);
    }
}
