//! [`ObstacleMonitor`] – forward obstacle detection.
//!
//! Runs on its own OS thread until told to stop.  Every poll it
//! takes the nearest valid return inside the forward sector and feeds it to
//! a [`HysteresisGate`]:
//!
//! ```text
//!   running ──(distance < threshold)──▶ paused
//!   paused  ──(distance ≥ threshold)──▶ running
//! ```
//!
//! Each edge fires exactly once; further polls on the same side are no-ops.
//! There is no band around the threshold, so a reading that hovers right at
//! it can toggle on consecutive polls.
//!
//! When the sensor fails the handle is released and reacquisition is
//! retried forever with [`Backoff`].  A failure never resumes a robot that
//! the monitor paused: it stays paused until a scan shows the path clear.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fieldbot_hal::{RangeSample, RangeSensor, RangeSensorConnector};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::safety_state::SafetyState;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables for the obstacle monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Pause when the nearest forward return is closer than this.
    pub threshold_mm: f64,
    /// Half-width of the forward sector, degrees either side of 0°.
    pub half_angle_deg: f64,
    pub poll_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold_mm: 1000.0,
            half_angle_deg: 30.0,
            poll_interval: Duration::from_millis(100),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(10),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sector filter
// ────────────────────────────────────────────────────────────────────────────

/// `true` when `angle_deg` lies within `half_angle_deg` of straight ahead.
/// The sector wraps around 0°/360°.
pub fn in_front_sector(angle_deg: f64, half_angle_deg: f64) -> bool {
    let angle = angle_deg.rem_euclid(360.0);
    angle <= half_angle_deg || angle >= 360.0 - half_angle_deg
}

/// Nearest valid distance inside the forward sector.
///
/// Zero-distance samples (no return) are ignored.  `None` when the scan has
/// no valid sample in the sector.
pub fn front_sector_min(samples: &[RangeSample], half_angle_deg: f64) -> Option<f64> {
    samples
        .iter()
        .filter(|s| s.distance_mm > 0.0 && in_front_sector(s.angle_deg, half_angle_deg))
        .map(|s| s.distance_mm)
        .min_by(f64::total_cmp)
}

// ────────────────────────────────────────────────────────────────────────────
// Hysteresis gate
// ────────────────────────────────────────────────────────────────────────────

/// An edge emitted by the [`HysteresisGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Pause,
    Resume,
}

/// Two-state threshold gate.  Pure: it only decides, the monitor acts.
#[derive(Debug, Clone)]
pub struct HysteresisGate {
    threshold_mm: f64,
    paused: bool,
}

impl HysteresisGate {
    pub fn new(threshold_mm: f64, paused: bool) -> Self {
        Self {
            threshold_mm,
            paused,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Feed one distance; returns the edge it causes, if any.
    pub fn observe(&mut self, distance_mm: f64) -> Option<Transition> {
        let blocked = distance_mm < self.threshold_mm;
        match (self.paused, blocked) {
            (false, true) => {
                self.paused = true;
                Some(Transition::Pause)
            }
            (true, false) => {
                self.paused = false;
                Some(Transition::Resume)
            }
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Monitor loop
// ────────────────────────────────────────────────────────────────────────────

/// Polls a [`RangeSensorConnector`]'s sensor and drives
/// [`SafetyState::pause`] / [`SafetyState::resume`].
pub struct ObstacleMonitor<C: RangeSensorConnector> {
    connector: C,
    sensor: Option<C::Sensor>,
    safety: Arc<SafetyState>,
    config: MonitorConfig,
    gate: HysteresisGate,
    backoff: Backoff,
}

impl<C: RangeSensorConnector> ObstacleMonitor<C> {
    pub fn new(connector: C, safety: Arc<SafetyState>, config: MonitorConfig) -> Self {
        let gate = HysteresisGate::new(config.threshold_mm, safety.is_paused());
        let backoff = Backoff::new(config.backoff_initial, config.backoff_max);
        Self {
            connector,
            sensor: None,
            safety,
            config,
            gate,
            backoff,
        }
    }

    /// `true` while a sensor handle is held.
    pub fn is_connected(&self) -> bool {
        self.sensor.is_some()
    }

    /// Run one poll and return how long to sleep before the next one.
    pub fn tick(&mut self) -> Duration {
        if self.sensor.is_none() {
            match self.connector.connect() {
                Ok(sensor) => {
                    info!("range sensor connected");
                    self.backoff.reset();
                    self.sensor = Some(sensor);
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "range sensor unavailable");
                    return delay;
                }
            }
        }
        let Some(sensor) = self.sensor.as_mut() else {
            return self.config.poll_interval;
        };

        match sensor.scan() {
            Ok(samples) => {
                match front_sector_min(&samples, self.config.half_angle_deg) {
                    Some(distance) => self.apply(distance),
                    None => debug!("no valid return in forward sector"),
                }
                self.config.poll_interval
            }
            Err(e) => {
                error!(error = %e, "range sensor read failed, releasing handle");
                sensor.release();
                self.sensor = None;
                self.backoff.next_delay()
            }
        }
    }

    fn apply(&mut self, distance_mm: f64) {
        match self.gate.observe(distance_mm) {
            Some(Transition::Pause) => {
                self.safety.pause();
                warn!(distance_mm, threshold_mm = self.config.threshold_mm, "obstacle ahead, pausing");
            }
            Some(Transition::Resume) => {
                self.safety.resume();
                info!(distance_mm, "path clear, resuming");
            }
            None => {}
        }
    }

    /// Poll until `stop` is raised.
    pub fn run_until(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            let delay = self.tick();
            sleep_unless_stopped(delay, stop);
        }
        if let Some(sensor) = self.sensor.as_mut() {
            sensor.release();
        }
        self.sensor = None;
    }
}

impl<C> ObstacleMonitor<C>
where
    C: RangeSensorConnector + 'static,
    C::Sensor: 'static,
{
    /// Run on a dedicated thread until `stop` is raised.
    pub fn spawn(mut self, stop: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("obstacle-monitor".into())
            .spawn(move || self.run_until(&stop))
    }
}

fn sleep_unless_stopped(delay: Duration, stop: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(20);
    let deadline = Instant::now() + delay;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldbot_hal::sim::SimLidar;

    fn monitor(lidar: &SimLidar) -> (ObstacleMonitor<fieldbot_hal::sim::SimLidarConnector>, Arc<SafetyState>) {
        let safety = Arc::new(SafetyState::new());
        let m = ObstacleMonitor::new(lidar.connector(), Arc::clone(&safety), MonitorConfig::default());
        (m, safety)
    }

    #[test]
    fn sector_wraps_around_zero() {
        assert!(in_front_sector(0.0, 30.0));
        assert!(in_front_sector(30.0, 30.0));
        assert!(in_front_sector(330.0, 30.0));
        assert!(in_front_sector(-10.0, 30.0));
        assert!(!in_front_sector(31.0, 30.0));
        assert!(!in_front_sector(180.0, 30.0));
    }

    #[test]
    fn sector_min_ignores_zero_and_side_returns() {
        let samples = [
            RangeSample::new(350.0, 900.0),
            RangeSample::new(5.0, 0.0),
            RangeSample::new(90.0, 50.0),
            RangeSample::new(20.0, 1500.0),
        ];
        assert_eq!(front_sector_min(&samples, 30.0), Some(900.0));
    }

    #[test]
    fn sector_min_without_valid_samples_is_none() {
        let samples = [RangeSample::new(0.0, 0.0), RangeSample::new(180.0, 10.0)];
        assert_eq!(front_sector_min(&samples, 30.0), None);
    }

    #[test]
    fn gate_pauses_once_and_resumes_once() {
        let mut gate = HysteresisGate::new(1000.0, false);
        assert_eq!(gate.observe(400.0), Some(Transition::Pause));
        assert_eq!(gate.observe(300.0), None);
        assert_eq!(gate.observe(999.9), None);
        assert_eq!(gate.observe(1000.0), Some(Transition::Resume));
        assert_eq!(gate.observe(2000.0), None);
        assert!(!gate.is_paused());
    }

    #[test]
    fn monitor_pauses_and_resumes_safety_state() {
        let lidar = SimLidar::new(500.0);
        let (mut m, safety) = monitor(&lidar);

        assert_eq!(m.tick(), Duration::from_millis(100));
        assert!(safety.is_paused());
        m.tick();
        assert!(safety.is_paused());

        lidar.set_distance(1500.0);
        m.tick();
        assert!(!safety.is_paused());
        assert_eq!(lidar.connects(), 1);
    }

    #[test]
    fn sensor_loss_keeps_robot_paused_and_backs_off() {
        let lidar = SimLidar::new(200.0);
        let (mut m, safety) = monitor(&lidar);
        m.tick();
        assert!(safety.is_paused());

        lidar.set_online(false);
        assert_eq!(m.tick(), Duration::from_secs(1));
        assert_eq!(lidar.releases(), 1);
        assert!(!m.is_connected());
        assert_eq!(m.tick(), Duration::from_secs(2));
        assert_eq!(m.tick(), Duration::from_secs(4));
        assert!(safety.is_paused());

        lidar.set_distance(3000.0);
        lidar.set_online(true);
        m.tick();
        assert!(m.is_connected());
        assert!(!safety.is_paused());
        assert_eq!(lidar.connects(), 2);
    }

    #[test]
    fn successful_connect_resets_backoff() {
        let lidar = SimLidar::new(3000.0);
        lidar.set_online(false);
        let (mut m, _safety) = monitor(&lidar);
        assert_eq!(m.tick(), Duration::from_secs(1));
        assert_eq!(m.tick(), Duration::from_secs(2));
        lidar.set_online(true);
        m.tick();
        lidar.set_online(false);
        assert_eq!(m.tick(), Duration::from_secs(1));
    }

    #[test]
    fn run_until_stops_and_releases_sensor() {
        let lidar = SimLidar::new(300.0);
        let (mut m, safety) = monitor(&lidar);
        let stop = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| m.run_until(&stop));
            let deadline = Instant::now() + Duration::from_secs(5);
            while !safety.is_paused() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            stop.store(true, Ordering::SeqCst);
        });
        assert!(safety.is_paused());
        assert_eq!(lidar.releases(), 1);
    }

    #[test]
    fn spawned_monitor_joins_after_stop() {
        let lidar = SimLidar::new(3000.0);
        let (m, safety) = monitor(&lidar);
        let stop = Arc::new(AtomicBool::new(false));
        let join = m.spawn(Arc::clone(&stop)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while lidar.connects() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        stop.store(true, Ordering::SeqCst);
        join.join().unwrap();
        assert!(!safety.is_paused());
        assert_eq!(lidar.releases(), 1);
    }
}
