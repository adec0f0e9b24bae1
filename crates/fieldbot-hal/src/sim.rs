//! In-process simulated hardware for tests and hardware-free runs.
//!
//! Every simulated actuator appends to a shared [`SimLog`] so a test can
//! hand the drive to the motion engine and still assert on the exact
//! sequence of commands afterwards.  Long-running processes give the log a
//! capacity so it keeps only the most recent commands.  Faults can be
//! injected to exercise the emergency-stop path.
//!
//! # Example
//!
//! ```rust
//! use fieldbot_hal::ActuatorDrive;
//! use fieldbot_hal::sim::SimRig;
//!
//! let (mut drive, log) = SimRig::new().build();
//! drive.drive_left(0.3).unwrap();
//! drive.emergency_stop_all().unwrap();
//! assert_eq!(log.last_wheel("left_wheel"), 0.0);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fieldbot_types::FieldError;

use crate::battery::BatterySource;
use crate::drive::{DifferentialDrive, Direction, Motor, Sprayer};
use crate::heading::HeadingSensor;
use crate::range::{RangeSample, RangeSensor, RangeSensorConnector};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Command log
// ────────────────────────────────────────────────────────────────────────────

/// One recorded actuator command.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// Signed wheel duty (`0.0` = stopped).
    Wheel { id: String, duty: f64 },
    Spray(f64),
}

#[derive(Debug, Default)]
struct LogBuffer {
    events: VecDeque<SimEvent>,
    capacity: Option<usize>,
}

/// Shared, append-only record of simulated actuator commands.
#[derive(Debug, Clone, Default)]
pub struct SimLog {
    events: Arc<Mutex<LogBuffer>>,
}

impl SimLog {
    /// A log that keeps only the most recent `capacity` commands.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(LogBuffer {
                events: VecDeque::new(),
                capacity: Some(capacity),
            })),
        }
    }

    fn push(&self, event: SimEvent) {
        let mut buffer = lock(&self.events);
        if let Some(capacity) = buffer.capacity {
            if capacity == 0 {
                return;
            }
            while buffer.events.len() >= capacity {
                buffer.events.pop_front();
            }
        }
        buffer.events.push_back(event);
    }

    pub fn events(&self) -> Vec<SimEvent> {
        lock(&self.events).events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).events.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).events.is_empty()
    }

    pub fn clear(&self) {
        lock(&self.events).events.clear();
    }

    /// Every duty commanded to wheel `id`, in order.
    pub fn wheel_duties(&self, id: &str) -> Vec<f64> {
        lock(&self.events)
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Wheel { id: w, duty } if w == id => Some(*duty),
                _ => None,
            })
            .collect()
    }

    /// Every spray duty commanded, in order.
    pub fn spray_duties(&self) -> Vec<f64> {
        lock(&self.events)
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Spray(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Most recent duty of wheel `id` (`0.0` if never commanded).
    pub fn last_wheel(&self, id: &str) -> f64 {
        self.wheel_duties(id).last().copied().unwrap_or(0.0)
    }

    /// Most recent spray duty (`0.0` if never commanded).
    pub fn last_spray(&self) -> f64 {
        self.spray_duties().last().copied().unwrap_or(0.0)
    }

    /// `true` when both wheels and the sprayer were last commanded to zero.
    pub fn is_stopped(&self) -> bool {
        self.last_wheel(LEFT_WHEEL) == 0.0
            && self.last_wheel(RIGHT_WHEEL) == 0.0
            && self.last_spray() == 0.0
    }
}

pub const LEFT_WHEEL: &str = "left_wheel";
pub const RIGHT_WHEEL: &str = "right_wheel";

// ────────────────────────────────────────────────────────────────────────────
// Stub actuators
// ────────────────────────────────────────────────────────────────────────────

/// Simulated wheel motor.  Optionally starts rejecting drive commands after
/// a number of successful ones; stopping always succeeds.
pub struct SimMotor {
    id: String,
    log: SimLog,
    fail_after: Option<usize>,
    commands: usize,
}

impl SimMotor {
    pub fn new(id: impl Into<String>, log: SimLog) -> Self {
        Self {
            id: id.into(),
            log,
            fail_after: None,
            commands: 0,
        }
    }

    /// Accept `n` drive commands, then fail every following one.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl Motor for SimMotor {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_output(&mut self, direction: Direction, magnitude: f64) -> Result<(), FieldError> {
        self.commands += 1;
        if self.fail_after.is_some_and(|n| self.commands > n) {
            return Err(FieldError::hardware(&self.id, "simulated driver fault"));
        }
        let duty = match direction {
            Direction::Forward => magnitude,
            Direction::Reverse => -magnitude,
        };
        self.log.push(SimEvent::Wheel {
            id: self.id.clone(),
            duty,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FieldError> {
        self.log.push(SimEvent::Wheel {
            id: self.id.clone(),
            duty: 0.0,
        });
        Ok(())
    }
}

/// Simulated sprayer valve.
pub struct SimSprayer {
    log: SimLog,
}

impl SimSprayer {
    pub fn new(log: SimLog) -> Self {
        Self { log }
    }
}

impl Sprayer for SimSprayer {
    fn id(&self) -> &str {
        "sprayer"
    }

    fn set_duty(&mut self, duty: f64) -> Result<(), FieldError> {
        self.log.push(SimEvent::Spray(duty));
        Ok(())
    }
}

/// A fully simulated differential drive.
pub type SimDrive = DifferentialDrive<SimMotor, SimMotor, SimSprayer>;

/// Builder for a [`SimDrive`] and the [`SimLog`] it records into.
#[derive(Default)]
pub struct SimRig {
    left_fail_after: Option<usize>,
    log_capacity: Option<usize>,
}

impl SimRig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the left wheel reject drive commands after `n` successes.
    pub fn with_left_fault_after(mut self, n: usize) -> Self {
        self.left_fail_after = Some(n);
        self
    }

    /// Record only the most recent `capacity` commands.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> (SimDrive, SimLog) {
        let log = self.log_capacity.map_or_else(SimLog::default, SimLog::bounded);
        let mut left = SimMotor::new(LEFT_WHEEL, log.clone());
        if let Some(n) = self.left_fail_after {
            left = left.failing_after(n);
        }
        let right = SimMotor::new(RIGHT_WHEEL, log.clone());
        let sprayer = SimSprayer::new(log.clone());
        (DifferentialDrive::new(left, right, sprayer), log)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub heading sensor
// ────────────────────────────────────────────────────────────────────────────

type ReadHook = Box<dyn FnMut(usize) + Send>;

/// Scripted heading sensor: constant or linearly drifting yaw, optional
/// failure after a number of reads, and an optional hook invoked on every
/// read (with the 1-based read count) so tests can inject events mid-motion.
pub struct SimHeading {
    yaw: f64,
    drift_per_read: f64,
    fail_after: Option<usize>,
    reads: Arc<AtomicUsize>,
    hook: Option<ReadHook>,
}

impl SimHeading {
    pub fn constant(yaw: f64) -> Self {
        Self {
            yaw,
            drift_per_read: 0.0,
            fail_after: None,
            reads: Arc::new(AtomicUsize::new(0)),
            hook: None,
        }
    }

    /// Yaw grows by `per_read` degrees on every read.
    pub fn drifting(per_read: f64) -> Self {
        Self {
            drift_per_read: per_read,
            ..Self::constant(0.0)
        }
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn with_hook(mut self, hook: impl FnMut(usize) + Send + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Shared counter of reads performed so far.
    pub fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl HeadingSensor for SimHeading {
    fn current_yaw(&mut self) -> Result<f64, FieldError> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = self.hook.as_mut() {
            hook(n);
        }
        if self.fail_after.is_some_and(|limit| n > limit) {
            return Err(FieldError::hardware("gyro", "simulated read failure"));
        }
        let yaw = self.yaw;
        self.yaw += self.drift_per_read;
        Ok(yaw)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub LiDAR
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct LidarState {
    online: bool,
    distance_mm: f64,
    connects: usize,
    releases: usize,
}

/// Controllable simulated LiDAR.  Clone the handle to steer the obstacle
/// distance or unplug the device while a monitor owns the sensor.
#[derive(Debug, Clone)]
pub struct SimLidar {
    state: Arc<Mutex<LidarState>>,
}

impl SimLidar {
    /// An online LiDAR reporting `distance_mm` straight ahead.
    pub fn new(distance_mm: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(LidarState {
                online: true,
                distance_mm,
                connects: 0,
                releases: 0,
            })),
        }
    }

    pub fn set_distance(&self, distance_mm: f64) {
        lock(&self.state).distance_mm = distance_mm;
    }

    /// Plug (`true`) or unplug (`false`) the device.
    pub fn set_online(&self, online: bool) {
        lock(&self.state).online = online;
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn releases(&self) -> usize {
        lock(&self.state).releases
    }

    pub fn connector(&self) -> SimLidarConnector {
        SimLidarConnector {
            lidar: self.clone(),
        }
    }
}

/// [`RangeSensorConnector`] for a [`SimLidar`].
pub struct SimLidarConnector {
    lidar: SimLidar,
}

impl RangeSensorConnector for SimLidarConnector {
    type Sensor = SimLidarSensor;

    fn connect(&mut self) -> Result<SimLidarSensor, FieldError> {
        let mut state = lock(&self.lidar.state);
        if !state.online {
            return Err(FieldError::SensorUnavailable("simulated lidar unplugged".into()));
        }
        state.connects += 1;
        Ok(SimLidarSensor {
            lidar: self.lidar.clone(),
        })
    }
}

/// An acquired [`SimLidar`].
pub struct SimLidarSensor {
    lidar: SimLidar,
}

impl RangeSensor for SimLidarSensor {
    /// One scan: the configured obstacle dead ahead, a close wall abeam
    /// (outside any forward sector) and a dropped return.
    fn scan(&mut self) -> Result<Vec<RangeSample>, FieldError> {
        let state = lock(&self.lidar.state);
        if !state.online {
            return Err(FieldError::SensorUnavailable("simulated lidar disconnected".into()));
        }
        Ok(vec![
            RangeSample::new(0.0, state.distance_mm),
            RangeSample::new(90.0, 120.0),
            RangeSample::new(10.0, 0.0),
        ])
    }

    fn release(&mut self) {
        lock(&self.lidar.state).releases += 1;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub battery
// ────────────────────────────────────────────────────────────────────────────

/// Battery with a settable charge level.
#[derive(Debug)]
pub struct SimBattery {
    percent: Mutex<f64>,
}

impl SimBattery {
    pub fn new(percent: f64) -> Self {
        Self {
            percent: Mutex::new(percent),
        }
    }

    pub fn set_percent(&self, percent: f64) {
        *lock(&self.percent) = percent;
    }
}

impl BatterySource for SimBattery {
    fn battery_percent(&self) -> Result<f64, FieldError> {
        Ok(*lock(&self.percent))
    }
}
