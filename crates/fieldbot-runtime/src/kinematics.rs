//! Open-loop motion planning.
//!
//! Pure functions from a [`CalibrationProfile`] and an [`Instruction`] to a
//! [`MotionPlan`]: base wheel duties, a duration, and which kind of yaw
//! correction the executor should layer on top.  No I/O.
//!
//! # Sign convention
//!
//! Yaw is counter-clockwise positive, everywhere.
//!
//! | Motion | Left duty | Right duty | Yaw change |
//! |---|---|---|---|
//! | Walk, `q ≥ 0` | `+drive` | `+drive` | 0 |
//! | Walk, `q < 0` | `−drive` | `−drive` | 0 |
//! | Rotate, `q ≥ 0` | `−turn` | `+turn` | `+q` |
//! | Rotate, `q < 0` | `+turn` | `−turn` | `q` |
//! | Arc, `r ≥ 0` | inner | `+drive` | `+angle` |
//! | Arc, `r < 0` | `+drive` | inner | `−angle` |
//!
//! [`trace_path`] follows the same table, so any path drawn from it matches
//! what the robot does.

use std::f64::consts::PI;
use std::time::Duration;

use fieldbot_types::{CalibrationProfile, Instruction, InstructionKind, Pattern};

/// Closed-loop correction to apply while a plan runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Open loop (rotations, reverse walks, waits).
    None,
    /// Hold the heading captured at the start.
    Straight,
    /// Track a heading that changes linearly by `sweep_deg` over the plan.
    Arc { sweep_deg: f64 },
}

/// Base duties and duration for one instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionPlan {
    pub left_duty: f64,
    pub right_duty: f64,
    pub duration_secs: f64,
    pub correction: Correction,
}

impl MotionPlan {
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_secs).unwrap_or(Duration::ZERO)
    }

    /// Number of control ticks needed to cover the duration.
    pub fn ticks(&self, tick: Duration) -> u64 {
        let tick = tick.as_secs_f64();
        if tick <= 0.0 || !(self.duration_secs > 0.0) {
            return 0;
        }
        // Absorb float noise so 0.1 s / 10 ms is 10 ticks, not 11.
        (self.duration_secs / tick - 1e-9).ceil().max(0.0) as u64
    }
}

/// Straight line of `cm` centimetres.
pub fn walk(profile: &CalibrationProfile, cm: f64) -> MotionPlan {
    let duty = if cm < 0.0 { -profile.drive_duty } else { profile.drive_duty };
    MotionPlan {
        left_duty: duty,
        right_duty: duty,
        duration_secs: cm.abs() / profile.cm_per_second,
        correction: if cm < 0.0 { Correction::None } else { Correction::Straight },
    }
}

/// In-place spin of `degrees`; positive is counter-clockwise.
pub fn rotate(profile: &CalibrationProfile, degrees: f64) -> MotionPlan {
    let turn = profile.turn_duty;
    let (left_duty, right_duty) = if degrees >= 0.0 { (-turn, turn) } else { (turn, -turn) };
    MotionPlan {
        left_duty,
        right_duty,
        duration_secs: degrees.abs() / profile.degrees_per_second,
        correction: Correction::None,
    }
}

/// Arc of `radius_cm` (to the robot's centre) sweeping `angle_deg`.
///
/// The inner wheel runs proportionally slower; when the inner radius is not
/// positive the inner wheel stops entirely and the robot pivots.
pub fn arc(profile: &CalibrationProfile, radius_cm: f64, angle_deg: f64) -> MotionPlan {
    let radius = radius_cm.abs();
    let half_base = profile.wheel_base_cm / 2.0;
    let outer = radius + half_base;
    let inner = radius - half_base;

    let outer_duty = profile.drive_duty;
    let inner_duty = if pivots(profile, radius_cm) {
        0.0
    } else {
        profile.drive_duty * inner / outer
    };

    let sweep = angle_deg.abs();
    let duration_secs = 2.0 * PI * outer / profile.cm_per_second * (sweep / 360.0);
    let (left_duty, right_duty, sweep_deg) = if radius_cm >= 0.0 {
        (inner_duty, outer_duty, sweep)
    } else {
        (outer_duty, inner_duty, -sweep)
    };

    MotionPlan {
        left_duty,
        right_duty,
        duration_secs,
        correction: Correction::Arc { sweep_deg },
    }
}

/// `true` when an arc of `radius_cm` is too tight for the inner wheel to
/// turn forward, so the robot pivots on it instead.
fn pivots(profile: &CalibrationProfile, radius_cm: f64) -> bool {
    let half_base = profile.wheel_base_cm / 2.0;
    radius_cm.abs() - half_base <= 0.0 || radius_cm.abs() + half_base <= 0.0
}

/// Idle for `seconds`.
pub fn wait(seconds: f64) -> MotionPlan {
    MotionPlan {
        left_duty: 0.0,
        right_duty: 0.0,
        duration_secs: seconds.max(0.0),
        correction: Correction::None,
    }
}

/// Plan any timed instruction.  `None` for instant or unknown kinds.
pub fn plan(profile: &CalibrationProfile, instruction: &Instruction) -> Option<MotionPlan> {
    match instruction.kind {
        InstructionKind::Walk => Some(walk(profile, instruction.quantity)),
        InstructionKind::Rotate => Some(rotate(profile, instruction.quantity)),
        InstructionKind::Arc => Some(arc(profile, instruction.quantity, instruction.angle)),
        InstructionKind::Wait => Some(wait(instruction.quantity)),
        InstructionKind::SprayOn | InstructionKind::SprayOff | InstructionKind::Unknown(_) => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Dead reckoning
// ────────────────────────────────────────────────────────────────────────────

/// Planar pose: position in centimetres, heading in degrees (0 = +x,
/// counter-clockwise positive).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading_deg: f64,
    /// Whether the segment ending at this pose was painted.
    pub painted: bool,
}

impl Pose {
    pub const ORIGIN: Pose = Pose {
        x: 0.0,
        y: 0.0,
        heading_deg: 0.0,
        painted: false,
    };
}

/// Ideal poses visited by `pattern`, starting at [`Pose::ORIGIN`].
///
/// One pose is appended per walk, rotate or arc.  Spray toggles affect the
/// `painted` flag of later segments; waits and unknown steps are skipped.
/// Arcs too tight for `profile` are traced as a pivot on the inner wheel,
/// as [`arc`] drives them.
pub fn trace_path(profile: &CalibrationProfile, pattern: &Pattern) -> Vec<Pose> {
    let mut pose = Pose::ORIGIN;
    let mut spraying = false;
    let mut path = vec![pose];

    for instruction in pattern {
        let h = pose.heading_deg.to_radians();
        match instruction.kind {
            InstructionKind::Walk => {
                pose.x += instruction.quantity * h.cos();
                pose.y += instruction.quantity * h.sin();
            }
            InstructionKind::Rotate => {
                pose.heading_deg += instruction.quantity;
            }
            InstructionKind::Arc => {
                // Signed radius: positive turns left.
                let mut r = instruction.quantity;
                if pivots(profile, r) {
                    r = (profile.wheel_base_cm / 2.0).copysign(r);
                }
                let sweep = instruction.angle.abs() * if r >= 0.0 { 1.0 } else { -1.0 };
                let end = h + sweep.to_radians();
                pose.x += r * (end.sin() - h.sin());
                pose.y -= r * (end.cos() - h.cos());
                pose.heading_deg += sweep;
            }
            InstructionKind::SprayOn => {
                spraying = true;
                continue;
            }
            InstructionKind::SprayOff => {
                spraying = false;
                continue;
            }
            InstructionKind::Wait | InstructionKind::Unknown(_) => continue,
        }
        pose.painted = spraying || instruction.paint;
        path.push(pose);
    }
    path
}
