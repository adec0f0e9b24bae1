//! [`MotionExecutor`] – runs one instruction at a time against the drive.
//!
//! ```text
//!  Idle ──▶ Running ⇄ Paused
//!              │
//!              ├──▶ Completed
//!              └──▶ Failed
//! ```
//!
//! Timed motions advance in control ticks, each issuing one
//! [`MotorCommand`].  Before every tick the executor checks the cancel
//! token and the shared pause flag; while paused the wheels are halted, the
//! sprayer is closed if it was open, and the thread blocks until the
//! monitor resumes.  Ticks spent paused do not count, so a paused walk
//! resumes where it stopped instead of restarting.
//!
//! The executor remembers the sprayer duty across instructions: a
//! `SprayOn` step keeps the valve open through later unpainted moves, and a
//! painted move restores whatever the valve was doing before it.
//!
//! Forward walks and arcs re-read the heading every tick and apply a
//! proportional correction; rotations and reverse walks run open loop.
//! Any fault halts everything via
//! [`ActuatorDrive::emergency_stop_all`] and fails the instruction.

use std::sync::Arc;
use std::thread;

use fieldbot_hal::{ActuatorDrive, HeadingController, HeadingSensor};
use fieldbot_kernel::SafetyState;
use fieldbot_types::{CalibrationProfile, FieldError, Instruction, InstructionKind, MotorCommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::kinematics::{self, Correction, MotionPlan};

/// Lifecycle of the instruction most recently handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Executes instructions with closed-loop heading correction.
///
/// Owns the drive and the heading sensor: nothing else may command the
/// hardware while the executor exists.
pub struct MotionExecutor<D, H> {
    pub(crate) drive: D,
    heading: H,
    pub(crate) profile: CalibrationProfile,
    controller: HeadingController,
    pub(crate) safety: Arc<SafetyState>,
    state: ExecutorState,
    /// Sprayer duty the robot should have when not paused.
    spray_duty: f64,
    /// Wheel duties of a held manual movement button.
    pub(crate) manual_motion: Option<(f64, f64)>,
}

impl<D: ActuatorDrive, H: HeadingSensor> MotionExecutor<D, H> {
    pub fn new(drive: D, heading: H, profile: CalibrationProfile, safety: Arc<SafetyState>) -> Self {
        let controller = HeadingController::new(profile.kp);
        Self {
            drive,
            heading,
            profile,
            controller,
            safety,
            state: ExecutorState::Idle,
            spray_duty: 0.0,
            manual_motion: None,
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    pub fn spray_duty(&self) -> f64 {
        self.spray_duty
    }

    /// Halt every actuator, logging (not returning) any failure.
    pub fn emergency_stop(&mut self) {
        self.spray_duty = 0.0;
        self.manual_motion = None;
        if let Err(e) = self.drive.emergency_stop_all() {
            error!(error = %e, "emergency stop reported a failure");
        }
    }

    /// Run `instruction` to completion.
    ///
    /// # Errors
    ///
    /// - [`FieldError::UnknownInstruction`] for unrecognised kinds; no
    ///   hardware is touched.
    /// - [`FieldError::Cancelled`] when `cancel` is raised mid-step.
    /// - [`FieldError::Execution`] on any drive or heading fault.
    ///
    /// On the last two the drive has been emergency-stopped.
    pub fn execute(&mut self, instruction: &Instruction, cancel: &CancellationToken) -> Result<(), FieldError> {
        let order = instruction.order;
        if let InstructionKind::Unknown(kind) = &instruction.kind {
            warn!(order, kind = %kind, "unknown instruction kind");
            self.state = ExecutorState::Failed;
            return Err(FieldError::UnknownInstruction {
                order,
                kind: kind.clone(),
            });
        }

        self.manual_motion = None;
        self.state = ExecutorState::Running;
        debug!(order, kind = instruction.kind.wire_name(), quantity = instruction.quantity, "instruction started");
        match self.dispatch(instruction, cancel) {
            Ok(()) => {
                self.state = ExecutorState::Completed;
                debug!(order, "instruction completed");
                Ok(())
            }
            Err(e) => {
                self.state = ExecutorState::Failed;
                error!(order, error = %e, "instruction failed, stopping all actuators");
                self.emergency_stop();
                Err(e)
            }
        }
    }

    fn dispatch(&mut self, instruction: &Instruction, cancel: &CancellationToken) -> Result<(), FieldError> {
        let order = instruction.order;
        match instruction.kind {
            InstructionKind::SprayOn => self.set_spray(1.0).map_err(|e| fault(order, e)),
            InstructionKind::SprayOff => self.set_spray(0.0).map_err(|e| fault(order, e)),
            InstructionKind::Wait => {
                let plan = kinematics::wait(instruction.quantity);
                self.idle_for(order, &plan, cancel)
            }
            InstructionKind::Walk | InstructionKind::Rotate | InstructionKind::Arc => {
                match kinematics::plan(&self.profile, instruction) {
                    Some(plan) => self.drive_for(order, &plan, instruction.paint, cancel),
                    None => Ok(()),
                }
            }
            InstructionKind::Unknown(_) => Ok(()),
        }
    }

    fn idle_for(&mut self, order: i64, plan: &MotionPlan, cancel: &CancellationToken) -> Result<(), FieldError> {
        let tick = self.profile.tick();
        for _ in 0..plan.ticks(tick) {
            self.checkpoint(order, false, cancel)?;
            thread::sleep(tick);
        }
        Ok(())
    }

    fn drive_for(
        &mut self,
        order: i64,
        plan: &MotionPlan,
        paint: bool,
        cancel: &CancellationToken,
    ) -> Result<(), FieldError> {
        let tick = self.profile.tick();
        let ticks = plan.ticks(tick);
        let initial_yaw = match plan.correction {
            Correction::None => 0.0,
            _ => self.heading.current_yaw().map_err(|e| fault(order, e))?,
        };

        let prior_spray = self.spray_duty;
        if paint {
            self.spray_duty = 1.0;
        }

        for n in 0..ticks {
            self.checkpoint(order, true, cancel)?;

            let expected = match plan.correction {
                Correction::None => None,
                Correction::Straight => Some(0.0),
                Correction::Arc { sweep_deg } => Some(sweep_deg * n as f64 / ticks as f64),
            };
            let (left, right) = match expected {
                None => (plan.left_duty, plan.right_duty),
                Some(expected) => {
                    let yaw = self.heading.current_yaw().map_err(|e| fault(order, e))?;
                    let error = yaw - initial_yaw - expected;
                    self.controller.correct(plan.left_duty, plan.right_duty, error)
                }
            };
            let command = MotorCommand::new(left, right, self.spray_duty);
            self.drive.apply(&command).map_err(|e| fault(order, e))?;

            thread::sleep(tick);
        }

        self.drive.halt_wheels().map_err(|e| fault(order, e))?;
        if self.spray_duty != prior_spray {
            self.set_spray(prior_spray).map_err(|e| fault(order, e))?;
        }
        Ok(())
    }

    /// Command the sprayer and remember the duty for pause/resume.
    pub(crate) fn set_spray(&mut self, duty: f64) -> Result<(), FieldError> {
        self.drive.set_spray(duty)?;
        self.spray_duty = duty;
        Ok(())
    }

    /// Honour cancel and pause before a tick.  While paused the wheels (when
    /// `moving`) and an open sprayer are stopped.  The sprayer is reopened
    /// on resume; the wheels pick up again with the next tick's command.
    fn checkpoint(&mut self, order: i64, moving: bool, cancel: &CancellationToken) -> Result<(), FieldError> {
        if cancel.is_cancelled() {
            return Err(FieldError::Cancelled { order });
        }
        if !self.safety.is_paused() {
            return Ok(());
        }

        self.state = ExecutorState::Paused;
        warn!(order, "motion paused");
        let spraying = self.spray_duty > 0.0;
        if moving {
            self.drive.apply(&MotorCommand::halt()).map_err(|e| fault(order, e))?;
        } else if spraying {
            self.drive.set_spray(0.0).map_err(|e| fault(order, e))?;
        }

        let tick = self.profile.tick();
        while !self.safety.wait_for_resume(tick) {
            if cancel.is_cancelled() {
                return Err(FieldError::Cancelled { order });
            }
        }
        if cancel.is_cancelled() {
            return Err(FieldError::Cancelled { order });
        }

        if spraying {
            self.drive.set_spray(self.spray_duty).map_err(|e| fault(order, e))?;
        }
        self.state = ExecutorState::Running;
        info!(order, "motion resumed");
        Ok(())
    }
}

fn fault(order: i64, e: FieldError) -> FieldError {
    FieldError::Execution {
        order,
        details: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldbot_hal::sim::{LEFT_WHEEL, RIGHT_WHEEL, SimDrive, SimHeading, SimLog, SimRig};
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    /// 10 ms ticks and fast speeds keep every motion well under a second.
    fn fast_profile() -> CalibrationProfile {
        CalibrationProfile {
            cm_per_second: 100.0,
            degrees_per_second: 900.0,
            tick_ms: 10,
            ..CalibrationProfile::default()
        }
    }

    fn executor(heading: SimHeading) -> (MotionExecutor<SimDrive, SimHeading>, SimLog, Arc<SafetyState>) {
        let (drive, log) = SimRig::new().build();
        let safety = Arc::new(SafetyState::new());
        let exec = MotionExecutor::new(drive, heading, fast_profile(), Arc::clone(&safety));
        (exec, log, safety)
    }

    #[test]
    fn walk_runs_its_ticks_and_stops() {
        let heading = SimHeading::constant(0.0);
        let reads = heading.reads();
        let (mut exec, log, _) = executor(heading);

        // 10 cm at 100 cm/s = 0.1 s = 10 ticks, plus the initial heading read.
        exec.execute(&Instruction::walk(1, 10.0, false), &CancellationToken::new())
            .unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 11);
        assert_eq!(exec.state(), ExecutorState::Completed);
        assert!(log.wheel_duties(LEFT_WHEEL).iter().take(3).all(|d| *d == 0.3));
        assert!(log.is_stopped());
        assert!(log.spray_duties().is_empty());
    }

    #[test]
    fn painted_walk_opens_and_closes_sprayer() {
        let (mut exec, log, _) = executor(SimHeading::constant(0.0));
        exec.execute(&Instruction::walk(1, 3.0, true), &CancellationToken::new())
            .unwrap();
        assert_eq!(log.spray_duties(), vec![1.0, 0.0]);
    }

    #[test]
    fn drift_is_corrected_against_the_heavy_side() {
        // Yaw creeping counter-clockwise: the left wheel should speed up.
        let (mut exec, log, _) = executor(SimHeading::drifting(1.0));
        exec.execute(&Instruction::walk(1, 5.0, false), &CancellationToken::new())
            .unwrap();
        let left = log.wheel_duties(LEFT_WHEEL);
        let right = log.wheel_duties(RIGHT_WHEEL);
        let n = left.len() - 2; // last commanded before the final halt
        assert!(left[n] > 0.3);
        assert!(right[n] < 0.3);
    }

    #[test]
    fn rotation_is_open_loop() {
        let heading = SimHeading::constant(0.0);
        let reads = heading.reads();
        let (mut exec, log, _) = executor(heading);
        exec.execute(&Instruction::rotate(1, 90.0), &CancellationToken::new())
            .unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(log.wheel_duties(LEFT_WHEEL)[0], -0.3);
        assert_eq!(log.wheel_duties(RIGHT_WHEEL)[0], 0.3);
        assert!(log.is_stopped());
    }

    #[test]
    fn pause_preserves_elapsed_ticks() {
        let safety = Arc::new(SafetyState::new());
        let hook_safety = Arc::clone(&safety);
        let heading = SimHeading::constant(0.0).with_hook(move |n| {
            if n == 4 {
                hook_safety.pause();
                let s = Arc::clone(&hook_safety);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(60));
                    s.resume();
                });
            }
        });
        let reads = heading.reads();
        let (drive, log) = SimRig::new().build();
        let mut exec = MotionExecutor::new(drive, heading, fast_profile(), Arc::clone(&safety));

        let start = Instant::now();
        exec.execute(&Instruction::walk(1, 10.0, true), &CancellationToken::new())
            .unwrap();

        // Same tick count as an uninterrupted walk, but it took longer.
        assert_eq!(reads.load(Ordering::SeqCst), 11);
        assert!(start.elapsed() >= Duration::from_millis(150));

        let left = log.wheel_duties(LEFT_WHEEL);
        let halt = left.iter().position(|d| *d == 0.0).unwrap();
        assert!(halt < left.len() - 1, "wheels must be re-driven after resume");
        assert_eq!(left[halt + 1], 0.3);
        assert_eq!(log.spray_duties(), vec![1.0, 0.0, 1.0, 0.0]);
        assert_eq!(exec.state(), ExecutorState::Completed);
    }

    #[test]
    fn heading_failure_emergency_stops() {
        let (mut exec, log, _) = executor(SimHeading::constant(0.0).failing_after(3));
        let err = exec
            .execute(&Instruction::walk(7, 50.0, true), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, FieldError::Execution { order: 7, .. }));
        assert_eq!(exec.state(), ExecutorState::Failed);
        assert!(log.is_stopped());
    }

    #[test]
    fn drive_failure_emergency_stops() {
        let (drive, log) = SimRig::new().with_left_fault_after(1).build();
        let safety = Arc::new(SafetyState::new());
        let mut exec = MotionExecutor::new(drive, SimHeading::constant(0.0), fast_profile(), safety);
        let err = exec
            .execute(&Instruction::walk(2, 10.0, false), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.order(), Some(2));
        assert!(log.is_stopped());
    }

    #[test]
    fn unknown_kind_touches_no_hardware() {
        let (mut exec, log, _) = executor(SimHeading::constant(0.0));
        let instr = Instruction {
            kind: InstructionKind::Unknown("moonwalk".into()),
            ..Instruction::walk(4, 10.0, true)
        };
        let err = exec.execute(&instr, &CancellationToken::new()).unwrap_err();
        assert_eq!(
            err,
            FieldError::UnknownInstruction {
                order: 4,
                kind: "moonwalk".into()
            }
        );
        assert!(log.is_empty());
    }

    #[test]
    fn spray_toggles_are_immediate() {
        let (mut exec, log, _) = executor(SimHeading::constant(0.0));
        let cancel = CancellationToken::new();
        exec.execute(&Instruction::spray_on(1), &cancel).unwrap();
        exec.execute(&Instruction::spray_on(2), &cancel).unwrap();
        exec.execute(&Instruction::spray_off(3), &cancel).unwrap();
        assert_eq!(log.spray_duties(), vec![1.0, 1.0, 0.0]);
        assert!(log.wheel_duties(LEFT_WHEEL).is_empty());
    }

    #[test]
    fn wait_sleeps_without_actuation() {
        let (mut exec, log, _) = executor(SimHeading::constant(0.0));
        let start = Instant::now();
        exec.execute(&Instruction::wait(1, 0.05), &CancellationToken::new())
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(log.is_empty());
    }

    #[test]
    fn wait_does_not_elapse_while_paused() {
        let (mut exec, _log, safety) = executor(SimHeading::constant(0.0));
        safety.pause();
        let resumer = {
            let s = Arc::clone(&safety);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(80));
                s.resume();
            })
        };
        let start = Instant::now();
        exec.execute(&Instruction::wait(1, 0.02), &CancellationToken::new())
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(80));
        resumer.join().unwrap();
    }

    #[test]
    fn cancel_aborts_and_stops() {
        let (mut exec, log, _) = executor(SimHeading::constant(0.0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec
            .execute(&Instruction::walk(3, 10.0, true), &cancel)
            .unwrap_err();
        assert_eq!(err, FieldError::Cancelled { order: 3 });
        assert!(log.is_stopped());
    }

    #[test]
    fn cancel_while_paused_aborts() {
        let (mut exec, log, safety) = executor(SimHeading::constant(0.0));
        safety.pause();
        let cancel = CancellationToken::new();
        let canceller = {
            let c = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(40));
                c.cancel();
            })
        };
        let err = exec
            .execute(&Instruction::walk(5, 10.0, false), &cancel)
            .unwrap_err();
        assert_eq!(err, FieldError::Cancelled { order: 5 });
        assert!(log.is_stopped());
        canceller.join().unwrap();
    }

    fn pause_for(safety: &Arc<SafetyState>, millis: u64) {
        safety.pause();
        let s = Arc::clone(safety);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(millis));
            s.resume();
        });
    }

    #[test]
    fn pause_closes_a_sprayer_left_open_by_spray_on() {
        let safety = Arc::new(SafetyState::new());
        let hook_safety = Arc::clone(&safety);
        let heading = SimHeading::constant(0.0).with_hook(move |n| {
            if n == 3 {
                pause_for(&hook_safety, 40);
            }
        });
        let (drive, log) = SimRig::new().build();
        let mut exec = MotionExecutor::new(drive, heading, fast_profile(), Arc::clone(&safety));
        let cancel = CancellationToken::new();

        exec.execute(&Instruction::spray_on(1), &cancel).unwrap();
        exec.execute(&Instruction::walk(2, 10.0, false), &cancel).unwrap();

        assert_eq!(log.spray_duties(), vec![1.0, 0.0, 1.0]);
        assert_eq!(exec.spray_duty(), 1.0);
    }

    #[test]
    fn painted_walk_keeps_a_sprayer_opened_before_it() {
        let (mut exec, log, _) = executor(SimHeading::constant(0.0));
        let cancel = CancellationToken::new();
        exec.execute(&Instruction::spray_on(1), &cancel).unwrap();
        exec.execute(&Instruction::walk(2, 5.0, true), &cancel).unwrap();
        assert_eq!(log.spray_duties(), vec![1.0]);
        assert_eq!(log.last_spray(), 1.0);
    }

    #[test]
    fn paused_wait_closes_and_reopens_the_sprayer() {
        let (mut exec, log, safety) = executor(SimHeading::constant(0.0));
        let cancel = CancellationToken::new();
        exec.execute(&Instruction::spray_on(1), &cancel).unwrap();
        pause_for(&safety, 40);
        exec.execute(&Instruction::wait(2, 0.02), &cancel).unwrap();
        assert_eq!(log.spray_duties(), vec![1.0, 0.0, 1.0]);
        assert!(log.wheel_duties(LEFT_WHEEL).is_empty());
    }

    #[test]
    fn failure_forgets_the_sprayer_state() {
        let (drive, log) = SimRig::new().with_left_fault_after(0).build();
        let safety = Arc::new(SafetyState::new());
        let mut exec = MotionExecutor::new(drive, SimHeading::constant(0.0), fast_profile(), safety);
        let cancel = CancellationToken::new();
        exec.execute(&Instruction::spray_on(1), &cancel).unwrap();
        assert!(exec.execute(&Instruction::walk(2, 5.0, false), &cancel).is_err());
        assert_eq!(exec.spray_duty(), 0.0);
        assert!(log.is_stopped());
    }

    #[test]
    fn arc_correction_follows_the_sweep() {
        let plan = kinematics::arc(&fast_profile(), 22.5, 90.0);
        let ticks = plan.ticks(fast_profile().tick()) as usize;
        // The gyro turns exactly as commanded, one tick ahead of the ramp.
        let per_tick = 90.0 / ticks as f64;
        let (mut exec, log, _) = executor(SimHeading::drifting(per_tick));
        exec.execute(&Instruction::arc(1, 22.5, 90.0, false), &CancellationToken::new())
            .unwrap();

        let left = log.wheel_duties(LEFT_WHEEL);
        let right = log.wheel_duties(RIGHT_WHEEL);
        assert_eq!(left.len(), ticks + 1);
        let offset = fast_profile().kp * per_tick;
        for (l, r) in left[..ticks].iter().zip(&right[..ticks]) {
            assert!((l - (plan.left_duty + offset)).abs() < 1e-9, "left {l}");
            assert!((r - (plan.right_duty - offset)).abs() < 1e-9, "right {r}");
        }
        assert!(log.is_stopped());
    }

    #[test]
    fn arc_that_fails_to_turn_is_steered_harder() {
        let plan = kinematics::arc(&fast_profile(), 22.5, 90.0);
        let ticks = plan.ticks(fast_profile().tick()) as usize;
        let (mut exec, log, _) = executor(SimHeading::constant(0.0));
        exec.execute(&Instruction::arc(1, 22.5, 90.0, false), &CancellationToken::new())
            .unwrap();

        let left = log.wheel_duties(LEFT_WHEEL);
        let right = log.wheel_duties(RIGHT_WHEEL);
        // First tick expects no turn yet, so the base duties go out unchanged.
        assert!((left[0] - plan.left_duty).abs() < 1e-9);
        assert!((right[0] - plan.right_duty).abs() < 1e-9);
        // Lagging behind a counter-clockwise sweep: outer wheel up, inner down.
        assert!(right[ticks - 1] > right[0]);
        assert!(left[ticks - 1] < left[0]);
    }

    #[test]
    fn pause_mid_arc_preserves_ticks() {
        let plan = kinematics::arc(&fast_profile(), 22.5, 90.0);
        let ticks = plan.ticks(fast_profile().tick()) as usize;
        let safety = Arc::new(SafetyState::new());
        let hook_safety = Arc::clone(&safety);
        let heading = SimHeading::constant(0.0).with_hook(move |n| {
            if n == 5 {
                pause_for(&hook_safety, 60);
            }
        });
        let reads = heading.reads();
        let (drive, log) = SimRig::new().build();
        let mut exec = MotionExecutor::new(drive, heading, fast_profile(), Arc::clone(&safety));

        let start = Instant::now();
        exec.execute(&Instruction::arc(1, 22.5, 90.0, true), &CancellationToken::new())
            .unwrap();

        assert_eq!(reads.load(Ordering::SeqCst), ticks + 1);
        assert!(start.elapsed() >= Duration::from_millis(40 + 10 * ticks as u64));
        // One command per tick, the pause halt, and the final halt.
        assert_eq!(log.wheel_duties(RIGHT_WHEEL).len(), ticks + 2);
        assert_eq!(log.spray_duties(), vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn pause_before_rotation_delays_but_keeps_duration() {
        let (mut exec, log, safety) = executor(SimHeading::constant(0.0));
        pause_for(&safety, 50);
        let start = Instant::now();
        // 90° at 900°/s = 10 ticks.
        exec.execute(&Instruction::rotate(1, 90.0), &CancellationToken::new())
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(140));

        let mut expected = vec![0.0];
        expected.extend(std::iter::repeat_n(-0.3, 10));
        expected.push(0.0);
        assert_eq!(log.wheel_duties(LEFT_WHEEL), expected);
    }
}
