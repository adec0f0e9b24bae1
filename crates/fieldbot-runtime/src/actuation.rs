//! The single actuation worker.
//!
//! Patterns and manual commands both become [`Job`]s on one queue drained
//! by one OS thread that owns the [`PatternRunner`] (and through it the
//! drive).  Two actuation paths can therefore never interleave, and the
//! blocking control loop never stalls the async connection tasks.
//!
//! While a manual movement button is held the thread polls the queue once
//! per control tick instead of blocking, so an obstacle pause can halt the
//! wheels between button edges.
//!
//! ```text
//!  CommandChannel ──Job──▶ mpsc ──▶ [actuation thread] ──▶ ActuatorDrive
//!        ▲                                │
//!        └──────── oneshot outcome ───────┘
//! ```

use std::thread::{self, JoinHandle};

use fieldbot_hal::{ActuatorDrive, HeadingSensor};
use fieldbot_types::{FieldError, Pattern};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manual::ManualAction;
use crate::runner::{PatternRunner, RunResult};

/// Work for the actuation thread.
#[derive(Debug)]
pub enum Job {
    RunPattern {
        pattern: Pattern,
        cancel: CancellationToken,
        done: Option<oneshot::Sender<RunResult>>,
    },
    Manual {
        action: ManualAction,
        done: Option<oneshot::Sender<Result<(), FieldError>>>,
    },
    EmergencyStop,
}

/// Cloneable sender side of the actuation queue.
#[derive(Debug, Clone)]
pub struct ActuationHandle {
    tx: mpsc::Sender<Job>,
}

fn worker_gone() -> FieldError {
    FieldError::hardware("actuation_worker", "actuation queue closed")
}

impl ActuationHandle {
    /// Queue a pattern run.  The receiver yields its [`RunResult`].
    pub async fn run_pattern(
        &self,
        pattern: Pattern,
        cancel: CancellationToken,
    ) -> Result<oneshot::Receiver<RunResult>, FieldError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Job::RunPattern {
                pattern,
                cancel,
                done: Some(done),
            })
            .await
            .map_err(|_| worker_gone())?;
        Ok(rx)
    }

    /// Queue a manual button edge.
    pub async fn manual(
        &self,
        action: ManualAction,
    ) -> Result<oneshot::Receiver<Result<(), FieldError>>, FieldError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Job::Manual {
                action,
                done: Some(done),
            })
            .await
            .map_err(|_| worker_gone())?;
        Ok(rx)
    }

    /// Queue an emergency stop without waiting.  Usable from signal
    /// handlers and other non-async contexts.
    pub fn request_emergency_stop(&self) -> Result<(), FieldError> {
        self.tx.try_send(Job::EmergencyStop).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                FieldError::hardware("actuation_worker", "actuation queue full")
            }
            mpsc::error::TrySendError::Closed(_) => worker_gone(),
        })
    }
}

/// Block for the next job, or poll once per tick while manual motion is
/// held.  `None` once the queue is closed.
fn next_job<D, H>(rx: &mut mpsc::Receiver<Job>, runner: &mut PatternRunner<D, H>) -> Option<Job>
where
    D: ActuatorDrive,
    H: HeadingSensor,
{
    loop {
        let executor = runner.executor_mut();
        if !executor.manual_motion_active() {
            return rx.blocking_recv();
        }
        match rx.try_recv() {
            Ok(job) => return Some(job),
            Err(mpsc::error::TryRecvError::Disconnected) => return None,
            Err(mpsc::error::TryRecvError::Empty) => {
                executor.hold_manual_motion();
                thread::sleep(executor.profile().tick());
            }
        }
    }
}

/// Start the actuation thread.  It exits, leaving the drive
/// emergency-stopped, once every [`ActuationHandle`] has been dropped.
pub fn spawn_worker<D, H>(
    mut runner: PatternRunner<D, H>,
    queue_depth: usize,
) -> std::io::Result<(ActuationHandle, JoinHandle<()>)>
where
    D: ActuatorDrive + 'static,
    H: HeadingSensor + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Job>(queue_depth.max(1));
    let join = thread::Builder::new()
        .name("actuation".into())
        .spawn(move || {
            while let Some(job) = next_job(&mut rx, &mut runner) {
                match job {
                    Job::RunPattern {
                        pattern,
                        cancel,
                        done,
                    } => {
                        let result = runner.run(&pattern, &cancel);
                        if let RunResult::AbortedAt(order) = result {
                            warn!(order, "pattern run aborted");
                        }
                        if let Some(done) = done {
                            let _ = done.send(result);
                        }
                    }
                    Job::Manual { action, done } => {
                        let result = runner.executor_mut().manual(action);
                        if let Some(done) = done {
                            let _ = done.send(result);
                        }
                    }
                    Job::EmergencyStop => {
                        warn!("emergency stop requested");
                        runner.executor_mut().emergency_stop();
                    }
                }
            }
            info!("actuation queue closed, stopping drive");
            runner.executor_mut().emergency_stop();
        })?;
    Ok((ActuationHandle { tx }, join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MotionExecutor;
    use crate::manual::{ButtonState, ManualCommand};
    use fieldbot_hal::sim::{LEFT_WHEEL, RIGHT_WHEEL, SimHeading, SimLog, SimRig};
    use fieldbot_kernel::SafetyState;
    use fieldbot_types::{CalibrationProfile, Instruction, Progress};
    use std::sync::Arc;
    use std::time::Duration;

    fn start() -> (ActuationHandle, JoinHandle<()>, SimLog, Arc<SafetyState>) {
        let (drive, log) = SimRig::new().build();
        let safety = Arc::new(SafetyState::new());
        let profile = CalibrationProfile {
            cm_per_second: 100.0,
            tick_ms: 5,
            ..CalibrationProfile::default()
        };
        let exec = MotionExecutor::new(drive, SimHeading::constant(0.0), profile, Arc::clone(&safety));
        let runner = PatternRunner::new(exec, Arc::clone(&safety)).with_inter_step_pause(Duration::ZERO);
        let (handle, join) = spawn_worker(runner, 8).unwrap();
        (handle, join, log, safety)
    }

    #[tokio::test]
    async fn runs_patterns_and_reports_result() {
        let (handle, join, log, safety) = start();
        let pattern = Pattern::from_instructions(vec![
            Instruction::walk(1, 2.0, true),
            Instruction::spray_on(2),
        ]);
        let done = handle.run_pattern(pattern, CancellationToken::new()).await.unwrap();
        assert_eq!(done.await.unwrap(), RunResult::Completed);
        assert_eq!(safety.progress(), Progress { current: 2, total: 2 });
        assert_eq!(log.last_spray(), 1.0);

        drop(handle);
        join.join().unwrap();
        assert!(log.is_stopped());
    }

    #[tokio::test]
    async fn manual_jobs_share_the_queue() {
        let (handle, join, log, _) = start();
        let done = handle
            .manual(ManualAction::new(ManualCommand::Forward, ButtonState::Pressed))
            .await
            .unwrap();
        done.await.unwrap().unwrap();
        assert_eq!(log.last_wheel(LEFT_WHEEL), 0.3);

        handle.request_emergency_stop().unwrap();
        drop(handle);
        join.join().unwrap();
        assert_eq!(log.last_wheel(LEFT_WHEEL), 0.0);
    }

    #[tokio::test]
    async fn obstacle_pause_halts_held_manual_motion() {
        let (handle, join, log, safety) = start();
        let done = handle
            .manual(ManualAction::new(ManualCommand::Forward, ButtonState::Pressed))
            .await
            .unwrap();
        done.await.unwrap().unwrap();
        assert_eq!(log.last_wheel(LEFT_WHEEL), 0.3);

        safety.pause();
        let mut halted = false;
        for _ in 0..100 {
            if log.last_wheel(LEFT_WHEEL) == 0.0 && log.last_wheel(RIGHT_WHEEL) == 0.0 {
                halted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(halted, "held forward must stop when the robot pauses");

        drop(handle);
        join.join().unwrap();
    }

    #[tokio::test]
    async fn cancelled_job_aborts() {
        let (handle, join, _log, _) = start();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pattern = Pattern::from_instructions(vec![Instruction::walk(4, 50.0, false)]);
        let done = handle.run_pattern(pattern, cancel).await.unwrap();
        assert_eq!(done.await.unwrap(), RunResult::AbortedAt(4));
        drop(handle);
        join.join().unwrap();
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (tx, rx) = mpsc::channel::<Job>(1);
        drop(rx);
        let orphan = ActuationHandle { tx };
        let result = orphan
            .run_pattern(Pattern::from_instructions(Vec::new()), CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert!(orphan.request_emergency_stop().is_err());
    }
}
