//! [`PatternRunner`] – sequences a pattern through the executor.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fieldbot_hal::{ActuatorDrive, HeadingSensor};
use fieldbot_kernel::SafetyState;
use fieldbot_types::{FieldError, Pattern};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::executor::MotionExecutor;

/// Default pause between consecutive steps.
pub const DEFAULT_INTER_STEP_PAUSE: Duration = Duration::from_millis(500);

/// Outcome of one [`PatternRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Completed,
    /// The step with this order failed or was cancelled; nothing after it
    /// ran.
    AbortedAt(i64),
}

/// Runs whole patterns, one step at a time, aborting on the first failure.
pub struct PatternRunner<D, H> {
    executor: MotionExecutor<D, H>,
    safety: Arc<SafetyState>,
    inter_step_pause: Duration,
}

impl<D: ActuatorDrive, H: HeadingSensor> PatternRunner<D, H> {
    pub fn new(executor: MotionExecutor<D, H>, safety: Arc<SafetyState>) -> Self {
        Self {
            executor,
            safety,
            inter_step_pause: DEFAULT_INTER_STEP_PAUSE,
        }
    }

    pub fn with_inter_step_pause(mut self, pause: Duration) -> Self {
        self.inter_step_pause = pause;
        self
    }

    pub fn executor_mut(&mut self) -> &mut MotionExecutor<D, H> {
        &mut self.executor
    }

    /// Run every instruction of `pattern` in order.
    ///
    /// Progress is reset to `(0, len)` first and `current` is set to the
    /// 1-based position before each step.  The first failure (including a
    /// cancel) emergency-stops the drive and ends the run; there is no
    /// resume across runs.
    #[instrument(skip_all, fields(steps = pattern.len()))]
    pub fn run(&mut self, pattern: &Pattern, cancel: &CancellationToken) -> RunResult {
        let total = pattern.len();
        self.safety.begin_run(u32::try_from(total).unwrap_or(u32::MAX));
        info!("pattern started");

        for (index, instruction) in pattern.iter().enumerate() {
            let order = instruction.order;
            self.safety
                .set_current(u32::try_from(index + 1).unwrap_or(u32::MAX));

            let outcome = if cancel.is_cancelled() {
                Err(FieldError::Cancelled { order })
            } else {
                self.executor.execute(instruction, cancel)
            };
            if let Err(e) = outcome {
                error!(order, step = index + 1, error = %e, "pattern aborted");
                self.executor.emergency_stop();
                return RunResult::AbortedAt(order);
            }

            if index + 1 < total {
                sleep_unless_cancelled(self.inter_step_pause, cancel);
            }
        }

        info!("pattern completed");
        RunResult::Completed
    }
}

/// Sleep for `duration`, returning early once `cancel` is raised.
fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) {
    const SLICE: Duration = Duration::from_millis(20);
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(SLICE.min(deadline - now));
    }
}
