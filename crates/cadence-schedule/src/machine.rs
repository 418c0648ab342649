use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::configuration::{ConfigField, ScheduleConfiguration, ScheduleRequest};
use crate::context::{ScheduleContext, ScheduleOperation, WorkloadLaunch};
use crate::error::{Result, ScheduleError};
use crate::state::{ExecutionToken, ScheduleState, ScheduleStatus};

/// What a `Run` tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The tick carried a superseded token and was discarded.
    Stale,
    /// Not due yet; re-armed for `next_run_at`.
    Waiting { next_run_at: DateTime<Utc> },
    /// The workload was launched; re-armed for `next_run_at`.
    Dispatched { next_run_at: DateTime<Utc> },
}

/// Operation set over one [`ScheduleState`].
///
/// Operations run to completion synchronously. Preconditions are checked
/// before the first write, so a failed operation leaves the state as it found
/// it.
#[derive(Debug, Clone, Default)]
pub struct ScheduleStateMachine {
    state: ScheduleState,
}

impl ScheduleStateMachine {
    pub fn new(state: ScheduleState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn into_state(self) -> ScheduleState {
        self.state
    }

    /// Route a persisted operation to its handler.
    pub fn apply(&mut self, operation: ScheduleOperation, ctx: &mut impl ScheduleContext) -> Result<()> {
        match operation {
            ScheduleOperation::Create(config) => self.create(config, ctx),
            ScheduleOperation::Update(update) => self.update(&update, ctx).map(|_| ()),
            ScheduleOperation::Pause => self.pause(),
            ScheduleOperation::Resume => self.resume(ctx),
            ScheduleOperation::Run { token } => self.run(&token, ctx).map(|_| ()),
            ScheduleOperation::Delete => self.delete(),
        }
    }

    /// Attach `config`, activate, and arm the first tick immediately.
    pub fn create(&mut self, config: ScheduleConfiguration, ctx: &mut impl ScheduleContext) -> Result<()> {
        if self.state.status != ScheduleStatus::Uninitialized {
            return Err(ScheduleError::invalid_state("Schedule is already created"));
        }

        info!(
            schedule_id = %config.schedule_id(),
            orchestration = %config.orchestration_name(),
            interval = ?config.interval(),
            start_at = ?config.start_at,
            "creating schedule"
        );

        self.state.transition_to(ScheduleStatus::Active)?;
        let schedule_id = config.schedule_id().to_string();
        self.state.configuration = Some(config);
        self.arm_run(&schedule_id, ctx.now(), ctx);
        Ok(())
    }

    /// Merge `update` into the configuration.
    ///
    /// A non-empty change set rotates the token and arms a fresh tick; a change
    /// to the start time or interval also forces the due time to be recomputed.
    /// Returns the changed fields.
    pub fn update(
        &mut self,
        update: &ScheduleRequest,
        ctx: &mut impl ScheduleContext,
    ) -> Result<BTreeSet<ConfigField>> {
        let changed = self.state.merge_config(update)?;
        let schedule_id = self.schedule_id()?.to_string();

        if changed.is_empty() {
            info!(%schedule_id, "schedule configuration is up to date");
            return Ok(changed);
        }
        info!(%schedule_id, changed = ?changed, "updating schedule");

        if changed.iter().any(|field| field.affects_timing()) {
            self.state.next_run_at = None;
        }
        self.state.rotate_token();
        self.arm_run(&schedule_id, ctx.now(), ctx);
        Ok(changed)
    }

    /// Stop ticking. Pending ticks are orphaned by the token rotation.
    pub fn pause(&mut self) -> Result<()> {
        if self.state.status != ScheduleStatus::Active {
            return Err(ScheduleError::invalid_state(
                "Schedule must be in Active status to pause",
            ));
        }
        self.state.transition_to(ScheduleStatus::Paused)?;
        self.state.next_run_at = None;
        self.state.rotate_token();
        info!(schedule_id = ?self.schedule_id().ok(), "schedule paused");
        Ok(())
    }

    /// Reactivate a paused schedule and arm a tick immediately.
    ///
    /// Unlike pause, update and delete, resume keeps the current token.
    pub fn resume(&mut self, ctx: &mut impl ScheduleContext) -> Result<()> {
        let schedule_id = self.schedule_id()?.to_string();
        if self.state.status != ScheduleStatus::Paused {
            return Err(ScheduleError::invalid_state(
                "Schedule must be in Paused status to resume",
            ));
        }
        self.state.transition_to(ScheduleStatus::Active)?;
        self.state.next_run_at = None;
        info!(%schedule_id, "schedule resumed");
        self.arm_run(&schedule_id, ctx.now(), ctx);
        Ok(())
    }

    /// Move to the terminal tombstone. The record is kept.
    pub fn delete(&mut self) -> Result<()> {
        if self.state.status == ScheduleStatus::Deleted {
            return Err(ScheduleError::invalid_state("Schedule is already deleted"));
        }
        self.state.transition_to(ScheduleStatus::Deleted)?;
        self.state.next_run_at = None;
        self.state.rotate_token();
        info!(schedule_id = ?self.schedule_id().ok(), "schedule deleted");
        Ok(())
    }

    /// One due tick.
    ///
    /// Computes the due time if it is unknown, launches the workload when due,
    /// and always re-arms itself for the next due time. A tick carrying a
    /// superseded token does nothing.
    pub fn run(&mut self, token: &ExecutionToken, ctx: &mut impl ScheduleContext) -> Result<RunOutcome> {
        let (launch, start_at, interval) = match self.state.configuration.as_ref() {
            Some(config) => match config.interval() {
                Some(interval) => (WorkloadLaunch::from(config), config.start_at, interval),
                None => return Err(interval_not_initialized()),
            },
            None => return Err(interval_not_initialized()),
        };

        if *token != self.state.execution_token {
            info!(
                schedule_id = %launch.schedule_id,
                %token,
                "cancel schedule run - execution token has expired"
            );
            return Ok(RunOutcome::Stale);
        }

        if self.state.status != ScheduleStatus::Active {
            return Err(ScheduleError::invalid_state(
                "Schedule must be in Active status to run",
            ));
        }

        let now = ctx.now();
        let step = to_time_delta(interval)?;
        let mut next_run_at = match (self.state.next_run_at, self.state.last_run_at) {
            (Some(next), _) => next,
            (None, None) => start_at.unwrap_or(now),
            (None, Some(last)) => next_boundary(last, now, step).ok_or_else(out_of_range)?,
        };

        let due = next_run_at <= now;
        if due {
            // Pin the run to the actual dispatch time so the cadence restarts from here.
            next_run_at = now.checked_add_signed(step).ok_or_else(out_of_range)?;
            info!(
                schedule_id = %launch.schedule_id,
                orchestration = %launch.orchestration_name,
                instance_id = ?launch.orchestration_instance_id,
                "starting scheduled orchestration"
            );
            let schedule_id = launch.schedule_id.clone();
            ctx.start_workload(launch);
            self.state.last_run_at = Some(now);
            self.state.next_run_at = Some(next_run_at);
            self.arm_run(&schedule_id, next_run_at, ctx);
            Ok(RunOutcome::Dispatched { next_run_at })
        } else {
            debug!(schedule_id = %launch.schedule_id, %next_run_at, "schedule not due yet");
            self.state.next_run_at = Some(next_run_at);
            self.arm_run(&launch.schedule_id, next_run_at, ctx);
            Ok(RunOutcome::Waiting { next_run_at })
        }
    }

    fn schedule_id(&self) -> Result<&str> {
        self.state
            .configuration
            .as_ref()
            .map(ScheduleConfiguration::schedule_id)
            .ok_or_else(|| ScheduleError::invalid_state("Schedule configuration is not initialized"))
    }

    fn arm_run(&self, schedule_id: &str, at: DateTime<Utc>, ctx: &mut impl ScheduleContext) {
        let token = self.state.execution_token.clone();
        debug!(%schedule_id, %token, %at, "arming schedule run");
        ctx.schedule_deferred(schedule_id, ScheduleOperation::Run { token }, at);
    }
}

/// First interval boundary after `last_run_at` that lies strictly after `now`.
///
/// All boundaries missed in between collapse into this one. Returns `None` on
/// arithmetic overflow.
pub fn next_boundary(
    last_run_at: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: TimeDelta,
) -> Option<DateTime<Utc>> {
    let interval_ns = interval.num_nanoseconds().filter(|ns| *ns > 0)?;
    let elapsed_ns = (now - last_run_at).num_nanoseconds()?.max(0);
    let periods = elapsed_ns / interval_ns + 1;
    let offset = interval_ns.checked_mul(periods)?;
    last_run_at.checked_add_signed(TimeDelta::nanoseconds(offset))
}

fn to_time_delta(interval: Duration) -> Result<TimeDelta> {
    TimeDelta::from_std(interval).map_err(|_| out_of_range())
}

fn interval_not_initialized() -> ScheduleError {
    ScheduleError::invalid_state("Schedule configuration or interval is not initialized")
}

fn out_of_range() -> ScheduleError {
    ScheduleError::validation("Schedule interval arithmetic out of range")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn boundary_skips_missed_intervals() {
        let step = TimeDelta::seconds(60);
        let now = t0() + TimeDelta::seconds(3 * 60 + 15);
        assert_eq!(next_boundary(t0(), now, step), Some(t0() + TimeDelta::seconds(240)));
    }

    #[test]
    fn boundary_is_strictly_after_now() {
        let step = TimeDelta::seconds(60);
        let now = t0() + TimeDelta::seconds(120);
        assert_eq!(next_boundary(t0(), now, step), Some(t0() + TimeDelta::seconds(180)));
    }

    #[test]
    fn boundary_with_clock_behind_last_run() {
        let step = TimeDelta::seconds(60);
        let now = t0() - TimeDelta::seconds(5);
        assert_eq!(next_boundary(t0(), now, step), Some(t0() + step));
    }

    #[test]
    fn boundary_rejects_zero_interval() {
        assert_eq!(next_boundary(t0(), t0(), TimeDelta::zero()), None);
    }
}
