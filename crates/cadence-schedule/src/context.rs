//! The contract between a schedule and the substrate that hosts it.
//!
//! The state machine never owns a timer or a thread. Everything with a side
//! effect outside the schedule record goes through [`ScheduleContext`], which
//! the hosting substrate implements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::configuration::{ScheduleConfiguration, ScheduleRequest};
use crate::state::ExecutionToken;

/// Capabilities a hosting substrate provides to a running operation.
///
/// The substrate is also responsible for running at most one operation per
/// schedule id at a time and for persisting the state after each one.
pub trait ScheduleContext {
    /// The current time, fixed for the duration of one operation.
    fn now(&self) -> DateTime<Utc>;

    /// Enqueue `operation` against `schedule_id`, to be delivered at or after
    /// `not_before`. Delivery may happen more than once.
    fn schedule_deferred(
        &mut self,
        schedule_id: &str,
        operation: ScheduleOperation,
        not_before: DateTime<Utc>,
    );

    /// Launch one workload instance. Must be idempotent on the instance id.
    fn start_workload(&mut self, launch: WorkloadLaunch);
}

/// A request to start one instance of a downstream workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadLaunch {
    pub schedule_id: String,
    pub orchestration_name: String,
    pub orchestration_input: Option<String>,
    pub orchestration_instance_id: Option<String>,
}

impl From<&ScheduleConfiguration> for WorkloadLaunch {
    fn from(config: &ScheduleConfiguration) -> Self {
        Self {
            schedule_id: config.schedule_id().to_string(),
            orchestration_name: config.orchestration_name().to_string(),
            orchestration_input: config.orchestration_input.clone(),
            orchestration_instance_id: config.orchestration_instance_id.clone(),
        }
    }
}

/// Every operation a schedule accepts, in a form the substrate can persist
/// and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "input", rename_all = "snake_case")]
pub enum ScheduleOperation {
    Create(ScheduleConfiguration),
    Update(ScheduleRequest),
    Pause,
    Resume,
    Run { token: ExecutionToken },
    Delete,
}

impl ScheduleOperation {
    /// Stable lowercase name, used in logs and storage.
    pub fn name(&self) -> &'static str {
        match self {
            ScheduleOperation::Create(_) => "create",
            ScheduleOperation::Update(_) => "update",
            ScheduleOperation::Pause => "pause",
            ScheduleOperation::Resume => "resume",
            ScheduleOperation::Run { .. } => "run",
            ScheduleOperation::Delete => "delete",
        }
    }
}
