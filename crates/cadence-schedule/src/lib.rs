//! `cadence-schedule`: the durable recurring-schedule state machine.
//!
//! # Overview
//!
//! A schedule is one durable [`ScheduleState`] record driven by six
//! operations. Every mutating operation may arm a single deferred `Run`
//! signal through the hosting [`ScheduleContext`]; each `Run` launches the
//! workload when due and re-arms itself, so a schedule keeps ticking without
//! any external poller.
//!
//! | Operation | Requires                 | Effect                                        |
//! |-----------|--------------------------|-----------------------------------------------|
//! | `Create`  | `Uninitialized`          | attach config, `Active`, arm run now          |
//! | `Update`  | configuration present    | merge fields, rotate token, arm run now       |
//! | `Pause`   | `Active`                 | `Paused`, clear due time, rotate token        |
//! | `Resume`  | `Paused`                 | `Active`, clear due time, arm run now         |
//! | `Delete`  | not `Deleted`            | `Deleted` tombstone, rotate token             |
//! | `Run`     | matching token, `Active` | launch when due, re-arm at next due time      |
//!
//! Timer signals may be delivered more than once and cannot be cancelled once
//! enqueued. A `Run` whose token no longer matches the state is discarded on
//! arrival, which is how pause, update and delete cancel in-flight ticks.

pub mod configuration;
pub mod context;
pub mod error;
pub mod machine;
pub mod state;

pub use configuration::{ConfigField, ScheduleConfiguration, ScheduleRequest};
pub use context::{ScheduleContext, ScheduleOperation, WorkloadLaunch};
pub use error::{Result, ScheduleError};
pub use machine::{RunOutcome, ScheduleStateMachine};
pub use state::{ExecutionToken, ScheduleState, ScheduleStatus};
