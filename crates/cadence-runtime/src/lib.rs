//! `cadence-runtime`: the durable substrate that hosts schedule state machines.
//!
//! - [`ScheduleHost`] persists each schedule's state in SQLite and runs one
//!   operation at a time against it.
//! - Deferred `Run` ticks live in a SQLite signal queue and are delivered by
//!   the [`SignalDispatcher`].
//! - Launches are claimed per instance id and executed by the
//!   [`WorkloadRunner`] against a [`WorkloadRegistry`].

pub mod clock;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod workload;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::SignalDispatcher;
pub use error::{Result, RuntimeError};
pub use host::{InstanceStatus, LaunchRequest, ScheduleHost, ScheduleRecord, StoredSignal};
pub use workload::{Workload, WorkloadInvocation, WorkloadRegistry, WorkloadRunner};
