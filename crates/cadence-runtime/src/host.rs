use std::fmt;
use std::sync::{Arc, Mutex};

use cadence_schedule::configuration::new_identifier;
use cadence_schedule::{
    ExecutionToken, ScheduleConfiguration, ScheduleContext, ScheduleError, ScheduleOperation,
    ScheduleRequest, ScheduleState, ScheduleStateMachine, ScheduleStatus, WorkloadLaunch,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, instrument, warn};

use crate::clock::Clock;
use crate::db::init_db;
use crate::error::{Result, RuntimeError};

/// A deferred operation waiting in the signal queue.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSignal {
    pub id: i64,
    pub schedule_id: String,
    pub operation: ScheduleOperation,
    pub not_before: DateTime<Utc>,
}

/// A claimed workload launch, handed to the [`WorkloadRunner`](crate::workload::WorkloadRunner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub schedule_id: String,
    pub workload: String,
    pub input: Option<String>,
    pub instance_id: String,
}

/// Lifecycle of one launched workload instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
    Failed,
    /// Was running when the process stopped.
    Interrupted,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Interrupted => "interrupted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(InstanceStatus::Running),
            "completed" => Ok(InstanceStatus::Completed),
            "failed" => Ok(InstanceStatus::Failed),
            "interrupted" => Ok(InstanceStatus::Interrupted),
            other => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// A persisted schedule row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub schedule_id: String,
    pub state: ScheduleState,
    pub created_at: String,
    pub updated_at: String,
}

/// Durable host for schedule state machines.
///
/// Each operation loads the schedule's state, runs the state machine against
/// a buffering context, and commits the new state together with any signals
/// and launches it produced in a single SQLite transaction. A rejected
/// operation writes nothing.
///
/// The connection mutex is held for the whole operation, so operations on
/// the same schedule never interleave.
pub struct ScheduleHost {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    /// If set, claimed launches are sent here for execution.
    launch_tx: Option<mpsc::Sender<LaunchRequest>>,
    /// Woken whenever a signal is enqueued that is already due.
    signal_notify: Arc<Notify>,
}

impl ScheduleHost {
    /// Create a host, initialising the DB schema if needed.
    ///
    /// The sender is used non-blockingly (`try_send`); a launch that cannot be
    /// queued is recorded as failed.
    pub fn new(
        conn: Connection,
        clock: Arc<dyn Clock>,
        launch_tx: Option<mpsc::Sender<LaunchRequest>>,
    ) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock,
            launch_tx,
            signal_notify: Arc::new(Notify::new()),
        })
    }

    pub fn signal_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.signal_notify)
    }

    pub fn create(&self, config: ScheduleConfiguration) -> Result<()> {
        let schedule_id = config.schedule_id().to_string();
        self.execute(&schedule_id, ScheduleOperation::Create(config))
    }

    /// Apply a partial update. The request must name its schedule.
    pub fn update(&self, request: ScheduleRequest) -> Result<()> {
        let schedule_id = request
            .schedule_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ScheduleError::Validation("scheduleId is required".to_string()))?;
        self.execute(&schedule_id, ScheduleOperation::Update(request))
    }

    pub fn pause(&self, schedule_id: &str) -> Result<()> {
        self.execute(schedule_id, ScheduleOperation::Pause)
    }

    pub fn resume(&self, schedule_id: &str) -> Result<()> {
        self.execute(schedule_id, ScheduleOperation::Resume)
    }

    pub fn delete(&self, schedule_id: &str) -> Result<()> {
        self.execute(schedule_id, ScheduleOperation::Delete)
    }

    pub fn run(&self, schedule_id: &str, token: ExecutionToken) -> Result<()> {
        self.execute(schedule_id, ScheduleOperation::Run { token })
    }

    /// Run one operation against `schedule_id` and persist the outcome.
    #[instrument(skip(self, operation), fields(op = operation.name()))]
    pub fn execute(&self, schedule_id: &str, operation: ScheduleOperation) -> Result<()> {
        if let ScheduleOperation::Create(config) = &operation {
            if config.schedule_id() != schedule_id {
                return Err(ScheduleError::Validation(format!(
                    "configuration is for schedule {}, not {schedule_id}",
                    config.schedule_id()
                ))
                .into());
            }
        }

        let now = self.clock.now();
        let (wake, claimed) = {
            let mut db = self.db.lock().unwrap();
            let tx = db.transaction()?;

            let state = load_state(&tx, schedule_id)?.unwrap_or_default();
            let mut machine = ScheduleStateMachine::new(state);
            let mut ctx = HostContext::new(now);
            // An error here drops `tx` uncommitted.
            machine.apply(operation, &mut ctx)?;

            save_state(&tx, schedule_id, machine.state(), now)?;
            let wake = ctx.signals.iter().any(|(_, _, at)| *at <= now);
            for (target, op, not_before) in &ctx.signals {
                enqueue_signal(&tx, target, op, *not_before, now)?;
            }
            let mut claimed = Vec::new();
            for launch in ctx.launches {
                if let Some(request) = claim_instance(&tx, launch, now)? {
                    claimed.push(request);
                }
            }
            tx.commit()?;
            (wake, claimed)
        };

        if wake {
            self.signal_notify.notify_one();
        }
        for request in claimed {
            self.forward(request);
        }
        Ok(())
    }

    /// Deliver a queued signal. The caller acknowledges it afterwards.
    pub fn deliver(&self, signal: &StoredSignal) -> Result<()> {
        self.execute(&signal.schedule_id, signal.operation.clone())
    }

    /// Signals whose `not_before` has arrived, oldest first.
    ///
    /// Rows that no longer decode are logged and discarded. If that leaves an
    /// active schedule with nothing queued, a `Run` with its current token is
    /// enqueued so the schedule keeps ticking.
    pub fn due_signals(&self, limit: usize) -> Result<Vec<StoredSignal>> {
        let now = self.clock.now();
        let db = self.db.lock().unwrap();
        let rows: Vec<(i64, String, String, i64, i64)> = {
            let mut stmt = db.prepare_cached(
                "SELECT id, schedule_id, operation, not_before_secs, not_before_nanos
                 FROM schedule_signals
                 WHERE (not_before_secs, not_before_nanos) <= (?1, ?2)
                 ORDER BY not_before_secs, not_before_nanos, id LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![
                        now.timestamp(),
                        now.timestamp_subsec_nanos(),
                        limit as i64
                    ],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, i64>(4)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut signals = Vec::with_capacity(rows.len());
        for (id, schedule_id, operation, secs, nanos) in rows {
            match decode_signal(id, schedule_id.clone(), &operation, secs, nanos) {
                Ok(signal) => signals.push(signal),
                Err(e) => {
                    error!(signal_id = id, %schedule_id, "discarding undecodable signal: {e}");
                    db.execute("DELETE FROM schedule_signals WHERE id = ?1", [id])?;
                    rearm_if_orphaned(&db, &schedule_id, now)?;
                }
            }
        }
        Ok(signals)
    }

    /// Every queued signal for one schedule, due or not.
    pub fn pending_signals(&self, schedule_id: &str) -> Result<Vec<StoredSignal>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, schedule_id, operation, not_before_secs, not_before_nanos
             FROM schedule_signals
             WHERE schedule_id = ?1 ORDER BY not_before_secs, not_before_nanos, id",
        )?;
        let rows = stmt
            .query_map([schedule_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, schedule_id, op, secs, nanos)| {
                decode_signal(id, schedule_id, &op, secs, nanos)
            })
            .collect()
    }

    /// Remove a processed signal from the queue.
    pub fn ack_signal(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM schedule_signals WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Fetch one schedule.
    pub fn get(&self, schedule_id: &str) -> Result<ScheduleRecord> {
        let db = self.db.lock().unwrap();
        let row = db
            .query_row(
                "SELECT schedule_id, state, created_at, updated_at FROM schedules
                 WHERE schedule_id = ?1",
                [schedule_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let (schedule_id, state, created_at, updated_at) = row.ok_or_else(|| RuntimeError::NotFound {
            id: schedule_id.to_string(),
        })?;
        Ok(ScheduleRecord {
            schedule_id,
            state: serde_json::from_str(&state)?,
            created_at,
            updated_at,
        })
    }

    /// Return all known schedules ordered by creation time, tombstones included.
    pub fn list(&self) -> Result<Vec<ScheduleRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT schedule_id, state, created_at, updated_at FROM schedules
             ORDER BY created_at, schedule_id",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .filter_map(|r| {
                let (schedule_id, state_json, created_at, updated_at) = r.ok()?;
                let state = match serde_json::from_str(&state_json) {
                    Ok(state) => state,
                    Err(e) => {
                        error!(%schedule_id, "bad schedule state JSON: {e}");
                        return None;
                    }
                };
                Some(ScheduleRecord {
                    schedule_id,
                    state,
                    created_at,
                    updated_at,
                })
            })
            .collect();
        Ok(records)
    }

    /// Record the end of a workload instance that is still marked running.
    pub fn finish_instance(&self, instance_id: &str, status: InstanceStatus) -> Result<()> {
        let now = timestamp(self.clock.now());
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE workload_instances SET status = ?1, finished_at = ?2
             WHERE instance_id = ?3 AND status = 'running'",
            rusqlite::params![status.to_string(), now, instance_id],
        )?;
        Ok(())
    }

    pub fn instance_status(&self, instance_id: &str) -> Result<Option<InstanceStatus>> {
        let db = self.db.lock().unwrap();
        let status: Option<String> = db
            .query_row(
                "SELECT status FROM workload_instances WHERE instance_id = ?1",
                [instance_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.and_then(|s| s.parse().ok()))
    }

    /// On startup, mark instances left running by a previous process as
    /// interrupted so their ids can be launched again.
    pub fn recover_on_startup(&self) -> Result<usize> {
        let now = timestamp(self.clock.now());
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE workload_instances SET status = 'interrupted', finished_at = ?1
             WHERE status = 'running'",
            [&now],
        )?;
        if n > 0 {
            warn!(count = n, "workload instances marked interrupted on startup");
        }
        Ok(n)
    }

    // --- private helpers ---------------------------------------------------

    fn forward(&self, request: LaunchRequest) {
        let instance_id = request.instance_id.clone();
        let delivered = match &self.launch_tx {
            // try_send never blocks the caller; a full channel drops the launch.
            Some(tx) => tx.try_send(request).is_ok(),
            None => false,
        };
        if delivered {
            return;
        }

        warn!(%instance_id, "launch channel full, closed or absent - launch dropped");
        if let Err(e) = self.finish_instance(&instance_id, InstanceStatus::Failed) {
            error!(%instance_id, "failed to record dropped launch: {e}");
        }
    }
}

/// Buffers the effects of one operation until the host commits them.
struct HostContext {
    now: DateTime<Utc>,
    signals: Vec<(String, ScheduleOperation, DateTime<Utc>)>,
    launches: Vec<WorkloadLaunch>,
}

impl HostContext {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            signals: Vec::new(),
            launches: Vec::new(),
        }
    }
}

impl ScheduleContext for HostContext {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn schedule_deferred(
        &mut self,
        schedule_id: &str,
        operation: ScheduleOperation,
        not_before: DateTime<Utc>,
    ) {
        self.signals.push((schedule_id.to_string(), operation, not_before));
    }

    fn start_workload(&mut self, launch: WorkloadLaunch) {
        self.launches.push(launch);
    }
}

/// Text form for the informational timestamp columns.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn load_state(conn: &Connection, schedule_id: &str) -> Result<Option<ScheduleState>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT state FROM schedules WHERE schedule_id = ?1",
            [schedule_id],
            |row| row.get(0),
        )
        .optional()?;
    json.map(|j| serde_json::from_str(&j).map_err(RuntimeError::from))
        .transpose()
}

fn save_state(
    tx: &Transaction<'_>,
    schedule_id: &str,
    state: &ScheduleState,
    now: DateTime<Utc>,
) -> Result<()> {
    let json = serde_json::to_string(state)?;
    let now = timestamp(now);
    tx.execute(
        "INSERT INTO schedules (schedule_id, status, state, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(schedule_id) DO UPDATE
         SET status = excluded.status, state = excluded.state, updated_at = excluded.updated_at",
        rusqlite::params![schedule_id, state.status.to_string(), json, now],
    )?;
    Ok(())
}

fn enqueue_signal(
    conn: &Connection,
    schedule_id: &str,
    operation: &ScheduleOperation,
    not_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    let json = serde_json::to_string(operation)?;
    conn.execute(
        "INSERT INTO schedule_signals
         (schedule_id, operation, not_before_secs, not_before_nanos, enqueued_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            schedule_id,
            json,
            not_before.timestamp(),
            not_before.timestamp_subsec_nanos(),
            timestamp(now)
        ],
    )?;
    Ok(())
}

/// Queue a `Run` for an active schedule that has no signal left.
fn rearm_if_orphaned(conn: &Connection, schedule_id: &str, now: DateTime<Utc>) -> Result<bool> {
    let pending: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schedule_signals WHERE schedule_id = ?1",
        [schedule_id],
        |row| row.get(0),
    )?;
    if pending > 0 {
        return Ok(false);
    }
    let Some(state) = load_state(conn, schedule_id)? else {
        return Ok(false);
    };
    if state.status != ScheduleStatus::Active || state.configuration.is_none() {
        return Ok(false);
    }

    let token = state.execution_token;
    warn!(%schedule_id, %token, "schedule had no pending run - re-armed");
    enqueue_signal(conn, schedule_id, &ScheduleOperation::Run { token }, now, now)?;
    Ok(true)
}

/// Record a launch unless an instance with the same id is still running.
fn claim_instance(
    tx: &Transaction<'_>,
    launch: WorkloadLaunch,
    now: DateTime<Utc>,
) -> Result<Option<LaunchRequest>> {
    let instance_id = launch
        .orchestration_instance_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(new_identifier);

    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM workload_instances WHERE instance_id = ?1",
            [&instance_id],
            |row| row.get(0),
        )
        .optional()?;
    if status.as_deref() == Some("running") {
        info!(
            schedule_id = %launch.schedule_id,
            %instance_id,
            "workload instance already running - launch skipped"
        );
        return Ok(None);
    }

    tx.execute(
        "INSERT INTO workload_instances
         (instance_id, schedule_id, workload, input, status, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, 'running', ?5, NULL)
         ON CONFLICT(instance_id) DO UPDATE
         SET schedule_id = excluded.schedule_id, workload = excluded.workload,
             input = excluded.input, status = 'running',
             started_at = excluded.started_at, finished_at = NULL",
        rusqlite::params![
            instance_id,
            launch.schedule_id,
            launch.orchestration_name,
            launch.orchestration_input,
            timestamp(now)
        ],
    )?;

    Ok(Some(LaunchRequest {
        schedule_id: launch.schedule_id,
        workload: launch.orchestration_name,
        input: launch.orchestration_input,
        instance_id,
    }))
}

fn decode_signal(
    id: i64,
    schedule_id: String,
    operation: &str,
    secs: i64,
    nanos: i64,
) -> Result<StoredSignal> {
    let operation: ScheduleOperation = serde_json::from_str(operation)?;
    let not_before = u32::try_from(nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(secs, nanos))
        .ok_or_else(|| {
            ScheduleError::Validation(format!("bad signal timestamp: {secs}s {nanos}ns"))
        })?;
    Ok(StoredSignal {
        id,
        schedule_id,
        operation,
        not_before,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::clock::ManualClock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
    }

    fn config(id: &str) -> ScheduleConfiguration {
        let mut config = ScheduleConfiguration::new("GenStockReportOrchestrator", Some(id.into()))
            .unwrap()
            .with_interval(Duration::from_secs(60))
            .unwrap();
        config.orchestration_instance_id = Some(format!("{id}-instance"));
        config
    }

    fn host() -> (ScheduleHost, Arc<ManualClock>, mpsc::Receiver<LaunchRequest>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let (tx, rx) = mpsc::channel(16);
        let conn = Connection::open_in_memory().unwrap();
        let host = ScheduleHost::new(conn, clock.clone(), Some(tx)).unwrap();
        (host, clock, rx)
    }

    fn deliver_due(host: &ScheduleHost) -> usize {
        let due = host.due_signals(64).unwrap();
        for signal in &due {
            let _ = host.deliver(signal);
            host.ack_signal(signal.id).unwrap();
        }
        due.len()
    }

    #[test]
    fn create_persists_state_and_due_signal() {
        let (host, _clock, _rx) = host();
        host.create(config("s1")).unwrap();

        let record = host.get("s1").unwrap();
        assert_eq!(record.state.status, ScheduleStatus::Active);

        let due = host.due_signals(10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].not_before, t0());
        assert_eq!(
            due[0].operation,
            ScheduleOperation::Run {
                token: record.state.execution_token
            }
        );
    }

    #[test]
    fn rejected_operation_writes_nothing() {
        let (host, _clock, _rx) = host();
        let err = host.pause("ghost").unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert!(matches!(host.get("ghost"), Err(RuntimeError::NotFound { .. })));
        assert!(host.list().unwrap().is_empty());

        host.create(config("s1")).unwrap();
        let before = host.get("s1").unwrap().state;
        assert!(host.create(config("s1")).is_err());
        assert_eq!(host.get("s1").unwrap().state, before);
        assert_eq!(host.pending_signals("s1").unwrap().len(), 1);
    }

    #[test]
    fn create_under_foreign_key_is_rejected() {
        let (host, _clock, _rx) = host();
        let err = host
            .execute("other", ScheduleOperation::Create(config("s1")))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn chain_launches_once_per_interval() {
        let (host, clock, mut rx) = host();
        host.create(config("s1")).unwrap();

        assert_eq!(deliver_due(&host), 1);
        let launch = rx.try_recv().unwrap();
        assert_eq!(launch.workload, "GenStockReportOrchestrator");
        assert_eq!(launch.instance_id, "s1-instance");
        host.finish_instance("s1-instance", InstanceStatus::Completed).unwrap();

        let pending = host.pending_signals("s1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].not_before, t0() + TimeDelta::seconds(60));

        // Nothing due before the boundary.
        clock.advance(TimeDelta::seconds(30));
        assert_eq!(deliver_due(&host), 0);

        clock.advance(TimeDelta::seconds(30));
        assert_eq!(deliver_due(&host), 1);
        assert!(rx.try_recv().is_ok());
        assert_eq!(
            host.get("s1").unwrap().state.last_run_at,
            Some(t0() + TimeDelta::seconds(60))
        );
    }

    #[test]
    fn running_instance_suppresses_duplicate_launch() {
        let (host, clock, mut rx) = host();
        host.create(config("s1")).unwrap();
        deliver_due(&host);
        assert!(rx.try_recv().is_ok());
        assert_eq!(
            host.instance_status("s1-instance").unwrap(),
            Some(InstanceStatus::Running)
        );

        clock.advance(TimeDelta::seconds(60));
        deliver_due(&host);
        assert!(rx.try_recv().is_err());
        // The tick still counts as a run; dispatch is fire-and-forget.
        assert_eq!(
            host.get("s1").unwrap().state.last_run_at,
            Some(t0() + TimeDelta::seconds(60))
        );
    }

    #[test]
    fn pause_orphans_pending_tick() {
        let (host, clock, mut rx) = host();
        host.create(config("s1")).unwrap();
        deliver_due(&host);
        rx.try_recv().unwrap();
        host.finish_instance("s1-instance", InstanceStatus::Completed).unwrap();

        clock.advance(TimeDelta::seconds(10));
        host.pause("s1").unwrap();
        let paused = host.get("s1").unwrap().state;

        clock.advance(TimeDelta::seconds(60));
        assert_eq!(deliver_due(&host), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(host.get("s1").unwrap().state, paused);
        assert!(host.pending_signals("s1").unwrap().is_empty());
    }

    #[test]
    fn redelivered_signal_does_not_launch_twice() {
        let (host, _clock, mut rx) = host();
        host.create(config("s1")).unwrap();
        let signal = host.due_signals(1).unwrap().remove(0);

        host.deliver(&signal).unwrap();
        host.finish_instance("s1-instance", InstanceStatus::Completed).unwrap();
        host.deliver(&signal).unwrap();
        host.ack_signal(signal.id).unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_launch_is_recorded_as_failed() {
        let clock = Arc::new(ManualClock::new(t0()));
        let conn = Connection::open_in_memory().unwrap();
        let host = ScheduleHost::new(conn, clock, None).unwrap();
        host.create(config("s1")).unwrap();
        deliver_due(&host);
        assert_eq!(
            host.instance_status("s1-instance").unwrap(),
            Some(InstanceStatus::Failed)
        );
    }

    #[test]
    fn state_and_signals_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.db");
        let clock = Arc::new(ManualClock::new(t0()));

        {
            let host =
                ScheduleHost::new(Connection::open(&path).unwrap(), clock.clone(), None).unwrap();
            host.create(config("s1")).unwrap();
        }

        let (tx, mut rx) = mpsc::channel(4);
        let host = ScheduleHost::new(Connection::open(&path).unwrap(), clock, Some(tx)).unwrap();
        assert_eq!(host.recover_on_startup().unwrap(), 0);
        assert_eq!(deliver_due(&host), 1);
        assert_eq!(rx.try_recv().unwrap().schedule_id, "s1");
    }

    #[test]
    fn recover_marks_running_instances_interrupted() {
        let (host, _clock, _rx) = host();
        host.create(config("s1")).unwrap();
        deliver_due(&host);
        assert_eq!(host.recover_on_startup().unwrap(), 1);
        assert_eq!(
            host.instance_status("s1-instance").unwrap(),
            Some(InstanceStatus::Interrupted)
        );
    }

    #[test]
    fn delete_keeps_tombstone() {
        let (host, _clock, _rx) = host();
        host.create(config("s1")).unwrap();
        host.delete("s1").unwrap();
        let record = host.get("s1").unwrap();
        assert_eq!(record.state.status, ScheduleStatus::Deleted);
        assert!(host.delete("s1").is_err());
        assert_eq!(host.list().unwrap().len(), 1);
    }

    #[test]
    fn update_requires_schedule_id() {
        let (host, _clock, _rx) = host();
        let err = host.update(ScheduleRequest::default()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn far_future_run_is_not_due_until_its_time() {
        let (host, clock, mut rx) = host();
        let start = Utc.with_ymd_and_hms(12000, 1, 1, 0, 0, 0).unwrap();
        let mut config = config("s1");
        config.start_at = Some(start);
        host.create(config).unwrap();

        // Initial tick only arms the run at `start_at`.
        assert_eq!(deliver_due(&host), 1);
        assert!(rx.try_recv().is_err());
        let pending = host.pending_signals("s1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].not_before, start);
        assert!(host.due_signals(10).unwrap().is_empty());

        clock.set(start);
        assert_eq!(deliver_due(&host), 1);
        assert_eq!(rx.try_recv().unwrap().instance_id, "s1-instance");
        assert_eq!(host.get("s1").unwrap().state.last_run_at, Some(start));
    }

    #[test]
    fn undecodable_run_is_replaced_for_active_schedule() {
        let (host, clock, mut rx) = host();
        host.create(config("s1")).unwrap();
        assert_eq!(deliver_due(&host), 1);
        rx.try_recv().unwrap();
        host.finish_instance("s1-instance", InstanceStatus::Completed).unwrap();

        host.db
            .lock()
            .unwrap()
            .execute(
                "UPDATE schedule_signals SET operation = 'garbage' WHERE schedule_id = 's1'",
                [],
            )
            .unwrap();

        clock.advance(TimeDelta::seconds(60));
        assert!(host.due_signals(10).unwrap().is_empty());

        let token = host.get("s1").unwrap().state.execution_token;
        let pending = host.pending_signals("s1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, ScheduleOperation::Run { token });
        assert_eq!(pending[0].not_before, clock.now());

        assert_eq!(deliver_due(&host), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn undecodable_signal_of_paused_schedule_is_dropped() {
        let (host, clock, _rx) = host();
        host.create(config("s1")).unwrap();
        host.pause("s1").unwrap();

        host.db
            .lock()
            .unwrap()
            .execute(
                "UPDATE schedule_signals SET not_before_nanos = -1 WHERE schedule_id = 's1'",
                [],
            )
            .unwrap();

        clock.advance(TimeDelta::seconds(1));
        assert!(host.due_signals(10).unwrap().is_empty());
        assert!(host.pending_signals("s1").unwrap().is_empty());
        assert_eq!(host.get("s1").unwrap().state.status, ScheduleStatus::Paused);
    }
}
