use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::host::ScheduleHost;

/// Delivers due signals from the queue back into their schedules.
///
/// A signal is acknowledged only after its operation has been executed, so a
/// crash in between redelivers it on the next start.
pub struct SignalDispatcher {
    host: Arc<ScheduleHost>,
    poll_interval: Duration,
    batch_size: usize,
}

impl SignalDispatcher {
    pub fn new(host: Arc<ScheduleHost>, poll_interval: Duration, batch_size: usize) -> Self {
        Self {
            host,
            poll_interval,
            batch_size: batch_size.max(1),
        }
    }

    /// Deliver every signal that is due right now, including ones enqueued
    /// while draining. Returns how many were delivered.
    pub fn drain(&self) -> Result<usize> {
        let mut delivered = 0;
        loop {
            let due = self.host.due_signals(self.batch_size)?;
            if due.is_empty() {
                break;
            }
            for signal in due {
                debug!(
                    signal_id = signal.id,
                    schedule_id = %signal.schedule_id,
                    op = signal.operation.name(),
                    "delivering signal"
                );
                // A rejected operation is final; redelivering it would fail the same way.
                if let Err(e) = self.host.deliver(&signal) {
                    warn!(
                        signal_id = signal.id,
                        schedule_id = %signal.schedule_id,
                        code = e.code(),
                        "signal rejected: {e}"
                    );
                }
                self.host.ack_signal(signal.id)?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Main loop. Drains on every poll tick and whenever a due signal is
    /// enqueued, until `shutdown` broadcasts `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "signal dispatcher started");
        let notify = self.host.signal_notify();

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("signal dispatcher shutting down");
                        break;
                    }
                    continue;
                }
            }
            if let Err(e) = self.drain() {
                error!("signal dispatch error: {e}");
            }
        }
    }
}
