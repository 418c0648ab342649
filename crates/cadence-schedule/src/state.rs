use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::configuration::{
    new_identifier, validate_interval, ConfigField, ScheduleConfiguration, ScheduleRequest,
};
use crate::error::{Result, ScheduleError};

/// Lifecycle status of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Referenced but never created.
    #[default]
    Uninitialized,
    /// Ticking.
    Active,
    /// Created, not ticking until resumed.
    Paused,
    /// Terminal tombstone.
    Deleted,
}

impl ScheduleStatus {
    /// Statuses reachable from `self` in a single transition.
    pub const fn allowed_transitions(self) -> &'static [ScheduleStatus] {
        match self {
            ScheduleStatus::Uninitialized => &[ScheduleStatus::Active],
            ScheduleStatus::Active => &[ScheduleStatus::Paused, ScheduleStatus::Deleted],
            ScheduleStatus::Paused => &[ScheduleStatus::Active, ScheduleStatus::Deleted],
            ScheduleStatus::Deleted => &[],
        }
    }

    pub fn can_transition_to(self, to: ScheduleStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleStatus::Uninitialized => "uninitialized",
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uninitialized" => Ok(ScheduleStatus::Uninitialized),
            "active" => Ok(ScheduleStatus::Active),
            "paused" => Ok(ScheduleStatus::Paused),
            "deleted" => Ok(ScheduleStatus::Deleted),
            other => Err(format!("unknown schedule status: {other}")),
        }
    }
}

/// Generation marker carried by every deferred `Run` signal.
///
/// Rotating the token on the state orphans every signal armed under the
/// previous value; those signals discard themselves on arrival.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionToken(String);

impl ExecutionToken {
    pub fn generate() -> Self {
        Self(new_identifier())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionToken {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for ExecutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ExecutionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ExecutionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The durable record of one schedule.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleState {
    pub status: ScheduleStatus,
    pub execution_token: ExecutionToken,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    /// Absent until the schedule is created.
    pub configuration: Option<ScheduleConfiguration>,
}

impl ScheduleState {
    /// Move to `to` if the transition table allows it.
    pub fn transition_to(&mut self, to: ScheduleStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(ScheduleError::invalid_state(format!(
                "Invalid state transition: cannot transition from {} to {to}",
                self.status
            )));
        }
        self.status = to;
        Ok(())
    }

    /// Replace the execution token, invalidating every pending `Run` signal.
    pub fn rotate_token(&mut self) {
        self.execution_token = ExecutionToken::generate();
    }

    /// Apply the present fields of `update` to the stored configuration.
    ///
    /// Absent fields are left alone; empty strings and a zero
    /// `max_occurrence` count as absent. The configuration version is bumped
    /// even when nothing changes. The schedule id is the record's identity and
    /// is never merged.
    ///
    /// Returns the names of the fields that were written.
    pub fn merge_config(&mut self, update: &ScheduleRequest) -> Result<BTreeSet<ConfigField>> {
        let Some(config) = self.configuration.as_mut() else {
            return Err(ScheduleError::invalid_state(
                "Schedule configuration is not initialized",
            ));
        };
        // Validate before the first write so a rejected update leaves no trace.
        if let Some(interval) = update.interval {
            validate_interval(interval)?;
        }

        let mut changed = BTreeSet::new();
        config.version += 1;

        if let Some(name) = non_empty(&update.orchestration_name) {
            config.set_orchestration_name(name)?;
            changed.insert(ConfigField::OrchestrationName);
        }
        if let Some(input) = non_empty(&update.orchestration_input) {
            config.orchestration_input = Some(input.to_string());
            changed.insert(ConfigField::OrchestrationInput);
        }
        if let Some(instance_id) = non_empty(&update.orchestration_instance_id) {
            config.orchestration_instance_id = Some(instance_id.to_string());
            changed.insert(ConfigField::OrchestrationInstanceId);
        }
        if let Some(start_at) = update.start_at {
            config.start_at = Some(start_at);
            changed.insert(ConfigField::StartAt);
        }
        if let Some(end_at) = update.end_at {
            config.end_at = Some(end_at);
            changed.insert(ConfigField::EndAt);
        }
        if let Some(interval) = update.interval {
            config.set_interval(interval)?;
            changed.insert(ConfigField::Interval);
        }
        if let Some(cron) = non_empty(&update.cron_expression) {
            config.cron_expression = Some(cron.to_string());
            changed.insert(ConfigField::CronExpression);
        }
        if let Some(max) = update.max_occurrence.filter(|m| *m != 0) {
            config.max_occurrence = max;
            changed.insert(ConfigField::MaxOccurrence);
        }
        if let Some(flag) = update.start_immediately_if_late {
            config.start_immediately_if_late = Some(flag);
            changed.insert(ConfigField::StartImmediatelyIfLate);
        }

        Ok(changed)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn created_state() -> ScheduleState {
        let config = ScheduleConfiguration::new("Report", Some("s1".into()))
            .unwrap()
            .with_interval(Duration::from_secs(60))
            .unwrap();
        ScheduleState {
            status: ScheduleStatus::Active,
            configuration: Some(config),
            ..Default::default()
        }
    }

    #[test]
    fn transition_table() {
        use ScheduleStatus::*;
        assert!(Uninitialized.can_transition_to(Active));
        assert!(!Uninitialized.can_transition_to(Paused));
        assert!(!Uninitialized.can_transition_to(Deleted));
        assert!(Active.can_transition_to(Paused));
        assert!(Active.can_transition_to(Deleted));
        assert!(!Active.can_transition_to(Active));
        assert!(Paused.can_transition_to(Active));
        assert!(Paused.can_transition_to(Deleted));
        assert!(Deleted.is_terminal());
        assert!(!Deleted.can_transition_to(Active));
    }

    #[test]
    fn rejected_transition_keeps_status() {
        let mut state = ScheduleState::default();
        let before = state.clone();
        assert!(state.transition_to(ScheduleStatus::Paused).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            ScheduleStatus::Uninitialized,
            ScheduleStatus::Active,
            ScheduleStatus::Paused,
            ScheduleStatus::Deleted,
        ] {
            assert_eq!(status.to_string().parse::<ScheduleStatus>().unwrap(), status);
        }
        assert!("gone".parse::<ScheduleStatus>().is_err());
    }

    #[test]
    fn rotate_token_changes_value() {
        let mut state = ScheduleState::default();
        let old = state.execution_token.clone();
        state.rotate_token();
        assert_ne!(state.execution_token, old);
    }

    #[test]
    fn merge_requires_configuration() {
        let mut state = ScheduleState::default();
        let err = state.merge_config(&ScheduleRequest::default()).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidState(_)));
    }

    #[test]
    fn merge_reports_only_present_fields() {
        let mut state = created_state();
        let update = ScheduleRequest {
            schedule_id: Some("s1".into()),
            orchestration_input: Some("{\"symbols\":5}".into()),
            interval: Some(Duration::from_secs(120)),
            ..Default::default()
        };
        let changed = state.merge_config(&update).unwrap();
        assert_eq!(
            changed.into_iter().collect::<Vec<_>>(),
            vec![ConfigField::OrchestrationInput, ConfigField::Interval]
        );
        let config = state.configuration.as_ref().unwrap();
        assert_eq!(config.interval(), Some(Duration::from_secs(120)));
        assert_eq!(config.version(), 2);
    }

    #[test]
    fn empty_merge_still_bumps_version() {
        let mut state = created_state();
        let changed = state.merge_config(&ScheduleRequest::default()).unwrap();
        assert!(changed.is_empty());
        assert_eq!(state.configuration.as_ref().unwrap().version(), 2);
    }

    // Zero and empty values are indistinguishable from "not provided": an
    // update cannot reset max_occurrence to 0 or clear the input.
    #[test]
    fn zero_and_empty_values_are_ignored() {
        let mut state = created_state();
        state.configuration.as_mut().unwrap().max_occurrence = 5;
        state.configuration.as_mut().unwrap().orchestration_input = Some("keep".into());

        let update = ScheduleRequest {
            max_occurrence: Some(0),
            orchestration_input: Some(String::new()),
            ..Default::default()
        };
        assert!(state.merge_config(&update).unwrap().is_empty());
        let config = state.configuration.as_ref().unwrap();
        assert_eq!(config.max_occurrence, 5);
        assert_eq!(config.orchestration_input.as_deref(), Some("keep"));
    }

    #[test]
    fn invalid_interval_update_leaves_state_untouched() {
        let mut state = created_state();
        let before = state.clone();
        let update = ScheduleRequest {
            orchestration_name: Some("Other".into()),
            interval: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        assert!(state.merge_config(&update).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn state_serialises_camel_case() {
        let state = created_state();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "active");
        assert!(json.get("executionToken").is_some());
        assert!(json.get("nextRunAt").is_some());
        let back: ScheduleState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
