use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

/// Shortest interval a schedule may be configured with.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Longest interval a schedule may be configured with (100 years).
pub const MAX_INTERVAL: Duration = Duration::from_secs(36_500 * 86_400);

/// Desired scheduling parameters for one schedule.
///
/// The workload name, schedule id and interval are validated on every write;
/// the remaining fields are plain data. `end_at`, `cron_expression`,
/// `max_occurrence` and `start_immediately_if_late` are persisted but not
/// consulted when deciding whether a tick is due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfiguration {
    orchestration_name: String,
    schedule_id: String,
    /// Opaque payload handed to the workload on every launch.
    pub orchestration_input: Option<String>,
    /// Launch de-duplication key.
    pub orchestration_instance_id: Option<String>,
    /// First due time. `None` means "run immediately".
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, with = "interval_text")]
    interval: Option<Duration>,
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub max_occurrence: u32,
    pub start_immediately_if_late: Option<bool>,
    #[serde(default)]
    pub(crate) version: u32,
}

impl ScheduleConfiguration {
    /// Build a configuration for `orchestration_name`.
    ///
    /// A missing or empty `schedule_id` is replaced by a generated one, and a
    /// fresh launch instance id is assigned.
    pub fn new(orchestration_name: impl Into<String>, schedule_id: Option<String>) -> Result<Self> {
        let orchestration_name = orchestration_name.into();
        if orchestration_name.is_empty() {
            return Err(ScheduleError::validation("orchestrationName must not be empty"));
        }
        let schedule_id = schedule_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_identifier);

        Ok(Self {
            orchestration_name,
            schedule_id,
            orchestration_input: None,
            orchestration_instance_id: Some(new_identifier()),
            start_at: None,
            end_at: None,
            interval: None,
            cron_expression: None,
            max_occurrence: 0,
            start_immediately_if_late: None,
            version: 1,
        })
    }

    /// Builder-style variant of [`set_interval`](Self::set_interval).
    pub fn with_interval(mut self, interval: Duration) -> Result<Self> {
        self.set_interval(interval)?;
        Ok(self)
    }

    pub fn orchestration_name(&self) -> &str {
        &self.orchestration_name
    }

    pub fn set_orchestration_name(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(ScheduleError::validation("orchestrationName must not be empty"));
        }
        self.orchestration_name = name;
        Ok(())
    }

    pub fn schedule_id(&self) -> &str {
        &self.schedule_id
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) -> Result<()> {
        validate_interval(interval)?;
        self.interval = Some(interval);
        Ok(())
    }

    /// Number of times this configuration has been written.
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// Reject intervals outside [`MIN_INTERVAL`]..=[`MAX_INTERVAL`].
pub fn validate_interval(interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(ScheduleError::validation("Interval must be positive"));
    }
    if interval < MIN_INTERVAL {
        return Err(ScheduleError::validation("Interval must be at least 1 second"));
    }
    if interval > MAX_INTERVAL {
        return Err(ScheduleError::validation("Interval must be at most 36500 days"));
    }
    Ok(())
}

/// Generate an opaque identifier (UUID v4, hyphen-free).
pub fn new_identifier() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Inbound schedule payload, as produced by the HTTP layer.
///
/// Every field is optional so the same shape serves both creation (where the
/// workload name is required) and partial updates (where only present fields
/// are applied).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(default)]
    pub orchestration_name: Option<String>,
    #[serde(default)]
    pub schedule_id: Option<String>,
    #[serde(default)]
    pub orchestration_input: Option<String>,
    #[serde(default)]
    pub orchestration_instance_id: Option<String>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, with = "interval_text")]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub max_occurrence: Option<u32>,
    #[serde(default)]
    pub start_immediately_if_late: Option<bool>,
}

impl ScheduleRequest {
    /// Check the fields that carry constraints, without building anything.
    pub fn validate(&self) -> Result<()> {
        if let Some(interval) = self.interval {
            validate_interval(interval)?;
        }
        Ok(())
    }

    /// Turn a creation payload into a validated configuration.
    pub fn into_configuration(self) -> Result<ScheduleConfiguration> {
        self.validate()?;
        let name = self
            .orchestration_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ScheduleError::validation("orchestrationName is required"))?;

        let mut config = ScheduleConfiguration::new(name, self.schedule_id)?;
        if let Some(instance_id) = self.orchestration_instance_id.filter(|id| !id.is_empty()) {
            config.orchestration_instance_id = Some(instance_id);
        }
        config.orchestration_input = self.orchestration_input;
        config.start_at = self.start_at;
        config.end_at = self.end_at;
        config.interval = self.interval;
        config.cron_expression = self.cron_expression;
        config.max_occurrence = self.max_occurrence.unwrap_or(0);
        config.start_immediately_if_late = self.start_immediately_if_late;
        Ok(config)
    }
}

/// Names of the configuration fields an update can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfigField {
    OrchestrationName,
    OrchestrationInput,
    OrchestrationInstanceId,
    StartAt,
    EndAt,
    Interval,
    CronExpression,
    MaxOccurrence,
    StartImmediatelyIfLate,
}

impl ConfigField {
    /// Whether a change to this field invalidates the computed due time.
    pub fn affects_timing(self) -> bool {
        matches!(self, ConfigField::StartAt | ConfigField::Interval)
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigField::OrchestrationName => "OrchestrationName",
            ConfigField::OrchestrationInput => "OrchestrationInput",
            ConfigField::OrchestrationInstanceId => "OrchestrationInstanceId",
            ConfigField::StartAt => "StartAt",
            ConfigField::EndAt => "EndAt",
            ConfigField::Interval => "Interval",
            ConfigField::CronExpression => "CronExpression",
            ConfigField::MaxOccurrence => "MaxOccurrence",
            ConfigField::StartImmediatelyIfLate => "StartImmediatelyIfLate",
        };
        f.write_str(s)
    }
}

/// Parse an interval string.
///
/// Accepted forms:
/// - clock notation `HH:MM[:SS[.fff]]`, optionally prefixed with days (`1.02:00:00`)
/// - a plain number of seconds (`90`, `1.5`)
/// - compact units: `30s`, `5m`, `1h30m`, `2d`
///
/// The result is not range-checked; see [`validate_interval`].
pub fn parse_interval(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ScheduleError::validation("interval must not be empty"));
    }
    if trimmed.starts_with('-') {
        return Err(ScheduleError::validation("Interval must be positive"));
    }
    if trimmed.contains(':') {
        return parse_clock_interval(trimmed);
    }
    if let Ok(secs) = trimmed.parse::<f64>() {
        return seconds_to_duration(secs);
    }
    parse_compact_interval(trimmed)
}

/// Render an interval in clock notation, the inverse of [`parse_interval`].
pub fn format_interval(interval: Duration) -> String {
    let total = interval.as_secs();
    let (days, rem) = (total / 86_400, total % 86_400);
    let (hours, minutes, seconds) = (rem / 3_600, (rem % 3_600) / 60, rem % 60);

    let mut out = if days > 0 {
        format!("{days}.{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    };
    let nanos = interval.subsec_nanos();
    if nanos != 0 {
        let fraction = format!("{nanos:09}");
        out.push('.');
        out.push_str(fraction.trim_end_matches('0'));
    }
    out
}

fn parse_clock_interval(text: &str) -> Result<Duration> {
    let invalid = || ScheduleError::validation(format!("invalid interval: {text}"));

    let parts: Vec<&str> = text.split(':').collect();
    let (head, minutes, seconds) = match parts.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(invalid()),
    };
    let (days, hours) = match head.split_once('.') {
        Some((d, h)) => (
            d.parse::<u64>().map_err(|_| invalid())?,
            h.parse::<u64>().map_err(|_| invalid())?,
        ),
        None => (0, head.parse::<u64>().map_err(|_| invalid())?),
    };
    let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
    let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 || !(0.0..60.0).contains(&seconds) {
        return Err(invalid());
    }

    let whole = days
        .checked_mul(86_400)
        .and_then(|d| d.checked_add(hours * 3_600 + minutes * 60))
        .ok_or_else(invalid)?;
    Duration::from_secs(whole)
        .checked_add(Duration::from_secs_f64(seconds))
        .ok_or_else(invalid)
}

fn parse_compact_interval(text: &str) -> Result<Duration> {
    let invalid = || ScheduleError::validation(format!("invalid interval: {text}"));

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            _ => return Err(invalid()),
        };
        total = value
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(invalid)?;
    }
    // Trailing digits without a unit ("5m30").
    if !digits.is_empty() {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

fn seconds_to_duration(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ScheduleError::validation("Interval must be positive"));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ScheduleError::validation(format!("invalid interval: {e}")))
}

/// Serde adapter storing `Option<Duration>` as interval text.
///
/// Deserialisation also accepts a bare number of seconds.
mod interval_text {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawInterval {
        Seconds(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(interval) => s.serialize_str(&super::format_interval(*interval)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<RawInterval>::deserialize(d)? {
            None => Ok(None),
            Some(RawInterval::Seconds(secs)) => {
                super::seconds_to_duration(secs).map(Some).map_err(D::Error::custom)
            }
            Some(RawInterval::Text(text)) => {
                super::parse_interval(&text).map(Some).map_err(D::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_missing_identifiers() {
        let config = ScheduleConfiguration::new("Report", None).unwrap();
        assert_eq!(config.schedule_id().len(), 32);
        assert!(config.orchestration_instance_id.is_some());
        assert_eq!(config.version(), 1);

        let config = ScheduleConfiguration::new("Report", Some(String::new())).unwrap();
        assert!(!config.schedule_id().is_empty());
    }

    #[test]
    fn empty_orchestration_name_is_rejected() {
        let err = ScheduleConfiguration::new("", Some("s1".into())).unwrap_err();
        assert!(matches!(err, ScheduleError::Validation(_)));

        let mut config = ScheduleConfiguration::new("Report", Some("s1".into())).unwrap();
        assert!(config.set_orchestration_name("").is_err());
        assert_eq!(config.orchestration_name(), "Report");
    }

    #[test]
    fn interval_bounds() {
        let mut config = ScheduleConfiguration::new("Report", Some("s1".into())).unwrap();
        assert!(config.set_interval(Duration::ZERO).is_err());
        assert!(config.set_interval(Duration::from_millis(999)).is_err());
        assert_eq!(config.interval(), None);

        config.set_interval(Duration::from_secs(1)).unwrap();
        assert_eq!(config.interval(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn parse_interval_forms() {
        assert_eq!(parse_interval("00:00:30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("01:30").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_interval("1.02:00:00").unwrap(), Duration::from_secs(93_600));
        assert_eq!(parse_interval("00:00:01.5").unwrap(), Duration::from_millis(1_500));
        assert_eq!(parse_interval("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_interval("1h30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_interval(" 45s ").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn parse_interval_rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("-00:00:05").is_err());
        assert!(parse_interval("00:61:00").is_err());
        assert!(parse_interval("5x").is_err());
        assert!(parse_interval("5m30").is_err());
        assert!(parse_interval("a:b:c").is_err());
    }

    #[test]
    fn parse_interval_overflow_is_an_error() {
        let err = parse_interval("213503982334601.07:00:59").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(parse_interval("18446744073709551615.23:59:59.5").is_err());
        assert!(parse_interval("99999999999999999999d").is_err());
    }

    #[test]
    fn huge_intervals_parse_but_fail_validation() {
        let interval = parse_interval("3000000.00:00:00").unwrap();
        assert!(validate_interval(interval).is_err());
        assert!(validate_interval(MAX_INTERVAL).is_ok());
        assert!(validate_interval(MAX_INTERVAL + Duration::from_secs(1)).is_err());

        let request: ScheduleRequest = serde_json::from_str(
            r#"{"orchestrationName": "Report", "interval": "3000000d"}"#,
        )
        .unwrap();
        assert!(request.into_configuration().is_err());
    }

    #[test]
    fn format_interval_matches_clock_notation() {
        assert_eq!(format_interval(Duration::from_secs(30)), "00:00:30");
        assert_eq!(format_interval(Duration::from_secs(93_600)), "1.02:00:00");
        assert_eq!(format_interval(Duration::from_millis(1_500)), "00:00:01.5");
    }

    #[test]
    fn request_deserialises_camel_case_payload() {
        let json = r#"{
            "orchestrationName": "GenStockReportOrchestrator",
            "scheduleId": "daily-report",
            "interval": "00:05:00",
            "maxOccurrence": 3
        }"#;
        let request: ScheduleRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.schedule_id.as_deref(), Some("daily-report"));
        assert_eq!(request.interval, Some(Duration::from_secs(300)));
        assert_eq!(request.max_occurrence, Some(3));
        assert!(request.start_at.is_none());

        let numeric: ScheduleRequest = serde_json::from_str(r#"{"interval": 60}"#).unwrap();
        assert_eq!(numeric.interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn into_configuration_requires_name_and_valid_interval() {
        let missing_name = ScheduleRequest {
            interval: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        assert!(missing_name.into_configuration().is_err());

        let short_interval = ScheduleRequest {
            orchestration_name: Some("Report".into()),
            interval: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        assert!(short_interval.into_configuration().is_err());

        let ok = ScheduleRequest {
            orchestration_name: Some("Report".into()),
            schedule_id: Some("s1".into()),
            orchestration_instance_id: Some("fixed".into()),
            interval: Some(Duration::from_secs(60)),
            ..Default::default()
        }
        .into_configuration()
        .unwrap();
        assert_eq!(ok.schedule_id(), "s1");
        assert_eq!(ok.orchestration_instance_id.as_deref(), Some("fixed"));
        assert_eq!(ok.interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn configuration_round_trips_through_json() {
        let config = ScheduleConfiguration::new("Report", Some("s1".into()))
            .unwrap()
            .with_interval(Duration::from_secs(90))
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""interval":"00:01:30""#));
        let back: ScheduleConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
