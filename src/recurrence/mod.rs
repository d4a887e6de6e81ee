use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend weekday tokens, indexed by the UI day number (0 = Sunday).
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

const WEEKDAYS: [u8; 5] = [1, 2, 3, 4, 5];
const WEEKLY_DEFAULT_DAY: [u8; 1] = [1];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepeatType {
    #[default]
    None,
    Daily,
    Weekdays,
    Weekly,
    Monthly,
    Custom,
}

/// Compact repeat descriptor exchanged with the UI.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RepeatConfig {
    #[serde(rename = "type")]
    pub kind: RepeatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    /// 0 = Sunday ... 6 = Saturday.
    #[serde(rename = "daysOfWeek", default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<u8>>,
    #[serde(rename = "endDate", default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<u32>,
}

impl RepeatConfig {
    pub fn preset(kind: RepeatType) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn custom(interval: u32, days_of_week: Option<Vec<u8>>) -> Self {
        Self {
            kind: RepeatType::Custom,
            interval: Some(interval),
            days_of_week,
            ..Default::default()
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == RepeatType::None
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

/// Row of the `recurrence_rule` table.
///
/// Rules are deactivated rather than deleted when an item stops repeating so
/// earlier occurrences keep pointing at a valid rule.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecurrenceRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub frequency: Frequency,
    pub interval: u32,
    /// Comma separated day tokens (`MON,WED`), weekly rules only.
    #[serde(default)]
    pub by_day: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub count: Option<u32>,
}

fn default_active() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionType {
    Deleted,
    Modified,
    Completed,
}

/// A single date skipped or overridden in a recurring series.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecurrenceException {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub recurrence_id: i64,
    pub exception_date: chrono::NaiveDate,
    pub exception_type: ExceptionType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecurrenceError {
    /// `none` has no rule; the caller clears or deactivates instead.
    NotRepeating,
    InvalidInterval(u32),
    InvalidDay(u8),
}

impl fmt::Display for RecurrenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrenceError::NotRepeating => {
                write!(f, "repeat type `none` cannot be stored as a recurrence rule")
            }
            RecurrenceError::InvalidInterval(n) => write!(f, "invalid repeat interval: {n}"),
            RecurrenceError::InvalidDay(d) => write!(f, "invalid day of week: {d}"),
        }
    }
}

impl std::error::Error for RecurrenceError {}

fn encode_days(days: &[u8]) -> Result<String, RecurrenceError> {
    let names = days
        .iter()
        .map(|&d| {
            DAY_NAMES
                .get(d as usize)
                .copied()
                .ok_or(RecurrenceError::InvalidDay(d))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.join(","))
}

/// Unknown tokens are skipped.
fn decode_days(by_day: &str) -> Vec<u8> {
    by_day
        .split(',')
        .filter_map(|token| {
            let token = token.trim();
            DAY_NAMES
                .iter()
                .position(|name| name.eq_ignore_ascii_case(token))
                .map(|i| i as u8)
        })
        .collect()
}

fn rule(frequency: Frequency, interval: u32, days: Option<&[u8]>) -> Result<RecurrenceRule, RecurrenceError> {
    Ok(RecurrenceRule {
        id: None,
        frequency,
        interval,
        by_day: days.map(encode_days).transpose()?,
        is_active: true,
        until: None,
        count: None,
    })
}

pub fn to_rule(config: &RepeatConfig) -> Result<RecurrenceRule, RecurrenceError> {
    let mut out = match config.kind {
        RepeatType::None => return Err(RecurrenceError::NotRepeating),
        RepeatType::Daily => rule(Frequency::Daily, 1, None)?,
        RepeatType::Weekdays => rule(Frequency::Weekly, 1, Some(&WEEKDAYS))?,
        RepeatType::Weekly => rule(Frequency::Weekly, 1, Some(&WEEKLY_DEFAULT_DAY))?,
        RepeatType::Monthly => rule(Frequency::Monthly, 1, None)?,
        RepeatType::Custom => {
            let interval = config.interval.unwrap_or(1);
            if interval == 0 {
                return Err(RecurrenceError::InvalidInterval(interval));
            }
            match config.days_of_week.as_deref().filter(|d| !d.is_empty()) {
                Some(days) => rule(Frequency::Weekly, interval, Some(days))?,
                None => rule(Frequency::Daily, interval, None)?,
            }
        }
    };
    out.until = config.end_date;
    out.count = config.occurrences;
    Ok(out)
}

type PresetMatcher = fn(&RecurrenceRule, &[u8]) -> bool;

/// Checked in order; the first match wins. New presets go before the
/// `custom` fallback in `to_config`.
const PRESETS: [(RepeatType, PresetMatcher); 4] = [
    (RepeatType::Weekdays, |r, days| {
        r.frequency == Frequency::Weekly && r.interval == 1 && days == WEEKDAYS
    }),
    (RepeatType::Weekly, |r, days| {
        r.frequency == Frequency::Weekly && r.interval == 1 && days == WEEKLY_DEFAULT_DAY
    }),
    (RepeatType::Daily, |r, days| {
        r.frequency == Frequency::Daily && r.interval == 1 && days.is_empty()
    }),
    (RepeatType::Monthly, |r, _| {
        r.frequency == Frequency::Monthly && r.interval == 1
    }),
];

pub fn to_config(rule: &RecurrenceRule) -> RepeatConfig {
    let days = rule.by_day.as_deref().map(decode_days).unwrap_or_default();

    let mut config = match PRESETS.iter().find(|(_, matches)| matches(rule, &days)) {
        Some((kind, _)) => RepeatConfig::preset(*kind),
        None => RepeatConfig::custom(rule.interval, (!days.is_empty()).then_some(days)),
    };
    config.end_date = rule.until;
    config.occurrences = rule.count;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(config: &RepeatConfig) -> RepeatConfig {
        to_config(&to_rule(config).expect("config should convert"))
    }

    #[test]
    fn test_presets_round_trip() {
        for kind in [
            RepeatType::Daily,
            RepeatType::Weekdays,
            RepeatType::Weekly,
            RepeatType::Monthly,
        ] {
            let config = RepeatConfig::preset(kind);
            assert_eq!(round_trip(&config), config, "{kind:?}");
        }
    }

    #[test]
    fn test_custom_round_trip_keeps_interval_and_days() {
        let config = RepeatConfig::custom(3, Some(vec![2, 4]));
        let back = round_trip(&config);
        assert_eq!(back.kind, RepeatType::Custom);
        assert_eq!(back.interval, Some(3));
        assert_eq!(back.days_of_week, Some(vec![2, 4]));
    }

    #[test]
    fn test_none_is_not_a_rule() {
        assert_eq!(
            to_rule(&RepeatConfig::default()),
            Err(RecurrenceError::NotRepeating)
        );
    }

    #[test]
    fn test_preset_rule_shapes() {
        let weekdays = to_rule(&RepeatConfig::preset(RepeatType::Weekdays)).unwrap();
        assert_eq!(weekdays.frequency, Frequency::Weekly);
        assert_eq!(weekdays.by_day.as_deref(), Some("MON,TUE,WED,THU,FRI"));

        let weekly = to_rule(&RepeatConfig::preset(RepeatType::Weekly)).unwrap();
        assert_eq!(weekly.by_day.as_deref(), Some("MON"));

        let monthly = to_rule(&RepeatConfig::preset(RepeatType::Monthly)).unwrap();
        assert_eq!(monthly.frequency, Frequency::Monthly);
        assert_eq!(monthly.interval, 1);
        assert!(monthly.by_day.is_none());
    }

    #[test]
    fn test_custom_frequency_is_inferred_from_days() {
        let every_other_day = to_rule(&RepeatConfig::custom(2, None)).unwrap();
        assert_eq!(every_other_day.frequency, Frequency::Daily);

        let empty_days = to_rule(&RepeatConfig::custom(2, Some(vec![]))).unwrap();
        assert_eq!(empty_days.frequency, Frequency::Daily);
        assert!(empty_days.by_day.is_none());

        let weekends = to_rule(&RepeatConfig::custom(1, Some(vec![0, 6]))).unwrap();
        assert_eq!(weekends.frequency, Frequency::Weekly);
        assert_eq!(weekends.by_day.as_deref(), Some("SUN,SAT"));
    }

    #[test]
    fn test_custom_rejects_bad_input() {
        assert_eq!(
            to_rule(&RepeatConfig::custom(0, None)),
            Err(RecurrenceError::InvalidInterval(0))
        );
        assert_eq!(
            to_rule(&RepeatConfig::custom(1, Some(vec![7]))),
            Err(RecurrenceError::InvalidDay(7))
        );
    }

    #[test]
    fn test_non_canonical_rules_fall_back_to_custom() {
        let monthly_every_two = RecurrenceRule {
            id: Some(5),
            frequency: Frequency::Monthly,
            interval: 2,
            by_day: None,
            is_active: true,
            until: None,
            count: None,
        };
        let config = to_config(&monthly_every_two);
        assert_eq!(config.kind, RepeatType::Custom);
        assert_eq!(config.interval, Some(2));
        assert_eq!(config.days_of_week, None);

        // Mon-Fri every other week is not the weekdays preset.
        let mut biweekly = to_rule(&RepeatConfig::preset(RepeatType::Weekdays)).unwrap();
        biweekly.interval = 2;
        assert_eq!(to_config(&biweekly).kind, RepeatType::Custom);
    }

    #[test]
    fn test_decode_skips_unknown_tokens() {
        assert_eq!(decode_days("mon, XYZ ,FRI"), vec![1, 5]);
        assert!(decode_days("").is_empty());
    }

    #[test]
    fn test_end_conditions_carry_through() {
        let mut config = RepeatConfig::preset(RepeatType::Daily);
        config.occurrences = Some(10);
        let rule = to_rule(&config).unwrap();
        assert_eq!(rule.count, Some(10));
        assert_eq!(to_config(&rule), config);
    }

    #[test]
    fn test_repeat_config_json_shape() {
        let parsed: RepeatConfig =
            serde_json::from_str(r#"{"type":"custom","interval":3,"daysOfWeek":[2,4]}"#)
                .expect("ui json should parse");
        assert_eq!(parsed, RepeatConfig::custom(3, Some(vec![2, 4])));

        let json = serde_json::to_value(RepeatConfig::preset(RepeatType::Weekdays)).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "weekdays" }));
    }

    #[test]
    fn test_rule_row_deserialize_defaults_active() {
        let rule: RecurrenceRule =
            serde_json::from_str(r#"{"id": 9, "frequency": "WEEKLY", "interval": 1, "by_day": "MON"}"#)
                .expect("rule row should parse");
        assert!(rule.is_active);
        assert_eq!(to_config(&rule).kind, RepeatType::Weekly);
    }
}
