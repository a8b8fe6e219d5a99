//! Task snapshot model and due-date arithmetic.

use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One task record inside the pushed snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
  pub id: i64,
  pub text: String,
  #[serde(rename = "dueDate")]
  pub due_date: Option<String>,
  pub completed: bool,
}

/// The full pushed snapshot: grouping key to ordered task list.
///
/// Written wholesale by the control channel, read wholesale by the
/// deferred-work passes. The engine never mutates it, only replaces it.
pub type TaskGroups = BTreeMap<String, Vec<Task>>;

/// Decode a snapshot body.
pub fn decode_groups(body: &[u8]) -> Result<TaskGroups> {
  serde_json::from_slice(body).map_err(|e| eyre!("Failed to parse task snapshot: {}", e))
}

/// Encode a snapshot body.
pub fn encode_groups(groups: &TaskGroups) -> Result<Vec<u8>> {
  serde_json::to_vec(groups).map_err(|e| eyre!("Failed to serialize task snapshot: {}", e))
}

/// Whole-day difference between a due date and now.
///
/// Computed on civil dates, so any partial day left counts as a full day
/// remaining: a task due later today is 0, due tomorrow is 1, a day late
/// is -1. Accepts a bare date (`2024-01-10`) or a datetime with the time
/// part ignored.
pub fn days_until(due_date: &str, now: DateTime<Utc>) -> Result<i64> {
  let due = parse_due_date(due_date)?;
  Ok((due - now.date_naive()).num_days())
}

fn parse_due_date(raw: &str) -> Result<NaiveDate> {
  if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
    return Ok(date);
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Ok(dt.date_naive());
  }
  if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M") {
    return Ok(dt.date());
  }
  Err(eyre!("Unrecognized due date '{}'", raw))
}

/// Urgency of a task, derived from its whole-day difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueStatus {
  Overdue,
  DueToday,
}

impl DueStatus {
  /// Classify a day difference; positive differences need no reminder.
  pub fn classify(days: i64) -> Option<Self> {
    match days {
      d if d < 0 => Some(DueStatus::Overdue),
      0 => Some(DueStatus::DueToday),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
  }

  #[test]
  fn test_due_later_today_is_zero() {
    let now = at(2024, 1, 10, 0, 0);
    assert_eq!(days_until("2024-01-10T23:59", now).unwrap(), 0);
    assert_eq!(DueStatus::classify(0), Some(DueStatus::DueToday));
  }

  #[test]
  fn test_yesterday_is_overdue() {
    let now = at(2024, 1, 10, 0, 0);
    let days = days_until("2024-01-09", now).unwrap();
    assert_eq!(days, -1);
    assert_eq!(DueStatus::classify(days), Some(DueStatus::Overdue));
  }

  #[test]
  fn test_two_days_out_needs_no_reminder() {
    let now = at(2024, 1, 10, 0, 0);
    let days = days_until("2024-01-12", now).unwrap();
    assert_eq!(days, 2);
    assert_eq!(DueStatus::classify(days), None);
  }

  #[test]
  fn test_partial_day_counts_as_full_day_remaining() {
    // One hour left until tomorrow still counts as one whole day.
    let now = at(2024, 1, 10, 23, 0);
    assert_eq!(days_until("2024-01-11", now).unwrap(), 1);
  }

  #[test]
  fn test_rfc3339_due_date() {
    let now = at(2024, 1, 10, 12, 0);
    assert_eq!(days_until("2024-01-10T08:00:00Z", now).unwrap(), 0);
  }

  #[test]
  fn test_bad_due_date_is_an_error() {
    let now = at(2024, 1, 10, 0, 0);
    assert!(days_until("soon", now).is_err());
  }

  #[test]
  fn test_groups_round_trip_preserves_order_within_group() {
    let mut groups = TaskGroups::new();
    groups.insert(
      "work".to_string(),
      vec![
        Task {
          id: 2,
          text: "second".to_string(),
          due_date: None,
          completed: false,
        },
        Task {
          id: 1,
          text: "first".to_string(),
          due_date: Some("2024-01-01".to_string()),
          completed: true,
        },
      ],
    );

    let decoded = decode_groups(&encode_groups(&groups).unwrap()).unwrap();
    assert_eq!(decoded, groups);
  }

  #[test]
  fn test_due_date_wire_name() {
    let json = r#"{"id":1,"text":"x","dueDate":"2024-01-01","completed":false}"#;
    let task: Task = serde_json::from_str(json).unwrap();
    assert_eq!(task.due_date.as_deref(), Some("2024-01-01"));
  }
}
