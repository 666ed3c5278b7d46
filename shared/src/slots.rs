use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw slot as submitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotInput {
    pub start_time: String,
    pub end_time: String,
}

/// A parsed slot with its duration in whole minutes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("at least one slot is required")]
    Empty,
    #[error("invalid slot date: {0}")]
    InvalidTimestamp(String),
    #[error("slot end must be after start")]
    EndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SlotError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SlotError::InvalidTimestamp(raw.to_string()))
}

/// Parses and validates the slots of a booking request. Requires at least one
/// slot; each slot must parse and satisfy `start < end`. Duration is the
/// interval length rounded to whole minutes.
pub fn validate_slots(inputs: &[SlotInput]) -> Result<Vec<ValidatedSlot>, SlotError> {
    if inputs.is_empty() {
        return Err(SlotError::Empty);
    }

    let mut validated = Vec::with_capacity(inputs.len());
    for input in inputs {
        let start = parse_timestamp(&input.start_time)?;
        let end = parse_timestamp(&input.end_time)?;
        if start >= end {
            return Err(SlotError::EndBeforeStart { start, end });
        }
        let duration_minutes =
            ((end - start).num_milliseconds() as f64 / 60_000.0).round() as i32;
        validated.push(ValidatedSlot {
            start,
            end,
            duration_minutes,
        });
    }
    Ok(validated)
}

/// Half-open interval overlap: `[s1, e1)` and `[s2, e2)` conflict iff
/// `s1 < e2 && e1 > s2`. An interval ending exactly when another starts is
/// legal.
pub fn overlaps(
    s1: DateTime<Utc>,
    e1: DateTime<Utc>,
    s2: DateTime<Utc>,
    e2: DateTime<Utc>,
) -> bool {
    s1 < e2 && e1 > s2
}

/// Checks a multi-slot request against itself. A request whose own slots
/// overlap must be rejected before any row is written. Returns the first
/// conflicting pair's earlier-listed interval.
pub fn find_self_conflict(slots: &[ValidatedSlot]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    for (i, a) in slots.iter().enumerate() {
        for b in slots.iter().skip(i + 1) {
            if overlaps(a.start, a.end, b.start, b.end) {
                return Some((a.start, a.end));
            }
        }
    }
    None
}

/// Total charge: `Σ hourly_rate × duration_minutes / 60`, full precision.
/// Rounding happens only at the gateway boundary.
pub fn total_amount(hourly_rate: &BigDecimal, slots: &[ValidatedSlot]) -> BigDecimal {
    let sixty = BigDecimal::from(60);
    slots
        .iter()
        .map(|s| hourly_rate.clone() * BigDecimal::from(s.duration_minutes) / &sixty)
        .sum()
}

pub fn total_duration_minutes(slots: &[ValidatedSlot]) -> i32 {
    slots.iter().map(|s| s.duration_minutes).sum()
}

/// Aggregate window of a booking: earliest slot start to latest slot end,
/// regardless of the order slots were submitted in.
pub fn booking_window(slots: &[ValidatedSlot]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = slots.iter().map(|s| s.start).min()?;
    let end = slots.iter().map(|s| s.end).max()?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn slot(start: &str, end: &str) -> SlotInput {
        SlotInput {
            start_time: start.to_string(),
            end_time: end.to_string(),
        }
    }

    #[test]
    fn rejects_empty_request() {
        assert_eq!(validate_slots(&[]), Err(SlotError::Empty));
    }

    #[test]
    fn rejects_unparsable_timestamps() {
        let err = validate_slots(&[slot("not-a-date", "2026-03-01T11:00:00Z")]).unwrap_err();
        assert!(matches!(err, SlotError::InvalidTimestamp(_)));
    }

    #[test]
    fn rejects_end_before_start() {
        let err =
            validate_slots(&[slot("2026-03-01T11:00:00Z", "2026-03-01T10:00:00Z")]).unwrap_err();
        assert!(matches!(err, SlotError::EndBeforeStart { .. }));
    }

    #[test]
    fn rejects_zero_length_slot() {
        let err =
            validate_slots(&[slot("2026-03-01T10:00:00Z", "2026-03-01T10:00:00Z")]).unwrap_err();
        assert!(matches!(err, SlotError::EndBeforeStart { .. }));
    }

    #[test]
    fn computes_duration_in_minutes() {
        let slots =
            validate_slots(&[slot("2026-03-01T10:00:00Z", "2026-03-01T11:30:00Z")]).unwrap();
        assert_eq!(slots[0].duration_minutes, 90);
    }

    #[test]
    fn overlap_predicate_flags_strict_overlap() {
        // Existing 10:00-11:00, proposed 10:30-11:30.
        assert!(overlaps(
            ts("2026-03-01T10:30:00Z"),
            ts("2026-03-01T11:30:00Z"),
            ts("2026-03-01T10:00:00Z"),
            ts("2026-03-01T11:00:00Z"),
        ));
        // Containment.
        assert!(overlaps(
            ts("2026-03-01T09:00:00Z"),
            ts("2026-03-01T12:00:00Z"),
            ts("2026-03-01T10:00:00Z"),
            ts("2026-03-01T11:00:00Z"),
        ));
    }

    #[test]
    fn touching_endpoints_do_not_conflict() {
        // Existing 10:00-11:00, proposed 11:00-12:00.
        assert!(!overlaps(
            ts("2026-03-01T11:00:00Z"),
            ts("2026-03-01T12:00:00Z"),
            ts("2026-03-01T10:00:00Z"),
            ts("2026-03-01T11:00:00Z"),
        ));
        assert!(!overlaps(
            ts("2026-03-01T09:00:00Z"),
            ts("2026-03-01T10:00:00Z"),
            ts("2026-03-01T10:00:00Z"),
            ts("2026-03-01T11:00:00Z"),
        ));
    }

    #[test]
    fn self_conflict_detected_within_one_request() {
        let slots = validate_slots(&[
            slot("2026-03-01T10:00:00Z", "2026-03-01T12:00:00Z"),
            slot("2026-03-01T11:00:00Z", "2026-03-01T13:00:00Z"),
        ])
        .unwrap();
        let conflict = find_self_conflict(&slots).unwrap();
        assert_eq!(conflict.0, ts("2026-03-01T10:00:00Z"));
    }

    #[test]
    fn back_to_back_slots_are_legal() {
        let slots = validate_slots(&[
            slot("2026-03-01T10:00:00Z", "2026-03-01T11:00:00Z"),
            slot("2026-03-01T11:00:00Z", "2026-03-01T12:00:00Z"),
        ])
        .unwrap();
        assert!(find_self_conflict(&slots).is_none());
    }

    #[test]
    fn prices_ninety_minutes_at_rate_1000_to_1500() {
        let slots =
            validate_slots(&[slot("2026-03-01T10:00:00Z", "2026-03-01T11:30:00Z")]).unwrap();
        let total = total_amount(&BigDecimal::from(1000), &slots);
        assert_eq!(total, BigDecimal::from(1500));
    }

    #[test]
    fn prices_multiple_slots_with_fractional_rate() {
        let slots = validate_slots(&[
            slot("2026-03-01T10:00:00Z", "2026-03-01T11:00:00Z"),
            slot("2026-03-01T14:00:00Z", "2026-03-01T14:30:00Z"),
        ])
        .unwrap();
        let rate = BigDecimal::from_str("750.50").unwrap();
        // 750.50 + 375.25
        assert_eq!(total_amount(&rate, &slots), BigDecimal::from_str("1125.75").unwrap());
        assert_eq!(total_duration_minutes(&slots), 90);
    }

    #[test]
    fn booking_window_ignores_submission_order() {
        let slots = validate_slots(&[
            slot("2026-03-01T14:00:00Z", "2026-03-01T15:00:00Z"),
            slot("2026-03-01T10:00:00Z", "2026-03-01T11:00:00Z"),
        ])
        .unwrap();
        let (start, end) = booking_window(&slots).unwrap();
        assert_eq!(start, ts("2026-03-01T10:00:00Z"));
        assert_eq!(end, ts("2026-03-01T15:00:00Z"));
    }
}
