//! Cron recurrence rules.
//!
//! Expressions come in two forms:
//!
//! - 5 fields (`min hour day month weekday`): minute precision, occurrences
//!   fall on second zero
//! - 6 fields (`sec min hour day month weekday`): second precision, enabled
//!   explicitly per schedule entry
//!
//! `@hourly`-style macros are accepted in minute mode. All evaluation is in UTC.

use chrono::{DateTime, Utc};
use ::cron::Schedule;
use std::fmt;
use std::str::FromStr;

use crate::error::{CadenceError, Result};

/// A parsed cron expression.
#[derive(Clone)]
pub struct RecurrenceRule {
    expression: String,
    second_precision: bool,
    schedule: Schedule,
}

impl RecurrenceRule {
    /// Parse `expression`, checking its field count against `second_precision`.
    pub fn parse(expression: &str, second_precision: bool) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let normalized = match (second_precision, fields.len()) {
            (false, 1) if fields[0].starts_with('@') => fields[0].to_string(),
            (false, 5) => format!("0 {}", fields.join(" ")),
            (true, 6) => fields.join(" "),
            (_, 0) => return Err(CadenceError::invalid_cron(expression, "expression is empty")),
            (precision, count) => {
                return Err(CadenceError::precision_mismatch(expression, precision, count))
            }
        };

        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| CadenceError::invalid_cron(expression, e.to_string()))?;

        Ok(Self {
            expression: expression.trim().to_string(),
            second_precision,
            schedule,
        })
    }

    /// The expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn has_second_precision(&self) -> bool {
        self.second_precision
    }

    /// First occurrence strictly after `after`, or `None` if the rule has no
    /// further occurrences.
    ///
    /// # Errors
    ///
    /// `RuleCannotAdvance` if the underlying schedule yields an instant that is
    /// not strictly later than `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self.schedule.after(&after).next() {
            Some(next) if next > after => Ok(Some(next)),
            Some(_) => Err(CadenceError::rule_cannot_advance(&self.expression, after)),
            None => Ok(None),
        }
    }

    /// Up to `count` occurrences strictly after `after`, in order.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Result<Vec<DateTime<Utc>>> {
        let mut occurrences = Vec::with_capacity(count);
        let mut cursor = after;
        while occurrences.len() < count {
            match self.next_after(cursor)? {
                Some(next) => {
                    occurrences.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        Ok(occurrences)
    }
}

impl fmt::Debug for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurrenceRule")
            .field("expression", &self.expression)
            .field("second_precision", &self.second_precision)
            .finish()
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::{TimeZone, Timelike};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_every_minute() {
        let rule = RecurrenceRule::parse("* * * * *", false).unwrap();
        assert_eq!(rule.next_after(at(0, 0, 0)).unwrap(), Some(at(0, 1, 0)));
        assert_eq!(rule.next_after(at(0, 0, 30)).unwrap(), Some(at(0, 1, 0)));
        assert!(!rule.has_second_precision());
    }

    #[test]
    fn test_top_of_hour() {
        let rule = RecurrenceRule::parse("0 * * * *", false).unwrap();
        assert_eq!(rule.next_after(at(0, 0, 0)).unwrap(), Some(at(1, 0, 0)));
        assert_eq!(rule.next_after(at(0, 59, 59)).unwrap(), Some(at(1, 0, 0)));
    }

    #[test]
    fn test_second_precision() {
        let rule = RecurrenceRule::parse("*/5 * * * * *", true).unwrap();
        assert_eq!(rule.next_after(at(0, 0, 0)).unwrap(), Some(at(0, 0, 5)));
        assert_eq!(rule.next_after(at(0, 0, 7)).unwrap(), Some(at(0, 0, 10)));
    }

    #[test]
    fn test_minute_mode_is_aligned() {
        let rule = RecurrenceRule::parse("*/15 * * * *", false).unwrap();
        for next in rule.upcoming(at(3, 7, 41), 8).unwrap() {
            assert_eq!(next.second(), 0);
            assert_eq!(next.nanosecond(), 0);
            assert_eq!(next.minute() % 15, 0);
        }
    }

    #[test]
    fn test_occurrences_strictly_increase() {
        let rule = RecurrenceRule::parse("*/7 * * * * *", true).unwrap();
        let occurrences = rule.upcoming(at(0, 0, 0), 50).unwrap();
        assert_eq!(occurrences.len(), 50);
        assert!(occurrences.windows(2).all(|w| w[0] < w[1]));
        assert!(occurrences[0] > at(0, 0, 0));
    }

    #[test]
    fn test_precision_mismatch() {
        let err = RecurrenceRule::parse("* * * * * *", false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PrecisionMismatch);

        let err = RecurrenceRule::parse("* * * * *", true).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PrecisionMismatch);
    }

    #[test]
    fn test_malformed_expressions() {
        for expression in ["", "   ", "61 * * * *", "* * * * monday-ish"] {
            assert!(
                RecurrenceRule::parse(expression, false).is_err(),
                "{:?} should be rejected",
                expression
            );
        }
    }

    #[test]
    fn test_macro() {
        let rule = RecurrenceRule::parse("@hourly", false).unwrap();
        assert_eq!(rule.next_after(at(5, 30, 0)).unwrap(), Some(at(6, 0, 0)));
    }
}
