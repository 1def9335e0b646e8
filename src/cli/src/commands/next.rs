//! Preview the upcoming occurrences of a cron expression.

use anyhow::{Context, Result};
use cadence_core::jobs::RecurrenceRule;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct NextArgs {
    /// Cron expression (5 fields, or 6 with --seconds)
    expression: String,

    /// Expression carries a leading seconds field
    #[arg(short, long)]
    seconds: bool,

    /// Number of occurrences to print
    #[arg(short = 'n', long, default_value = "5")]
    count: usize,

    /// Reference instant (RFC 3339), defaults to now
    #[arg(long)]
    after: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct OccurrenceRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Due (UTC)")]
    due: DateTime<Utc>,
    #[tabled(rename = "In")]
    #[serde(rename = "in")]
    in_: String,
}

pub fn execute(args: NextArgs, format: OutputFormat) -> Result<()> {
    let after = match &args.after {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid --after instant: {}", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let rule = RecurrenceRule::parse(&args.expression, args.seconds)?;
    let rows = occurrence_rows(&rule, after, args.count)?;

    if rows.is_empty() && format == OutputFormat::Table {
        output::print_info(&format!("'{}' has no occurrences after {}", rule, after));
        return Ok(());
    }
    output::print_list(&rows, format)
}

fn occurrence_rows(rule: &RecurrenceRule, after: DateTime<Utc>, count: usize) -> Result<Vec<OccurrenceRow>> {
    let rows = rule
        .upcoming(after, count)?
        .into_iter()
        .enumerate()
        .map(|(i, due)| OccurrenceRow {
            index: i + 1,
            due,
            in_: format_offset(due - after),
        })
        .collect();
    Ok(rows)
}

fn format_offset(delta: chrono::Duration) -> String {
    let secs = delta.num_seconds();
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rows_are_numbered_from_one() {
        let rule = RecurrenceRule::parse("0 * * * *", false).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        let rows = occurrence_rows(&rule, after, 3).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].due, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
        assert_eq!(rows[0].in_, "30m 0s");
        assert_eq!(rows[2].in_, "2h 30m");
    }

    #[test]
    fn test_offset_formatting() {
        assert_eq!(format_offset(chrono::Duration::seconds(9)), "9s");
        assert_eq!(format_offset(chrono::Duration::seconds(90)), "1m 30s");
        assert_eq!(format_offset(chrono::Duration::hours(50)), "2d 2h");
    }
}
