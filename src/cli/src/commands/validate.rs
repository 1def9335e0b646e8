//! Validate a config file and show how its jobs would be scheduled.

use anyhow::Result;
use cadence_core::jobs::{EntryStatus, JobSummary};
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct EntryRow {
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "Handler")]
    handler: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Schedule")]
    schedule: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Next Due")]
    next_due: String,
}

pub fn execute(config: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let path = super::resolve_config_path(config)?;
    let engine = super::build_engine(super::load_config(&path)?)?;
    let jobs = engine.runtime_registry().jobs();

    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Jobs in {}", path.display()));
            output::print_list(&entry_rows(&jobs), format)?;
        }
        _ => output::print_item(&jobs, format)?,
    }

    let disabled = super::disabled_entries(&jobs);
    if !disabled.is_empty() {
        for entry in &disabled {
            output::print_warning(entry);
        }
        anyhow::bail!(
            "{} schedule entr{} could not be used",
            disabled.len(),
            if disabled.len() == 1 { "y" } else { "ies" }
        );
    }
    if format == OutputFormat::Table {
        output::print_success(&format!("{} job(s) valid", jobs.len()));
    }
    Ok(())
}

fn entry_rows(jobs: &[JobSummary]) -> Vec<EntryRow> {
    let mut rows = Vec::new();
    for job in jobs {
        let startup = if job.startup.is_some() { " (startup)" } else { "" };
        if job.entries.is_empty() {
            rows.push(EntryRow {
                job: format!("{}{}", job.key, startup),
                handler: job.handler.clone(),
                priority: job.priority.to_string(),
                schedule: "-".into(),
                status: "-".into(),
                next_due: "-".into(),
            });
            continue;
        }
        for entry in &job.entries {
            let schedule = if entry.second_precision {
                format!("{} (seconds)", entry.expression)
            } else {
                entry.expression.clone()
            };
            rows.push(EntryRow {
                job: format!("{}{}", job.key, startup),
                handler: job.handler.clone(),
                priority: job.priority.to_string(),
                schedule,
                status: status_label(&entry.status),
                next_due: entry
                    .next_due
                    .map(|due| due.to_rfc3339())
                    .unwrap_or_else(|| "-".into()),
            });
        }
    }
    rows
}

fn status_label(status: &EntryStatus) -> String {
    match status {
        EntryStatus::Active => "active".into(),
        EntryStatus::Retired => "retired".into(),
        EntryStatus::Disabled { reason } => format!("disabled: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn jobs_from(contents: &str) -> Vec<JobSummary> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let config = super::super::load_config(file.path()).unwrap();
        super::super::build_engine(config).unwrap().runtime_registry().jobs()
    }

    #[test]
    fn test_rows_per_entry() {
        let jobs = jobs_from(
            r#"
[[jobs]]
name = "report"
handler = "shell"

[[jobs.schedules]]
cron = "0 6 * * *"
parameter = "echo morning"

[[jobs.schedules]]
cron = "0 18 * * *"
parameter = "echo evening"
"#,
        );

        let rows = entry_rows(&jobs);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].job, "report");
        assert_eq!(rows[0].status, "active");
        assert_ne!(rows[0].next_due, "-");
        assert!(super::super::disabled_entries(&jobs).is_empty());
    }

    #[test]
    fn test_invalid_entry_is_disabled() {
        let jobs = jobs_from(
            r#"
[[jobs]]
name = "broken"
handler = "log"

[[jobs.schedules]]
cron = "every tuesday"
"#,
        );

        let rows = entry_rows(&jobs);
        assert!(rows[0].status.starts_with("disabled"));
        assert_eq!(rows[0].next_due, "-");
        assert_eq!(super::super::disabled_entries(&jobs).len(), 1);
    }
}
