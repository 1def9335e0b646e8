//! Output formatting for CLI results.
//!
//! Supports table, JSON, and YAML output modes.

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

/// Print rows as a table, or the whole collection as JSON/YAML.
pub fn print_list<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                print_info("Nothing to show.");
                return Ok(());
            }
            let mut table = Table::new(items);
            table.with(Style::rounded());
            println!("{table}");
        }
        _ => print_item(&items, format)?,
    }
    Ok(())
}

/// Print a single serializable value in a machine-readable format.
pub fn print_item<T: Serialize + ?Sized>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json | OutputFormat::Table => {
            let rendered = serde_json::to_string_pretty(item).context("Failed to serialize to JSON")?;
            println!("{rendered}");
        }
        OutputFormat::Yaml => {
            let rendered = serde_yaml::to_string(item).context("Failed to serialize to YAML")?;
            print!("{rendered}");
        }
    }
    Ok(())
}

pub fn print_detail(label: &str, value: &str) {
    println!("  {:<18} {}", format!("{}:", label).bold(), value);
}

pub fn print_header(title: &str) {
    println!("\n{}", title.bold().underline());
}
