use std::path::Path;

use prettytable::{Cell, Row, Table};

use crate::chain::RestorePlan;

pub fn log_job_header(job: &str, device: &str, mountpoint: &Path, source: &str) {
    tracing::info!("Job: {job}");
    tracing::info!("Destination: {device} at {}", mountpoint.display());
    tracing::info!("Source: {source}");
}

/// Rows: volume, mode, base, target artifact.
pub fn log_backup_plan(rows: Vec<Vec<String>>) {
    if rows.is_empty() {
        tracing::info!("<nothing to back up>");
        return;
    }
    let mut table = Table::new();
    table.set_titles(Row::new(vec![
        Cell::new("Volume"),
        Cell::new("Mode"),
        Cell::new("Base"),
        Cell::new("Artifact"),
    ]));
    for r in rows {
        table.add_row(Row::new(r.iter().map(|c| Cell::new(c)).collect()));
    }
    table.printstd();
}

/// Rows: volume, outcome, artifact.
pub fn log_backup_summary(rows: Vec<Vec<String>>) {
    if rows.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_titles(Row::new(vec![
        Cell::new("Volume"),
        Cell::new("Outcome"),
        Cell::new("Artifact"),
    ]));
    for r in rows {
        table.add_row(Row::new(r.iter().map(|c| Cell::new(c)).collect()));
    }
    table.printstd();
}

pub fn log_restore_plan(plan: &RestorePlan) {
    if plan.is_empty() {
        tracing::info!("<empty chain>");
        return;
    }
    let mut table = Table::new();
    table.set_titles(Row::new(vec![
        Cell::new("Order"),
        Cell::new("Mode"),
        Cell::new("Artifact"),
    ]));
    for (i, step) in plan.steps.iter().enumerate() {
        let mode = step
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| {
                if crate::naming::is_incremental_artifact(n) {
                    "delta"
                } else {
                    "full"
                }
            })
            .unwrap_or("?");
        table.add_row(Row::new(vec![
            Cell::new(&(i + 1).to_string()),
            Cell::new(mode),
            Cell::new(&step.display().to_string()),
        ]));
    }
    table.printstd();
}
