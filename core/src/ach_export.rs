//! ACH-style export of a run's discrepancies.
//!
//! One line per non-`ok` item:
//!   employee_ext_id,issue_type,actual_pct->expected_pct,amount
//! Null values render as empty fields.

use crate::{
    error::{ReconError, ReconResult},
    store::{AchTransferRow, ReconStore, ReconciliationItem},
    types::RunId,
};
use log::info;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Lines shown by a dry run.
pub const PREVIEW_LINES: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct AchApproval {
    pub run_id: RunId,
    pub dry_run: bool,
    /// Sum of discrepancy amounts, rounded to cents.
    pub total: f64,
    pub line_count: usize,
    pub preview_lines: Vec<String>,
    pub transfer_id: Option<i64>,
    pub file_ref: Option<String>,
}

fn field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn render_line(item: &ReconciliationItem) -> String {
    format!(
        "{},{},{}->{},{}",
        item.employee_ext_id,
        item.issue_kind,
        field(item.actual_pct),
        field(item.expected_pct),
        field(item.amount)
    )
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Preview (`dry_run`) or submit the export for a run.
///
/// A real approval writes `<out_dir>/<run_id>.txt` and records a submitted
/// transfer; both happen or neither does.
pub fn approve_run(
    store: &ReconStore,
    tenant_id: &str,
    run_id: RunId,
    dry_run: bool,
    out_dir: &Path,
) -> ReconResult<AchApproval> {
    store
        .get_run(tenant_id, run_id)?
        .ok_or_else(|| ReconError::not_found("reconciliation run", run_id))?;

    let items = store.items_for_run(run_id)?;
    let discrepancies: Vec<&ReconciliationItem> =
        items.iter().filter(|i| i.issue_kind.is_discrepancy()).collect();
    let lines: Vec<String> = discrepancies.iter().map(|i| render_line(i)).collect();
    let total = round_cents(discrepancies.iter().filter_map(|i| i.amount).sum());

    if dry_run {
        return Ok(AchApproval {
            run_id,
            dry_run,
            total,
            line_count: lines.len(),
            preview_lines: lines.into_iter().take(PREVIEW_LINES).collect(),
            transfer_id: None,
            file_ref: None,
        });
    }

    if items.is_empty() {
        return Err(ReconError::not_found("reconciliation items for run", run_id));
    }

    let path = out_dir.join(format!("{run_id}.txt"));
    let file_ref = path.to_string_lossy().into_owned();
    let transfer_id = store.in_transaction(|store| {
        let id = store.insert_ach_transfer(&AchTransferRow {
            id: None,
            tenant_id: tenant_id.to_string(),
            run_id,
            amount: total,
            file_ref: file_ref.clone(),
            status: "submitted".into(),
        })?;
        fs::create_dir_all(out_dir)?;
        let mut body = format!("# ACH export\n# tenant={tenant_id} run_id={run_id} total={total:.2}\n");
        for line in &lines {
            body.push_str(line);
            body.push('\n');
        }
        fs::write(&path, body)?;
        Ok(id)
    })?;

    info!(
        "tenant {tenant_id}: run {run_id} approved, {} lines, total {total:.2}, file {file_ref}",
        lines.len()
    );
    Ok(AchApproval {
        run_id,
        dry_run,
        total,
        line_count: lines.len(),
        preview_lines: lines.into_iter().take(PREVIEW_LINES).collect(),
        transfer_id: Some(transfer_id),
        file_ref: Some(file_ref),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IssueKind;

    #[test]
    fn nulls_render_as_empty_fields() {
        let item = ReconciliationItem {
            id: None,
            run_id: 1,
            employee_ext_id: "E001".into(),
            issue_kind: IssueKind::MissingCoverage,
            expected_pct: None,
            actual_pct: Some(2.5),
            amount: Some(-12.75),
            details: None,
        };
        assert_eq!(render_line(&item), "E001,missing_coverage,2.5->,-12.75");
    }

    #[test]
    fn totals_round_to_cents() {
        assert_eq!(round_cents(10.005 + 0.001), 10.01);
        assert_eq!(round_cents(-3.333), -3.33);
    }
}
