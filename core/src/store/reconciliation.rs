use super::{AchTransferRow, InsightsRow, ItemFilter, Page, ReconStore, ReconciliationItem, ReconciliationRun};
use crate::{
    error::{ReconError, ReconResult},
    types::{BatchId, IssueKind, RunId, RunStatus},
};
use rusqlite::{params, types::Type, OptionalExtension, Row};

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<(ReconciliationRun, Option<String>)> {
    Ok((
        ReconciliationRun {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            batch_id: row.get(2)?,
            created_by: row.get(3)?,
            status: parse_column::<RunStatus>(row, 4)?,
            summary: None,
            created_at: row.get(6)?,
        },
        row.get(5)?,
    ))
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ReconciliationItem> {
    Ok(ReconciliationItem {
        id: Some(row.get(0)?),
        run_id: row.get(1)?,
        employee_ext_id: row.get(2)?,
        issue_kind: parse_column::<IssueKind>(row, 3)?,
        expected_pct: row.get(4)?,
        actual_pct: row.get(5)?,
        amount: row.get(6)?,
        details: row.get(7)?,
    })
}

const RUN_COLUMNS: &str =
    "id, tenant_id, payroll_batch_id, created_by, status, summary, created_at";
const ITEM_COLUMNS: &str =
    "id, run_id, employee_ext_id, issue_type, expected_pct, actual_pct, amount, details";

impl ReconStore {
    // ── Runs ───────────────────────────────────────────────────────

    pub fn insert_run(&self, tenant_id: &str, batch_id: BatchId, actor: &str) -> ReconResult<RunId> {
        self.conn.execute(
            "INSERT INTO reconciliation_run (tenant_id, payroll_batch_id, created_by, status)
             VALUES (?1, ?2, ?3, 'running')",
            params![tenant_id, batch_id, actor],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn complete_run(&self, run_id: RunId, summary: &serde_json::Value) -> ReconResult<()> {
        let updated = self.conn.execute(
            "UPDATE reconciliation_run SET status = 'completed', summary = ?2
             WHERE id = ?1 AND status = 'running'",
            params![run_id, serde_json::to_string(summary)?],
        )?;
        if updated == 0 {
            return Err(ReconError::InvalidRecord(format!(
                "run {run_id} is not running"
            )));
        }
        Ok(())
    }

    pub fn fail_run(&self, run_id: RunId, reason: &str) -> ReconResult<()> {
        let summary = serde_json::json!({ "error": reason });
        self.conn.execute(
            "UPDATE reconciliation_run SET status = 'failed', summary = ?2 WHERE id = ?1",
            params![run_id, summary.to_string()],
        )?;
        Ok(())
    }

    /// Tenant-scoped run lookup.
    pub fn get_run(&self, tenant_id: &str, run_id: RunId) -> ReconResult<Option<ReconciliationRun>> {
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM reconciliation_run WHERE tenant_id = ?1 AND id = ?2"
                ),
                params![tenant_id, run_id],
                run_from_row,
            )
            .optional()?;
        found.map(attach_summary).transpose()
    }

    pub fn runs_for_batch(&self, tenant_id: &str, batch_id: BatchId) -> ReconResult<Vec<ReconciliationRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM reconciliation_run
             WHERE tenant_id = ?1 AND payroll_batch_id = ?2 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![tenant_id, batch_id], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(attach_summary).collect()
    }

    // ── Items ──────────────────────────────────────────────────────

    pub fn insert_item(&self, item: &ReconciliationItem) -> ReconResult<i64> {
        self.conn.execute(
            "INSERT INTO reconciliation_item
             (run_id, employee_ext_id, issue_type, expected_pct, actual_pct, amount, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                item.run_id,
                item.employee_ext_id,
                item.issue_kind.as_str(),
                item.expected_pct,
                item.actual_pct,
                item.amount,
                item.details,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn items_for_run(&self, run_id: RunId) -> ReconResult<Vec<ReconciliationItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM reconciliation_item WHERE run_id = ?1 ORDER BY id ASC"
        ))?;
        let items = stmt
            .query_map(params![run_id], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn list_items(
        &self,
        run_id: RunId,
        filter: &ItemFilter,
        page: Page,
    ) -> ReconResult<Vec<ReconciliationItem>> {
        let (limit, offset) = page.limit_offset();
        let kind = filter.issue_kind.map(|k| k.as_str());
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM reconciliation_item
             WHERE run_id = ?1 AND (?2 IS NULL OR issue_type = ?2)
             ORDER BY id ASC LIMIT ?3 OFFSET ?4"
        ))?;
        let items = stmt
            .query_map(params![run_id, kind, limit, offset], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn item_count(&self, run_id: RunId) -> ReconResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM reconciliation_item WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Issue-kind counts recomputed from the item table, ordered by issue kind text.
    pub fn summary_from_items(&self, run_id: RunId) -> ReconResult<Vec<(IssueKind, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_type, COUNT(*) FROM reconciliation_item
             WHERE run_id = ?1 GROUP BY issue_type ORDER BY issue_type ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((parse_column::<IssueKind>(row, 0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Insights ───────────────────────────────────────────────────

    pub fn get_insights(&self, tenant_id: &str, run_id: RunId) -> ReconResult<Option<InsightsRow>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, run_id, tenant_id, top_causes, total_impact, affected_employees,
                        suggested_fixes, priority_actions, risk_level, risk_assessment, created_at
                 FROM reconciliation_insights WHERE tenant_id = ?1 AND run_id = ?2",
                params![tenant_id, run_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, RunId>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, Option<String>>(9)?,
                        row.get::<_, String>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, run_id, tenant_id, causes, impact, affected, fixes, actions, level, assessment, at)) =
            raw
        else {
            return Ok(None);
        };
        Ok(Some(InsightsRow {
            id: Some(id),
            run_id,
            tenant_id,
            top_causes: serde_json::from_str(&causes)?,
            total_impact: impact,
            affected_employees: affected.max(0) as u64,
            suggested_fixes: serde_json::from_str(&fixes)?,
            priority_actions: serde_json::from_str(&actions)?,
            risk_level: level,
            risk_assessment: assessment,
            created_at: Some(at),
        }))
    }

    pub fn insert_insights(&self, row: &InsightsRow) -> ReconResult<i64> {
        self.conn.execute(
            "INSERT INTO reconciliation_insights
             (run_id, tenant_id, top_causes, total_impact, affected_employees,
              suggested_fixes, priority_actions, risk_level, risk_assessment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.run_id,
                row.tenant_id,
                serde_json::to_string(&row.top_causes)?,
                row.total_impact,
                row.affected_employees as i64,
                serde_json::to_string(&row.suggested_fixes)?,
                serde_json::to_string(&row.priority_actions)?,
                row.risk_level,
                row.risk_assessment,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // ── ACH transfers ──────────────────────────────────────────────

    pub fn insert_ach_transfer(&self, t: &AchTransferRow) -> ReconResult<i64> {
        self.conn.execute(
            "INSERT INTO ach_transfer (tenant_id, run_id, amount, file_ref, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![t.tenant_id, t.run_id, t.amount, t.file_ref, t.status],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn ach_transfers_for_run(&self, tenant_id: &str, run_id: RunId) -> ReconResult<Vec<AchTransferRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, tenant_id, run_id, amount, file_ref, status
             FROM ach_transfer WHERE tenant_id = ?1 AND run_id = ?2 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![tenant_id, run_id], |row| {
                Ok(AchTransferRow {
                    id: Some(row.get(0)?),
                    tenant_id: row.get(1)?,
                    run_id: row.get(2)?,
                    amount: row.get(3)?,
                    file_ref: row.get(4)?,
                    status: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn attach_summary(
    (mut run, summary): (ReconciliationRun, Option<String>),
) -> ReconResult<ReconciliationRun> {
    run.summary = summary.map(|s| serde_json::from_str(&s)).transpose()?;
    Ok(run)
}
