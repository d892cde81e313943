use super::{DeductionLine, EmployeeRow, EnrollmentRecord, PayrollBatchRow, PlanRow, ReconStore};
use crate::{
    error::ReconResult,
    types::{BatchId, CoverageCategory, EmployeeId},
};
use chrono::NaiveDate;
use log::warn;
use rusqlite::{params, OptionalExtension};

impl ReconStore {
    // ── Tenant ─────────────────────────────────────────────────────

    pub fn insert_tenant(&self, tenant_id: &str, name: &str) -> ReconResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tenant (id, name) VALUES (?1, ?2)",
            params![tenant_id, name],
        )?;
        Ok(())
    }

    // ── Employees and plans ────────────────────────────────────────

    pub fn insert_employee(&self, e: &EmployeeRow) -> ReconResult<EmployeeId> {
        self.conn.execute(
            "INSERT INTO employee
             (tenant_id, employee_ext_id, first_name, last_name, hire_date, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                e.tenant_id,
                e.employee_ext_id,
                e.first_name,
                e.last_name,
                e.hire_date,
                e.is_active,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// (external id, internal id) for every employee of the tenant.
    pub fn employee_directory(&self, tenant_id: &str) -> ReconResult<Vec<(String, EmployeeId)>> {
        let mut stmt = self.conn.prepare(
            "SELECT employee_ext_id, id FROM employee WHERE tenant_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![tenant_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_plan(&self, p: &PlanRow) -> ReconResult<i64> {
        self.conn.execute(
            "INSERT INTO plan (tenant_id, plan_code, plan_name, plan_type, carrier, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                p.tenant_id,
                p.plan_code,
                p.plan_name,
                p.category.as_str(),
                p.carrier,
                p.is_active,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // ── Enrollments ────────────────────────────────────────────────

    /// Insert an enrollment. `category` is ignored; it is always taken from the plan.
    pub fn insert_enrollment(&self, e: &EnrollmentRecord) -> ReconResult<i64> {
        self.conn.execute(
            "INSERT INTO enrollment
             (tenant_id, employee_id, plan_id, effective_from, effective_to,
              contribution_pct, contribution_amount, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                e.tenant_id,
                e.employee_id,
                e.plan_id,
                e.effective_from,
                e.effective_to,
                e.contribution_pct,
                e.contribution_amount,
                e.is_active,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All enrollments of a tenant with the plan's coverage category resolved.
    /// Rows whose plan type is not a known category are skipped with a warning.
    pub fn enrollments_for_tenant(&self, tenant_id: &str) -> ReconResult<Vec<EnrollmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.tenant_id, e.employee_id, e.plan_id, p.plan_type,
                    e.contribution_pct, e.contribution_amount,
                    e.effective_from, e.effective_to, e.is_active
             FROM enrollment e
             JOIN plan p ON p.id = e.plan_id
             WHERE e.tenant_id = ?1
             ORDER BY e.id ASC",
        )?;
        let raw = stmt
            .query_map(params![tenant_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                    row.get::<_, NaiveDate>(7)?,
                    row.get::<_, Option<NaiveDate>>(8)?,
                    row.get::<_, bool>(9)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let records = raw
            .into_iter()
            .filter_map(
                |(id, tenant_id, employee_id, plan_id, plan_type, pct, amount, from, to, active)| {
                    match plan_type.parse::<CoverageCategory>() {
                        Ok(category) => Some(EnrollmentRecord {
                            id: Some(id),
                            tenant_id,
                            employee_id,
                            plan_id,
                            category,
                            contribution_pct: pct,
                            contribution_amount: amount,
                            effective_from: from,
                            effective_to: to,
                            is_active: active,
                        }),
                        Err(e) => {
                            warn!("enrollment {id}: skipping, {e}");
                            None
                        }
                    }
                },
            )
            .collect();
        Ok(records)
    }

    // ── Payroll batches and lines ──────────────────────────────────

    pub fn insert_batch(&self, b: &PayrollBatchRow) -> ReconResult<BatchId> {
        self.conn.execute(
            "INSERT INTO payroll_batch
             (tenant_id, period_start, period_end, source, uploaded_by, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                b.tenant_id,
                b.period_start,
                b.period_end,
                b.source,
                b.uploaded_by,
                b.status,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// A batch is only visible to the tenant that owns it.
    pub fn get_batch(&self, tenant_id: &str, batch_id: BatchId) -> ReconResult<Option<PayrollBatchRow>> {
        let batch = self
            .conn
            .query_row(
                "SELECT id, tenant_id, period_start, period_end, source, uploaded_by, status
                 FROM payroll_batch WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id, batch_id],
                |row| {
                    Ok(PayrollBatchRow {
                        id: Some(row.get(0)?),
                        tenant_id: row.get(1)?,
                        period_start: row.get(2)?,
                        period_end: row.get(3)?,
                        source: row.get(4)?,
                        uploaded_by: row.get(5)?,
                        status: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(batch)
    }

    pub fn update_batch_status(&self, batch_id: BatchId, status: &str) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE payroll_batch SET status = ?2 WHERE id = ?1",
            params![batch_id, status],
        )?;
        Ok(())
    }

    pub fn insert_deduction_line(&self, l: &DeductionLine) -> ReconResult<i64> {
        self.conn.execute(
            "INSERT INTO pay_item
             (tenant_id, payroll_batch_id, employee_id, employee_ext_id, code, amount,
              contribution_pct, period_start, period_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                l.tenant_id,
                l.batch_id,
                l.employee_id,
                l.employee_ext_id,
                l.code,
                l.amount,
                l.contribution_pct,
                l.period_start,
                l.period_end,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Every line of the batch in insertion order.
    pub fn deduction_lines_for_batch(
        &self,
        tenant_id: &str,
        batch_id: BatchId,
    ) -> ReconResult<Vec<DeductionLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, tenant_id, payroll_batch_id, employee_ext_id, employee_id, code,
                    amount, contribution_pct, period_start, period_end
             FROM pay_item
             WHERE tenant_id = ?1 AND payroll_batch_id = ?2
             ORDER BY id ASC",
        )?;
        let lines = stmt
            .query_map(params![tenant_id, batch_id], |row| {
                Ok(DeductionLine {
                    id: Some(row.get(0)?),
                    tenant_id: row.get(1)?,
                    batch_id: row.get(2)?,
                    employee_ext_id: row.get(3)?,
                    employee_id: row.get(4)?,
                    code: row.get(5)?,
                    amount: row.get(6)?,
                    contribution_pct: row.get(7)?,
                    period_start: row.get(8)?,
                    period_end: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    pub fn deduction_line_count(&self, tenant_id: &str, batch_id: BatchId) -> ReconResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM pay_item WHERE tenant_id = ?1 AND payroll_batch_id = ?2",
            params![tenant_id, batch_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
