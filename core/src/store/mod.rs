//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Services call store methods; they never execute SQL directly.
//! The one exception is the guarded query path, which hands caller text to
//! `query` / `execute_with_timeout` after the executor has vetted it.

use crate::{
    error::ReconResult,
    types::{BatchId, CoverageCategory, EmployeeId, IssueKind, RunId, RunStatus, TenantId},
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

mod audit;
mod payroll;
mod query;
mod reconciliation;

pub use query::{Cell, QueryRows};

pub struct ReconStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file or URI
}

impl ReconStore {
    pub fn open(path: &str) -> ReconResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ReconResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based or shared-cache URIs, this opens the same database.
    pub fn reopen(&self) -> ReconResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Path or URI the connection was opened with; `None` for a private
    /// in-memory database.
    pub fn location(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ReconResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    /// Refuse every write on this connection. Used for the guarded query path.
    pub fn set_query_only(&self) -> ReconResult<()> {
        self.conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(())
    }

    /// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> ReconResult<T>) -> ReconResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Payroll and enrollment rows
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRow {
    pub id: Option<EmployeeId>,
    pub tenant_id: TenantId,
    pub employee_ext_id: String,
    pub first_name: String,
    pub last_name: String,
    pub hire_date: NaiveDate,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRow {
    pub id: Option<i64>,
    pub tenant_id: TenantId,
    pub plan_code: String,
    pub plan_name: String,
    pub category: CoverageCategory,
    pub carrier: Option<String>,
    pub is_active: bool,
}

/// One active-or-not coverage election. The store joins `plan` to resolve
/// the coverage category, so consumers never see plan ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub id: Option<i64>,
    pub tenant_id: TenantId,
    pub employee_id: EmployeeId,
    pub plan_id: i64,
    pub category: CoverageCategory,
    pub contribution_pct: f64,
    pub contribution_amount: Option<f64>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollBatchRow {
    pub id: Option<BatchId>,
    pub tenant_id: TenantId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub source: String,
    pub uploaded_by: String,
    pub status: String,
}

/// One payroll withholding line. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductionLine {
    pub id: Option<i64>,
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub employee_ext_id: Option<String>,
    pub employee_id: Option<EmployeeId>,
    pub code: String,
    pub amount: f64,
    pub contribution_pct: f64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

// ═══════════════════════════════════════════════════════════════════════════
// Reconciliation rows
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRun {
    pub id: RunId,
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub created_by: String,
    pub status: RunStatus,
    /// Issue-kind counts, present once the run completed.
    pub summary: Option<serde_json::Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationItem {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub employee_ext_id: String,
    pub issue_kind: IssueKind,
    pub expected_pct: Option<f64>,
    pub actual_pct: Option<f64>,
    pub amount: Option<f64>,
    pub details: Option<String>,
}

/// Stored insights record; at most one per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsRow {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub tenant_id: TenantId,
    pub top_causes: Vec<(IssueKind, u64)>,
    pub total_impact: f64,
    pub affected_employees: u64,
    pub suggested_fixes: Vec<String>,
    pub priority_actions: Vec<String>,
    pub risk_level: String,
    pub risk_assessment: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchTransferRow {
    pub id: Option<i64>,
    pub tenant_id: TenantId,
    pub run_id: RunId,
    pub amount: f64,
    pub file_ref: String,
    pub status: String,
}

/// An audit entry as the caller builds it, before the store stamps id and time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub tenant_id: TenantId,
    pub actor: String,
    pub action: String,
    pub entity: String,
    pub entity_id: i64,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRow {
    pub id: i64,
    pub tenant_id: TenantId,
    pub actor: String,
    pub action: String,
    pub entity: String,
    pub entity_id: i64,
    pub before: Option<String>,
    pub after: Option<String>,
    pub at: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// Listing helpers
// ═══════════════════════════════════════════════════════════════════════════

/// 1-based page request. `limit` is clamped to 1..=100 by the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    pub(crate) fn limit_offset(&self) -> (i64, i64) {
        let limit = self.limit.clamp(1, Self::MAX_LIMIT) as i64;
        let page = self.page.max(1) as i64;
        (limit, (page - 1) * limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFilter {
    pub issue_kind: Option<IssueKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub entity: Option<String>,
    pub entity_id: Option<i64>,
    pub action: Option<String>,
    pub actor: Option<String>,
}
