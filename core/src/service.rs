//! Caller-facing facade over the reconciliation pipeline.
//!
//! This is where tenant ownership of runs is checked and where audit records
//! are written after successful mutations. Web or CLI layers talk to this,
//! never to the engine or the store directly.

use crate::{
    ach_export::{self, AchApproval},
    audit::{self, action, AuditRecord},
    config::AppConfig,
    error::{ReconError, ReconResult},
    insights::{self, InsightsService},
    reconciliation_engine::{ReconciliationEngine, RunResult},
    stats_aggregator::{self, RunStats},
    store::{AuditFilter, AuditLogRow, InsightsRow, ItemFilter, Page, ReconStore, ReconciliationItem, ReconciliationRun},
    synthetic::{SeedReport, SyntheticGenerator},
    types::{BatchId, IssueKind, RunId},
};
use std::path::Path;

/// The tenant named in the request path must match the one the caller asserts.
pub fn ensure_tenant(path_tenant: &str, header_tenant: &str) -> ReconResult<()> {
    if path_tenant != header_tenant {
        return Err(ReconError::TenantMismatch {
            expected: path_tenant.to_string(),
            actual: header_tenant.to_string(),
        });
    }
    Ok(())
}

pub struct ReconService<'a> {
    store: &'a ReconStore,
    config: &'a AppConfig,
}

impl<'a> ReconService<'a> {
    pub fn new(store: &'a ReconStore, config: &'a AppConfig) -> Self {
        Self { store, config }
    }

    fn owned_run(&self, tenant_id: &str, run_id: RunId) -> ReconResult<ReconciliationRun> {
        self.store
            .get_run(tenant_id, run_id)?
            .ok_or_else(|| ReconError::not_found("reconciliation run", run_id))
    }

    pub fn run_reconciliation(&self, tenant_id: &str, batch_id: BatchId, actor: &str) -> ReconResult<RunResult> {
        let result = ReconciliationEngine::new(self.store, &self.config.reconciliation)
            .run(tenant_id, batch_id, actor)?;
        audit::record(
            self.store,
            &AuditRecord::new(tenant_id, actor, action::CREATE, "reconciliation_run", result.run_id)
                .with_after(serde_json::json!({
                    "payroll_batch_id": batch_id,
                    "summary": result.summary,
                })),
        )?;
        Ok(result)
    }

    pub fn get_run(&self, tenant_id: &str, run_id: RunId) -> ReconResult<ReconciliationRun> {
        self.owned_run(tenant_id, run_id)
    }

    pub fn list_items(
        &self,
        tenant_id: &str,
        run_id: RunId,
        filter: &ItemFilter,
        page: Page,
    ) -> ReconResult<Vec<ReconciliationItem>> {
        self.owned_run(tenant_id, run_id)?;
        self.store.list_items(run_id, filter, page)
    }

    pub fn summary_from_items(&self, tenant_id: &str, run_id: RunId) -> ReconResult<Vec<(IssueKind, i64)>> {
        self.owned_run(tenant_id, run_id)?;
        self.store.summary_from_items(run_id)
    }

    pub fn stats(&self, tenant_id: &str, run_id: RunId) -> ReconResult<RunStats> {
        self.owned_run(tenant_id, run_id)?;
        stats_aggregator::compute(self.store, run_id)
    }

    pub fn get_insights(&self, tenant_id: &str, run_id: RunId) -> ReconResult<InsightsRow> {
        insights::get_insights(self.store, tenant_id, run_id)
    }

    pub async fn create_insights(
        &self,
        tenant_id: &str,
        run_id: RunId,
        advisor: &InsightsService,
    ) -> ReconResult<InsightsRow> {
        advisor.create_insights(self.store, tenant_id, run_id).await
    }

    pub fn approve_run(
        &self,
        tenant_id: &str,
        actor: &str,
        run_id: RunId,
        dry_run: bool,
        out_dir: &Path,
    ) -> ReconResult<AchApproval> {
        let prior_transfers = self.store.ach_transfers_for_run(tenant_id, run_id)?.len();
        let approval = ach_export::approve_run(self.store, tenant_id, run_id, dry_run, out_dir)?;
        if let Some(transfer_id) = approval.transfer_id {
            audit::record(
                self.store,
                &AuditRecord::new(tenant_id, actor, action::APPROVE, "ach_transfer", transfer_id)
                    .with_before(serde_json::json!({
                        "run_id": run_id,
                        "prior_transfers": prior_transfers,
                    }))
                    .with_after(serde_json::json!({
                        "run_id": run_id,
                        "amount": approval.total,
                        "file_ref": approval.file_ref,
                    })),
            )?;
        }
        Ok(approval)
    }

    /// Seed synthetic data and leave one audit entry per generated batch.
    pub fn seed(&self, actor: &str, generator: &SyntheticGenerator) -> ReconResult<SeedReport> {
        let report = generator.generate(self.store)?;
        for (tenant_id, batch_id) in &report.batches {
            audit::record(
                self.store,
                &AuditRecord::new(tenant_id.as_str(), actor, action::SEED, "payroll_batch", *batch_id),
            )?;
        }
        Ok(report)
    }

    pub fn list_audit(&self, tenant_id: &str, filter: &AuditFilter, page: Page) -> ReconResult<Vec<AuditLogRow>> {
        audit::list(self.store, tenant_id, filter, page)
    }
}
