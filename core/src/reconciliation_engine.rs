//! Reconciliation engine: one pass over a payroll batch.
//!
//! Execution:
//!   1. The batch must exist for the tenant, otherwise NotFound.
//!   2. A run row is created in `running` state.
//!   3. The enrollment index is built once for the whole run.
//!   4. Every line is classified; items and the summary are written in a
//!      single transaction, then the run moves to `completed`.
//!   5. Any failure rolls the items back and marks the run `failed`.
//!      Failed runs are never retried automatically.

use crate::{
    config::ReconciliationConfig,
    enrollment_index::{ActiveAsOf, CodeCategoryMap, EnrollmentIndex},
    error::{ReconError, ReconResult},
    issue_classifier::classify,
    store::{ReconStore, ReconciliationItem},
    types::{BatchId, IssueKind, RunId},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-issue-kind counts. Kinds with no lines are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunSummary {
    pub counts: BTreeMap<IssueKind, u64>,
}

impl RunSummary {
    pub fn record(&mut self, kind: IssueKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
    }

    pub fn count(&self, kind: IssueKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn discrepancies(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(kind, _)| kind.is_discrepancy())
            .map(|(_, n)| n)
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub summary: RunSummary,
}

pub struct ReconciliationEngine<'a> {
    store: &'a ReconStore,
    codes: CodeCategoryMap,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(store: &'a ReconStore, config: &ReconciliationConfig) -> Self {
        Self {
            store,
            codes: CodeCategoryMap::new(&config.code_markers),
        }
    }

    pub fn run(&self, tenant_id: &str, batch_id: BatchId, actor: &str) -> ReconResult<RunResult> {
        if self.store.get_batch(tenant_id, batch_id)?.is_none() {
            return Err(ReconError::not_found("payroll batch", batch_id));
        }

        let run_id = self.store.insert_run(tenant_id, batch_id, actor)?;
        info!("tenant {tenant_id}: run {run_id} started for batch {batch_id} by {actor}");

        match self.process(tenant_id, batch_id, run_id) {
            Ok(summary) => {
                info!(
                    "tenant {tenant_id}: run {run_id} completed, {} lines, {} discrepancies",
                    summary.total(),
                    summary.discrepancies()
                );
                Ok(RunResult { run_id, summary })
            }
            Err(e) => {
                warn!("tenant {tenant_id}: run {run_id} failed: {e}");
                if let Err(mark) = self.store.fail_run(run_id, &e.to_string()) {
                    warn!("run {run_id}: could not mark failed: {mark}");
                }
                Err(e)
            }
        }
    }

    fn process(&self, tenant_id: &str, batch_id: BatchId, run_id: RunId) -> ReconResult<RunSummary> {
        let index = EnrollmentIndex::build(self.store, tenant_id, ActiveAsOf::CurrentlyActive, &self.codes)?;
        let lines = self.store.deduction_lines_for_batch(tenant_id, batch_id)?;

        self.store.in_transaction(|store| {
            let mut summary = RunSummary::default();
            for line in &lines {
                let c = classify(line, &index);
                store.insert_item(&ReconciliationItem {
                    id: None,
                    run_id,
                    employee_ext_id: c.employee_ext_id,
                    issue_kind: c.issue_kind,
                    expected_pct: c.expected_pct,
                    actual_pct: c.actual_pct,
                    amount: c.amount,
                    details: Some(c.detail),
                })?;
                summary.record(c.issue_kind);
            }
            store.complete_run(run_id, &serde_json::to_value(&summary)?)?;
            Ok(summary)
        })
    }
}
