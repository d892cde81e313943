//! Cross-cutting statistics over an already-persisted run.
//! Reads items only, so it can be recomputed at any time.

use crate::{
    error::ReconResult,
    store::{ReconStore, ReconciliationItem},
    types::{IssueKind, RunId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Descending by count; ties in issue-kind declaration order.
    pub histogram: Vec<(IssueKind, u64)>,
    /// Sum of |amount| over items that carry one.
    pub total_impact: f64,
    /// Distinct external ids across all items, `ok` included.
    pub affected_employees: u64,
    pub total_items: u64,
}

impl RunStats {
    pub fn count(&self, kind: IssueKind) -> u64 {
        self.histogram
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, n)| *n)
    }

    /// Share of items that are not `ok`, 0.0 for an empty run.
    pub fn discrepancy_ratio(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        let bad: u64 = self
            .histogram
            .iter()
            .filter(|(k, _)| k.is_discrepancy())
            .map(|(_, n)| n)
            .sum();
        bad as f64 / self.total_items as f64
    }
}

pub fn compute(store: &ReconStore, run_id: RunId) -> ReconResult<RunStats> {
    Ok(from_items(&store.items_for_run(run_id)?))
}

pub fn from_items(items: &[ReconciliationItem]) -> RunStats {
    let mut counts: BTreeMap<IssueKind, u64> = BTreeMap::new();
    let mut employees = HashSet::new();
    let mut total_impact = 0.0;

    for item in items {
        *counts.entry(item.issue_kind).or_insert(0) += 1;
        employees.insert(item.employee_ext_id.as_str());
        if let Some(amount) = item.amount {
            total_impact += amount.abs();
        }
    }

    // BTreeMap yields declaration order; a stable sort keeps it for ties.
    let mut histogram: Vec<(IssueKind, u64)> = counts.into_iter().collect();
    histogram.sort_by(|a, b| b.1.cmp(&a.1));

    RunStats {
        histogram,
        total_impact,
        affected_employees: employees.len() as u64,
        total_items: items.len() as u64,
    }
}
