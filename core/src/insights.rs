//! Per-run insights: run statistics plus advice from the text-generation
//! capability, stored once per run.
//!
//! Advice is best effort. A failed call or unparseable reply falls back to
//! fixed advice; the statistics and risk level never depend on it.

use crate::{
    config::AppConfig,
    error::{ReconError, ReconResult},
    stats_aggregator::{self, RunStats},
    store::{InsightsRow, ReconStore},
    translation::Translator,
    types::{RunId, RunStatus},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bands on the share of non-`ok` items.
    pub fn from_stats(stats: &RunStats) -> Self {
        match stats.discrepancy_ratio() {
            r if r < 0.05 => RiskLevel::Low,
            r if r < 0.15 => RiskLevel::Medium,
            r if r < 0.30 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Advice {
    #[serde(default)]
    pub suggested_fixes: Vec<String>,
    #[serde(default)]
    pub priority_actions: Vec<String>,
    #[serde(default)]
    pub risk_assessment: Option<String>,
}

impl Advice {
    fn unavailable(reason: &str) -> Self {
        Self {
            suggested_fixes: vec![
                "Review missing coverage issues".into(),
                "Check percentage mismatches".into(),
                "Verify employee enrollments".into(),
            ],
            priority_actions: vec![
                "Address missing coverage issues first".into(),
                "Review high-dollar discrepancies".into(),
                "Validate employee data".into(),
            ],
            risk_assessment: Some(format!("Medium - automated analysis unavailable: {reason}")),
        }
    }

    fn unstructured(reply: &str) -> Self {
        Self {
            suggested_fixes: vec![reply.to_string()],
            priority_actions: vec!["Review the reconciliation results manually".into()],
            risk_assessment: Some("Medium - requires manual review".into()),
        }
    }
}

/// Parse the JSON object spanning the first `{` to the last `}` of a reply.
pub fn parse_advice(reply: &str) -> Option<Advice> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

fn advice_prompt(stats: &RunStats, run_summary: &str) -> String {
    let causes: Vec<String> = stats
        .histogram
        .iter()
        .map(|(kind, n)| format!("{kind}: {n}"))
        .collect();
    format!(
        "Analyze this payroll deduction reconciliation run.\n\
         Top causes: {}\n\
         Total dollar impact: ${:.2}\n\
         Affected employees: {}\n\
         Run summary: {run_summary}\n\n\
         Reply with JSON only, keys:\n\
         - suggested_fixes: 3-5 systematic batch fixes (array of strings)\n\
         - priority_actions: 3 immediate actions (array of strings)\n\
         - risk_assessment: one sentence (string)",
        causes.join(", "),
        stats.total_impact,
        stats.affected_employees,
    )
}

pub struct InsightsService {
    advisor: Arc<dyn Translator>,
    model: String,
    timeout: Duration,
}

impl InsightsService {
    pub fn new(advisor: Arc<dyn Translator>, config: &AppConfig) -> Self {
        Self {
            advisor,
            model: config.translation.model.clone(),
            timeout: Duration::from_secs(config.orchestrator.translation_timeout_secs),
        }
    }

    /// Insights for a run, computed at most once. A stored record is returned as is.
    pub async fn create_insights(
        &self,
        store: &ReconStore,
        tenant_id: &str,
        run_id: RunId,
    ) -> ReconResult<InsightsRow> {
        let run = store
            .get_run(tenant_id, run_id)?
            .ok_or_else(|| ReconError::not_found("reconciliation run", run_id))?;
        // Insights are cached, so an unfinished run would be stuck with them.
        if run.status != RunStatus::Completed {
            return Err(ReconError::InvalidRecord(format!(
                "run {run_id} is {}; insights need a completed run",
                run.status.as_str()
            )));
        }

        if let Some(existing) = store.get_insights(tenant_id, run_id)? {
            debug!("run {run_id}: insights already stored");
            return Ok(existing);
        }

        let stats = stats_aggregator::compute(store, run_id)?;
        let run_summary = run
            .summary
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "{}".into());
        let advice = self.advise(&stats, &run_summary, run_id).await;
        let risk = RiskLevel::from_stats(&stats);

        let mut row = InsightsRow {
            id: None,
            run_id,
            tenant_id: tenant_id.to_string(),
            top_causes: stats.histogram.clone(),
            total_impact: stats.total_impact,
            affected_employees: stats.affected_employees,
            suggested_fixes: advice.suggested_fixes,
            priority_actions: advice.priority_actions,
            risk_level: risk.as_str().to_string(),
            risk_assessment: advice.risk_assessment,
            created_at: None,
        };
        row.id = Some(store.insert_insights(&row)?);
        info!(
            "tenant {tenant_id}: run {run_id} insights stored, risk {risk}, impact {:.2}",
            row.total_impact
        );
        Ok(row)
    }

    async fn advise(&self, stats: &RunStats, run_summary: &str, run_id: RunId) -> Advice {
        let prompt = advice_prompt(stats, run_summary);
        match tokio::time::timeout(self.timeout, self.advisor.generate(&prompt, &self.model)).await {
            Ok(Ok(reply)) => parse_advice(&reply).unwrap_or_else(|| {
                warn!("run {run_id}: advice reply was not JSON, keeping it as text");
                Advice::unstructured(reply.trim())
            }),
            Ok(Err(e)) => {
                warn!("run {run_id}: advice unavailable: {e}");
                Advice::unavailable(&e.to_string())
            }
            Err(_) => {
                warn!("run {run_id}: advice timed out after {:?}", self.timeout);
                Advice::unavailable("timed out")
            }
        }
    }
}

/// Stored insights, or NotFound.
pub fn get_insights(store: &ReconStore, tenant_id: &str, run_id: RunId) -> ReconResult<InsightsRow> {
    store
        .get_insights(tenant_id, run_id)?
        .ok_or_else(|| ReconError::not_found("insights for run", run_id))
}
