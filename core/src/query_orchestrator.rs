//! Question → query → rows, with bounded self-correction.
//!
//! States:
//!   Drafting ──► Executing ──► Succeeded
//!                  │  ▲
//!                  ▼  │
//!               Correcting ──► Failed
//!                 ▲    │
//!                 └────┘  failed correction call, budget left
//!
//! Only a failed draft is terminal on its own. A correction call that fails or
//! times out spends one unit of the correction budget and, while budget and
//! deadline remain, the orchestrator asks again.
//!
//! Every translation call and every execution is wrapped in its own timeout,
//! and all of them together are capped by the per-question deadline. When the
//! deadline passes the in-flight call is abandoned, not awaited; a running
//! statement is stopped by the executor's statement timeout.

use crate::{
    config::AppConfig,
    error::{QueryFailure, QueryFailureKind},
    query_guard::{GuardedQueryExecutor, QuerySuccess},
    translation::{strip_code_fences, Translator},
};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use uuid::Uuid;

/// Slack on top of the statement timeout before the orchestrator gives up
/// waiting for the executor thread.
const EXECUTION_GRACE: Duration = Duration::from_secs(1);

const SCHEMA_DESCRIPTION: &str = "\
SQLite schema (all *_id columns are integers unless noted):
- tenant(id TEXT, name)
- employee(id, tenant_id TEXT, employee_ext_id TEXT, first_name, last_name, hire_date DATE, is_active)
- plan(id, tenant_id TEXT, plan_code, plan_name, plan_type TEXT one of medical|dental|vision|life|disability|fsa|hsa|retirement, carrier, is_active)
- enrollment(id, tenant_id TEXT, employee_id -> employee.id, plan_id -> plan.id, effective_from DATE, effective_to DATE, contribution_pct REAL, contribution_amount REAL, is_active)
- payroll_batch(id, tenant_id TEXT, period_start DATE, period_end DATE, source, uploaded_by, status, created_at TIMESTAMP)
- pay_item(id, tenant_id TEXT, payroll_batch_id -> payroll_batch.id, employee_id -> employee.id, employee_ext_id TEXT, code TEXT, amount REAL, contribution_pct REAL, period_start DATE, period_end DATE)
- reconciliation_run(id, tenant_id TEXT, payroll_batch_id -> payroll_batch.id, created_by, status, summary TEXT, created_at TIMESTAMP)
- reconciliation_item(id, run_id -> reconciliation_run.id, employee_ext_id TEXT, issue_type TEXT one of ok|mismatch_pct|missing_coverage|extra_deduction, expected_pct REAL, actual_pct REAL, amount REAL, details TEXT)
- reconciliation_insights(id, run_id, tenant_id TEXT, top_causes TEXT, total_impact REAL, affected_employees, risk_level TEXT)
- ach_transfer(id, tenant_id TEXT, run_id, amount REAL, file_ref TEXT, status TEXT, created_at TIMESTAMP)
Join keys: employee.employee_ext_id = pay_item.employee_ext_id = reconciliation_item.employee_ext_id.
Every tenant-owned table has tenant_id; always filter on it. reconciliation_item has no tenant_id, reach it through reconciliation_run.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrchestratorState {
    Drafting,
    Executing,
    Correcting,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct OrchestrateRequest {
    pub question: String,
    pub tenant_id: String,
    pub self_correct: bool,
    pub include_summary: bool,
    /// Corrections allowed; `None` takes the configured default.
    pub max_retries: Option<u32>,
}

impl OrchestrateRequest {
    pub fn new(question: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            tenant_id: tenant_id.into(),
            self_correct: true,
            include_summary: false,
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub request_id: Uuid,
    /// Last text attempted, after executor rewrites when it got that far.
    pub query: String,
    pub result: Option<QuerySuccess>,
    /// Summary of the rows on success, a failure explanation otherwise.
    pub summary: Option<String>,
    pub corrections_made: u32,
    pub attempts: u32,
    pub success: bool,
    pub failure: Option<QueryFailureKind>,
    pub states: Vec<OrchestratorState>,
}

pub struct QueryOrchestrator {
    translator: Arc<dyn Translator>,
    executor: Arc<GuardedQueryExecutor>,
    model: String,
    translation_timeout: Duration,
    overall_timeout: Duration,
    default_max_retries: u32,
    summary_row_sample: usize,
}

impl QueryOrchestrator {
    pub fn new(
        translator: Arc<dyn Translator>,
        executor: Arc<GuardedQueryExecutor>,
        config: &AppConfig,
    ) -> Self {
        let o = &config.orchestrator;
        Self {
            translator,
            executor,
            model: config.translation.model.clone(),
            translation_timeout: Duration::from_secs(o.translation_timeout_secs),
            overall_timeout: Duration::from_secs(o.overall_timeout_secs),
            default_max_retries: o.default_max_retries,
            summary_row_sample: o.summary_row_sample,
        }
    }

    pub fn with_translation_timeout(mut self, bound: Duration) -> Self {
        self.translation_timeout = bound;
        self
    }

    pub fn with_overall_timeout(mut self, bound: Duration) -> Self {
        self.overall_timeout = bound;
        self
    }

    pub async fn orchestrate(&self, req: OrchestrateRequest) -> OrchestrationResult {
        let request_id = Uuid::new_v4();
        let deadline = Instant::now() + self.overall_timeout;
        let max_retries = req.max_retries.unwrap_or(self.default_max_retries);
        info!(
            "[{request_id}] tenant {}: question received ({} chars)",
            req.tenant_id,
            req.question.len()
        );

        let mut state = OrchestratorState::Drafting;
        let mut states = Vec::new();
        let mut candidate = String::new();
        let mut corrections = 0u32;
        // Correction calls made, successful or not.
        let mut budget_used = 0u32;
        let mut attempts = 0u32;
        let mut last_failure: Option<QueryFailure> = None;
        let mut success: Option<QuerySuccess> = None;

        loop {
            states.push(state);
            debug!("[{request_id}] state {state:?}");
            state = match state {
                OrchestratorState::Drafting => {
                    match self.translate(draft_prompt(&req.question), deadline).await {
                        Ok(text) => {
                            candidate = text;
                            OrchestratorState::Executing
                        }
                        Err(kind) => {
                            last_failure = Some(QueryFailure::new(kind, ""));
                            OrchestratorState::Failed
                        }
                    }
                }
                OrchestratorState::Executing => {
                    attempts += 1;
                    match self.execute(&candidate, &req.tenant_id, deadline).await {
                        Ok(rows) => {
                            success = Some(rows);
                            OrchestratorState::Succeeded
                        }
                        Err(failure) => {
                            warn!(
                                "[{request_id}] attempt {attempts} failed: {}",
                                failure.kind
                            );
                            let can_retry = req.self_correct
                                && budget_used < max_retries
                                && Instant::now() < deadline;
                            last_failure = Some(failure);
                            if can_retry {
                                OrchestratorState::Correcting
                            } else {
                                OrchestratorState::Failed
                            }
                        }
                    }
                }
                OrchestratorState::Correcting => {
                    let (failed_query, reason) = match &last_failure {
                        Some(f) if !f.query.is_empty() => (f.query.clone(), f.kind.to_string()),
                        Some(f) => (candidate.clone(), f.kind.to_string()),
                        None => (candidate.clone(), String::from("unknown error")),
                    };
                    let prompt = correction_prompt(&req.question, &failed_query, &reason);
                    budget_used += 1;
                    match self.translate(prompt, deadline).await {
                        Ok(text) => {
                            candidate = text;
                            corrections += 1;
                            OrchestratorState::Executing
                        }
                        Err(kind) => {
                            warn!(
                                "[{request_id}] correction {budget_used} of {max_retries} failed: {kind}"
                            );
                            // Keep the execution failure as the reason the next
                            // correction is asked to fix.
                            let retry = budget_used < max_retries && Instant::now() < deadline;
                            if retry {
                                OrchestratorState::Correcting
                            } else {
                                last_failure = Some(QueryFailure::new(kind, failed_query));
                                OrchestratorState::Failed
                            }
                        }
                    }
                }
                OrchestratorState::Succeeded | OrchestratorState::Failed => break,
            };
        }

        match success {
            Some(rows) => {
                let summary = if req.include_summary {
                    self.summarize(&req.question, &rows, deadline).await
                } else {
                    None
                };
                info!(
                    "[{request_id}] succeeded: {} rows after {corrections} corrections",
                    rows.row_count
                );
                OrchestrationResult {
                    request_id,
                    query: rows.query.clone(),
                    result: Some(rows),
                    summary,
                    corrections_made: corrections,
                    attempts,
                    success: true,
                    failure: None,
                    states,
                }
            }
            None => {
                let (query, kind) = match last_failure {
                    Some(f) if !f.query.is_empty() => (f.query, f.kind),
                    Some(f) => (candidate, f.kind),
                    None => (
                        candidate,
                        QueryFailureKind::StoreFailure("no attempt was made".into()),
                    ),
                };
                let explanation = format!(
                    "Could not answer the question after {attempts} attempt(s) and \
                     {corrections} correction(s): {kind}"
                );
                info!("[{request_id}] failed: {kind}");
                OrchestrationResult {
                    request_id,
                    query,
                    result: None,
                    summary: Some(explanation),
                    corrections_made: corrections,
                    attempts,
                    success: false,
                    failure: Some(kind),
                    states,
                }
            }
        }
    }

    /// One bounded translation call. Fences are stripped from the reply.
    async fn translate(&self, prompt: String, deadline: Instant) -> Result<String, QueryFailureKind> {
        let bound = self
            .translation_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        match timeout(bound, self.translator.generate(&prompt, &self.model)).await {
            Ok(Ok(text)) => {
                let text = strip_code_fences(&text);
                if text.is_empty() {
                    Err(QueryFailureKind::TranslationFailure(
                        "empty candidate".into(),
                    ))
                } else {
                    Ok(text)
                }
            }
            Ok(Err(e)) => Err(QueryFailureKind::TranslationFailure(e.to_string())),
            Err(_) => Err(QueryFailureKind::Timeout { after: bound }),
        }
    }

    /// One bounded execution on the blocking pool.
    async fn execute(
        &self,
        candidate: &str,
        tenant_id: &str,
        deadline: Instant,
    ) -> Result<QuerySuccess, QueryFailure> {
        let bound = (self.executor.statement_timeout() + EXECUTION_GRACE)
            .min(deadline.saturating_duration_since(Instant::now()));
        let executor = Arc::clone(&self.executor);
        let (query, tenant) = (candidate.to_string(), tenant_id.to_string());
        let task = tokio::task::spawn_blocking(move || executor.execute(&query, &tenant));

        match timeout(bound, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => Err(QueryFailure::new(
                QueryFailureKind::StoreFailure(format!("execution task failed: {join}")),
                candidate,
            )),
            Err(_) => Err(QueryFailure::new(
                QueryFailureKind::Timeout { after: bound },
                candidate,
            )),
        }
    }

    async fn summarize(&self, question: &str, rows: &QuerySuccess, deadline: Instant) -> Option<String> {
        let sample: Vec<_> = rows.rows.iter().take(self.summary_row_sample).collect();
        let sample = match serde_json::to_string(&sample) {
            Ok(s) => s,
            Err(e) => {
                warn!("summary skipped, rows not serialisable: {e}");
                return None;
            }
        };
        let prompt = format!(
            "Question: {question}\n\
             The query returned {} rows. First rows as JSON:\n{sample}\n\
             Answer the question in two or three plain sentences.",
            rows.row_count
        );
        match self.translate(prompt, deadline).await {
            Ok(text) => Some(text),
            Err(kind) => {
                warn!("summary unavailable: {kind}");
                None
            }
        }
    }
}

fn draft_prompt(question: &str) -> String {
    format!(
        "{SCHEMA_DESCRIPTION}\n\n\
         Write one read-only SQLite SELECT statement that answers:\n{question}\n\
         Reply with the SQL only."
    )
}

fn correction_prompt(question: &str, failed_query: &str, reason: &str) -> String {
    format!(
        "{SCHEMA_DESCRIPTION}\n\n\
         Question: {question}\n\
         This query failed:\n{failed_query}\n\
         Error: {reason}\n\
         Reply with a corrected read-only SQLite SELECT statement only."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_prompt_carries_failure() {
        let p = correction_prompt("how many?", "SELEC 1", "syntax error");
        assert!(p.contains("how many?"));
        assert!(p.contains("SELEC 1"));
        assert!(p.contains("syntax error"));
        assert!(p.contains("tenant_id"));
    }
}
