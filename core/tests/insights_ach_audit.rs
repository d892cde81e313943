//! Integration tests for the post-run surface: insights, ACH approval and
//! the audit trail, all through `ReconService`.

mod common;

use common::*;
use payrecon_core::{
    ach_export::PREVIEW_LINES,
    config::AppConfig,
    error::ReconError,
    insights::InsightsService,
    service::{ensure_tenant, ReconService},
    store::{AuditFilter, Page},
    types::RunId,
};
use std::path::PathBuf;
use std::sync::Arc;

fn completed_run(service: &ReconService<'_>, store: &payrecon_core::store::ReconStore) -> RunId {
    let batch = three_line_batch(store);
    service.run_reconciliation(TENANT, batch, "tester").unwrap().run_id
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("payrecon-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

// ─────────────────────────────────────────────────────────────────────────────
// Insights
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insights_are_computed_once_per_run() {
    let store = migrated_memory_store();
    let cfg = AppConfig::default_test();
    let service = ReconService::new(&store, &cfg);
    let run_id = completed_run(&service, &store);

    let advisor = Arc::new(ScriptedTranslator::new(
        vec![Ok(r#"Sure! {"suggested_fixes": ["Re-key dental codes"],
                  "priority_actions": ["Enroll E002"],
                  "risk_assessment": "High"} Thanks."#)],
        Err("called twice"),
    ));
    let insights = InsightsService::new(advisor.clone(), &cfg);

    assert!(matches!(
        service.get_insights(TENANT, run_id),
        Err(ReconError::NotFound { .. })
    ));

    let first = service.create_insights(TENANT, run_id, &insights).await.unwrap();
    assert_eq!(first.suggested_fixes, vec!["Re-key dental codes".to_string()]);
    assert_eq!(first.priority_actions, vec!["Enroll E002".to_string()]);
    assert_eq!(first.affected_employees, 3);
    // Two of three items are discrepancies.
    assert_eq!(first.risk_level, "critical");

    let again = service.create_insights(TENANT, run_id, &insights).await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.suggested_fixes, first.suggested_fixes);
    assert_eq!(advisor.calls(), 1);

    let stored = service.get_insights(TENANT, run_id).unwrap();
    assert_eq!(stored.top_causes, first.top_causes);
}

#[tokio::test]
async fn unavailable_advisor_falls_back_to_fixed_advice() {
    let store = migrated_memory_store();
    let cfg = AppConfig::default_test();
    let service = ReconService::new(&store, &cfg);
    let run_id = completed_run(&service, &store);

    let advisor = Arc::new(ScriptedTranslator::new(vec![], Err("no api key")));
    let insights = InsightsService::new(advisor, &cfg);

    let row = service.create_insights(TENANT, run_id, &insights).await.unwrap();
    assert_eq!(row.suggested_fixes.len(), 3);
    assert_eq!(row.priority_actions.len(), 3);
    assert!(row
        .risk_assessment
        .as_deref()
        .unwrap_or_default()
        .contains("no api key"));
}

#[tokio::test]
async fn insights_for_a_foreign_run_are_not_found() {
    let store = migrated_memory_store();
    let cfg = AppConfig::default_test();
    let service = ReconService::new(&store, &cfg);
    let run_id = completed_run(&service, &store);
    let insights = InsightsService::new(
        Arc::new(ScriptedTranslator::new(vec![], Err("unused"))),
        &cfg,
    );

    let err = service
        .create_insights(OTHER_TENANT, run_id, &insights)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconError::NotFound { .. }), "{err}");
}

#[tokio::test]
async fn insights_need_a_completed_run() {
    let store = migrated_memory_store();
    let cfg = AppConfig::default_test();
    let service = ReconService::new(&store, &cfg);
    let batch = three_line_batch(&store);
    let advisor = Arc::new(ScriptedTranslator::new(vec![], Err("unused")));
    let insights = InsightsService::new(advisor.clone(), &cfg);

    let running = store.insert_run(TENANT, batch, "tester").unwrap();
    let failed = store.insert_run(TENANT, batch, "tester").unwrap();
    store.fail_run(failed, "boom").unwrap();

    for run_id in [running, failed] {
        let err = service
            .create_insights(TENANT, run_id, &insights)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::InvalidRecord(_)), "{err}");
        assert!(matches!(
            service.get_insights(TENANT, run_id),
            Err(ReconError::NotFound { .. })
        ));
    }
    assert_eq!(advisor.calls(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// ACH approval
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn dry_run_previews_without_side_effects() {
    let store = migrated_memory_store();
    let cfg = AppConfig::default_test();
    let service = ReconService::new(&store, &cfg);
    let run_id = completed_run(&service, &store);
    let out = scratch_dir("dry");

    let preview = service.approve_run(TENANT, "approver", run_id, true, &out).unwrap();
    assert!(preview.dry_run);
    assert_eq!(preview.line_count, 2);
    assert!(preview.preview_lines.len() <= PREVIEW_LINES);
    assert_eq!(preview.preview_lines[0], "E002,missing_coverage,3->,42.5");
    assert_eq!(preview.preview_lines[1], "UNKNOWN,extra_deduction,2->,60");
    assert!((preview.total - 102.5).abs() < 1e-9);
    assert!(preview.transfer_id.is_none());

    assert!(!out.exists());
    assert!(store.ach_transfers_for_run(TENANT, run_id).unwrap().is_empty());
    let approvals = service
        .list_audit(
            TENANT,
            &AuditFilter {
                action: Some("approve".into()),
                ..AuditFilter::default()
            },
            Page::default(),
        )
        .unwrap();
    assert!(approvals.is_empty());
}

#[test]
fn approval_writes_file_and_transfer() {
    let store = migrated_memory_store();
    let cfg = AppConfig::default_test();
    let service = ReconService::new(&store, &cfg);
    let run_id = completed_run(&service, &store);
    let out = scratch_dir("approve");

    let approval = service.approve_run(TENANT, "approver", run_id, false, &out).unwrap();
    let transfer_id = approval.transfer_id.expect("transfer recorded");
    let file_ref = approval.file_ref.expect("file written");

    let body = std::fs::read_to_string(&file_ref).unwrap();
    let mut lines = body.lines();
    assert_eq!(lines.next(), Some("# ACH export"));
    assert!(lines.next().unwrap().contains(&format!("run_id={run_id}")));
    assert_eq!(lines.count(), 2);

    let transfers = store.ach_transfers_for_run(TENANT, run_id).unwrap();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].id, Some(transfer_id));
    assert_eq!(transfers[0].status, "submitted");
    assert!((transfers[0].amount - 102.5).abs() < 1e-9);

    let audit = service
        .list_audit(
            TENANT,
            &AuditFilter {
                entity: Some("ach_transfer".into()),
                ..AuditFilter::default()
            },
            Page::default(),
        )
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].entity_id, transfer_id);
    assert_eq!(audit[0].actor, "approver");
    let before: serde_json::Value =
        serde_json::from_str(audit[0].before.as_deref().expect("prior state recorded")).unwrap();
    assert_eq!(before["prior_transfers"], 0);
    assert_eq!(before["run_id"], run_id);

    let _ = std::fs::remove_dir_all(&out);
}

#[test]
fn approving_a_foreign_run_is_not_found() {
    let store = migrated_memory_store();
    let cfg = AppConfig::default_test();
    let service = ReconService::new(&store, &cfg);
    let run_id = completed_run(&service, &store);

    let err = service
        .approve_run(OTHER_TENANT, "intruder", run_id, false, &scratch_dir("foreign"))
        .unwrap_err();
    assert!(matches!(err, ReconError::NotFound { .. }), "{err}");
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit trail and tenant assertion
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn audit_lists_newest_first_per_tenant() {
    let store = migrated_memory_store();
    let cfg = AppConfig::default_test();
    let service = ReconService::new(&store, &cfg);
    let batch = three_line_batch(&store);

    let first = service.run_reconciliation(TENANT, batch, "alice").unwrap().run_id;
    let second = service.run_reconciliation(TENANT, batch, "bob").unwrap().run_id;

    let entries = service
        .list_audit(TENANT, &AuditFilter::default(), Page::default())
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].entity_id, second);
    assert_eq!(entries[1].entity_id, first);
    assert_eq!(entries[0].action, "create");
    assert_eq!(entries[0].entity, "reconciliation_run");
    assert!(entries[0].after.as_deref().unwrap_or_default().contains("summary"));

    let by_alice = service
        .list_audit(
            TENANT,
            &AuditFilter {
                actor: Some("alice".into()),
                ..AuditFilter::default()
            },
            Page::default(),
        )
        .unwrap();
    assert_eq!(by_alice.len(), 1);

    assert!(service
        .list_audit(OTHER_TENANT, &AuditFilter::default(), Page::default())
        .unwrap()
        .is_empty());
}

#[test]
fn tenant_assertion_must_match_path() {
    assert!(ensure_tenant("t1", "t1").is_ok());
    assert!(matches!(
        ensure_tenant("t1", "t2"),
        Err(ReconError::TenantMismatch { .. })
    ));
}
