//! Integration tests for the guarded query executor.
//!
//! Each test opens its own named shared-cache database: the writer seeds it,
//! and the executor gets a second, query-only connection to the same data.

mod common;

use common::*;
use payrecon_core::{
    config::AppConfig,
    error::QueryFailureKind,
    query_guard::{GuardedQueryExecutor, ROW_CEILING},
    store::ReconStore,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn executor_for(store: &ReconStore) -> GuardedQueryExecutor {
    let cfg = AppConfig::default_test();
    GuardedQueryExecutor::new(store.reopen().unwrap(), &cfg.query_guard).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Rejections
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn destructive_statements_never_reach_the_store() {
    let writer = shared_store("qg_reject");
    let batch = three_line_batch(&writer);
    let exec = executor_for(&writer);

    let drop = exec.execute("DROP TABLE employee", TENANT).unwrap_err();
    assert_eq!(drop.kind, QueryFailureKind::ForbiddenStatement);

    let smuggled = exec
        .execute("SELECT 1; DELETE FROM employee", TENANT)
        .unwrap_err();
    assert!(matches!(
        smuggled.kind,
        QueryFailureKind::ForbiddenStatement | QueryFailureKind::ForbiddenKeyword { .. }
    ));

    let commented = exec
        .execute("SELECT 1 AS one -- DROP TABLE employee", TENANT)
        .unwrap();
    assert_eq!(commented.row_count, 1);

    // Keywords are matched on the raw text, literals included.
    let keyword = exec
        .execute("SELECT * FROM employee WHERE last_name = 'update'", TENANT)
        .unwrap_err();
    assert_eq!(
        keyword.kind,
        QueryFailureKind::ForbiddenKeyword {
            keyword: "UPDATE".into()
        }
    );

    assert_eq!(exec.executions(), 1);
    assert_eq!(writer.deduction_line_count(TENANT, batch).unwrap(), 3);
}

#[test]
fn keywords_inside_identifiers_are_allowed() {
    let writer = shared_store("qg_words");
    three_line_batch(&writer);
    let exec = executor_for(&writer);

    let ok = exec
        .execute(
            "SELECT COALESCE(last_name, '') AS updated_name, 0 AS created_flag FROM employee",
            TENANT,
        )
        .unwrap();
    assert_eq!(ok.columns, vec!["updated_name", "created_flag"]);
    assert_eq!(ok.row_count, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Row ceiling
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unbounded_select_is_capped() {
    let writer = shared_store("qg_cap");
    let exec = executor_for(&writer);

    let capped = exec
        .execute(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5000) \
             SELECT x FROM n",
            TENANT,
        )
        .unwrap();
    assert_eq!(capped.row_count, ROW_CEILING);
    assert!(capped.query.to_ascii_uppercase().ends_with(&format!("LIMIT {ROW_CEILING}")));

    let explicit = exec
        .execute(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5000) \
             SELECT x FROM n LIMIT 7",
            TENANT,
        )
        .unwrap();
    assert_eq!(explicit.row_count, 7);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenant scoping
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn tenant_filter_hides_other_tenants_rows() {
    let writer = shared_store("qg_tenant");
    three_line_batch(&writer);
    add_employee(&writer, OTHER_TENANT, "X900");
    let exec = executor_for(&writer);

    let mine = exec
        .execute("SELECT employee_ext_id FROM employee ORDER BY employee_ext_id", TENANT)
        .unwrap();
    let ids: Vec<&str> = mine
        .rows
        .iter()
        .filter_map(|r| r["employee_ext_id"].as_str())
        .collect();
    assert_eq!(ids, vec!["E001", "E002"]);

    let theirs = exec
        .execute(
            "SELECT e.employee_ext_id FROM employee e WHERE e.is_active = 1",
            OTHER_TENANT,
        )
        .unwrap();
    assert_eq!(theirs.row_count, 1);
    assert_eq!(theirs.rows[0]["employee_ext_id"], "X900");

    // An OR in the caller's predicate stays inside the injected conjunction.
    let widened = exec
        .execute(
            "SELECT employee_ext_id FROM employee WHERE is_active = 1 OR 1 = 1",
            OTHER_TENANT,
        )
        .unwrap();
    assert_eq!(widened.row_count, 1);
}

#[test]
fn selecting_the_tenant_column_still_scopes_rows() {
    let writer = shared_store("qg_select_tenant");
    three_line_batch(&writer);
    add_employee(&writer, OTHER_TENANT, "X900");
    let exec = executor_for(&writer);

    let rows = exec
        .execute("SELECT tenant_id, employee_ext_id FROM employee", TENANT)
        .unwrap();
    assert!(rows.query.contains("employee.tenant_id = 't1'"), "{}", rows.query);
    assert_eq!(rows.row_count, 2);
    assert!(rows.rows.iter().all(|r| r["tenant_id"] == TENANT));

    // Naming someone else's tenant does not lift the caller's filter.
    let foreign = exec
        .execute("SELECT employee_ext_id FROM employee WHERE tenant_id = 't2'", TENANT)
        .unwrap();
    assert_eq!(foreign.row_count, 0);
}

#[test]
fn explicit_tenant_predicate_is_left_alone() {
    let writer = shared_store("qg_explicit");
    three_line_batch(&writer);
    add_employee(&writer, OTHER_TENANT, "X900");
    let exec = executor_for(&writer);

    let sql = "SELECT employee_ext_id FROM employee WHERE tenant_id = 't2'";
    assert_eq!(
        exec.prepare(sql, OTHER_TENANT).unwrap(),
        format!("{sql} LIMIT {ROW_CEILING}")
    );
    let rows = exec.execute(sql, OTHER_TENANT).unwrap();
    assert_eq!(rows.row_count, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Timeout and failures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn runaway_query_times_out() {
    let writer = shared_store("qg_timeout");
    let exec = executor_for(&writer).with_statement_timeout(Duration::from_millis(200));

    let err = exec
        .execute(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT count(*) FROM n",
            TENANT,
        )
        .unwrap_err();
    assert!(matches!(err.kind, QueryFailureKind::Timeout { .. }), "{:?}", err.kind);

    // The connection stays usable afterwards.
    let after = exec.execute("SELECT 1 AS one", TENANT).unwrap();
    assert_eq!(after.rows[0]["one"], 1);
}

#[test]
fn slow_query_does_not_block_other_callers() {
    let writer = shared_store("qg_parallel");
    let exec = Arc::new(executor_for(&writer).with_statement_timeout(Duration::from_secs(2)));

    let slow = {
        let exec = Arc::clone(&exec);
        std::thread::spawn(move || {
            exec.execute(
                "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT count(*) FROM n",
                TENANT,
            )
        })
    };
    std::thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    let quick = exec.execute("SELECT 1 AS one", TENANT).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    assert_eq!(quick.rows[0]["one"], 1);

    let slow = slow.join().unwrap().unwrap_err();
    assert!(matches!(slow.kind, QueryFailureKind::Timeout { .. }), "{:?}", slow.kind);
    assert_eq!(exec.executions(), 2);
}

#[test]
fn unknown_table_is_a_store_failure_carrying_the_query() {
    let writer = shared_store("qg_missing");
    let exec = executor_for(&writer);

    let err = exec.execute("SELECT * FROM no_such_table", TENANT).unwrap_err();
    assert!(matches!(err.kind, QueryFailureKind::StoreFailure(_)));
    assert!(err.query.contains("no_such_table"));
    assert_eq!(exec.executions(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Cell rendering
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn date_columns_render_as_iso_text() {
    let writer = shared_store("qg_dates");
    three_line_batch(&writer);
    let exec = executor_for(&writer);

    let rows = exec
        .execute(
            "SELECT period_start, period_end, amount FROM pay_item WHERE employee_ext_id = 'E001'",
            TENANT,
        )
        .unwrap();
    assert_eq!(rows.row_count, 1);
    assert_eq!(rows.rows[0]["period_start"], "2024-01-01");
    assert_eq!(rows.rows[0]["period_end"], "2024-01-14");
    assert_eq!(rows.rows[0]["amount"], 150.0);
}
