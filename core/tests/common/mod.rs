//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use payrecon_core::{
    error::TranslationError,
    store::{DeductionLine, EmployeeRow, EnrollmentRecord, PayrollBatchRow, PlanRow, ReconStore},
    translation::Translator,
    types::{BatchId, CoverageCategory, EmployeeId},
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const TENANT: &str = "t1";
pub const OTHER_TENANT: &str = "t2";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Route `log` output through the test harness; rerun with RUST_LOG=debug.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn migrated_memory_store() -> ReconStore {
    init_logging();
    let store = ReconStore::in_memory().expect("in-memory store");
    store.migrate().expect("migrate");
    store
}

/// A named shared-cache in-memory database. Keep the returned writer alive
/// for as long as other connections to the same name are in use.
pub fn shared_store(name: &str) -> ReconStore {
    init_logging();
    let uri = format!("file:{name}?mode=memory&cache=shared");
    let store = ReconStore::open(&uri).expect("shared store");
    store.migrate().expect("migrate");
    store
}

pub fn add_employee(store: &ReconStore, tenant: &str, ext_id: &str) -> EmployeeId {
    store
        .insert_employee(&EmployeeRow {
            id: None,
            tenant_id: tenant.into(),
            employee_ext_id: ext_id.into(),
            first_name: "Test".into(),
            last_name: ext_id.into(),
            hire_date: date(2020, 1, 1),
            is_active: true,
        })
        .expect("insert employee")
}

pub fn add_plan(store: &ReconStore, tenant: &str, category: CoverageCategory) -> i64 {
    store
        .insert_plan(&PlanRow {
            id: None,
            tenant_id: tenant.into(),
            plan_code: format!("{}_{tenant}", category.as_str().to_ascii_uppercase()),
            plan_name: format!("{category} plan"),
            category,
            carrier: None,
            is_active: true,
        })
        .expect("insert plan")
}

pub fn enroll(store: &ReconStore, tenant: &str, employee_id: EmployeeId, plan_id: i64, category: CoverageCategory, pct: f64) {
    store
        .insert_enrollment(&EnrollmentRecord {
            id: None,
            tenant_id: tenant.into(),
            employee_id,
            plan_id,
            category,
            contribution_pct: pct,
            contribution_amount: None,
            effective_from: date(2020, 1, 1),
            effective_to: None,
            is_active: true,
        })
        .expect("insert enrollment");
}

pub fn add_batch(store: &ReconStore, tenant: &str) -> BatchId {
    store
        .insert_batch(&PayrollBatchRow {
            id: None,
            tenant_id: tenant.into(),
            period_start: date(2024, 1, 1),
            period_end: date(2024, 1, 14),
            source: "test".into(),
            uploaded_by: "tester".into(),
            status: "uploaded".into(),
        })
        .expect("insert batch")
}

pub fn add_line(store: &ReconStore, tenant: &str, batch_id: BatchId, ext_id: Option<&str>, code: &str, pct: f64, amount: f64) {
    store
        .insert_deduction_line(&DeductionLine {
            id: None,
            tenant_id: tenant.into(),
            batch_id,
            employee_ext_id: ext_id.map(String::from),
            employee_id: None,
            code: code.into(),
            amount,
            contribution_pct: pct,
            period_start: date(2024, 1, 1),
            period_end: date(2024, 1, 14),
        })
        .expect("insert line");
}

/// Two tenants. In `t1`:
///   E001 enrolled in medical at 5%
///   E002 known but not enrolled
/// and one batch of three lines: E001 MED at 5% (ok), E002 DEN at 3%
/// (missing coverage) and a line with no employee id (extra deduction).
pub fn three_line_batch(store: &ReconStore) -> BatchId {
    for tenant in [TENANT, OTHER_TENANT] {
        store.insert_tenant(tenant, tenant).expect("insert tenant");
    }
    let e1 = add_employee(store, TENANT, "E001");
    add_employee(store, TENANT, "E002");
    let medical = add_plan(store, TENANT, CoverageCategory::Medical);
    enroll(store, TENANT, e1, medical, CoverageCategory::Medical, 5.0);

    let batch = add_batch(store, TENANT);
    add_line(store, TENANT, batch, Some("E001"), "MED_PRETAX", 5.0, 150.0);
    add_line(store, TENANT, batch, Some("E002"), "DEN_PRETAX", 3.0, 42.5);
    add_line(store, TENANT, batch, None, "MED_PRETAX", 2.0, 60.0);
    batch
}

/// Replays canned replies in order, then repeats `fallback`. Calls listed in
/// `hanging_on` never answer and consume no reply.
pub struct ScriptedTranslator {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: Result<String, String>,
    hang: HashSet<usize>,
    calls: AtomicUsize,
}

impl ScriptedTranslator {
    pub fn new(replies: Vec<Result<&str, &str>>, fallback: Result<&str, &str>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(String::from).map_err(String::from))
                    .collect(),
            ),
            fallback: fallback.map(String::from).map_err(String::from),
            hang: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Zero-based call numbers that hang forever.
    pub fn hanging_on(mut self, calls: &[usize]) -> Self {
        self.hang.extend(calls.iter().copied());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn generate(&self, _prompt: &str, _model: &str) -> Result<String, TranslationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.contains(&call) {
            std::future::pending::<()>().await;
        }
        let next = self
            .replies
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        next.map_err(TranslationError::Unavailable)
    }
}
