//! Seeded synthetic payroll and enrollment data.
//!
//! Produces tenants, employees, one plan per coverage category, enrollments
//! and payroll batches whose lines mostly agree with enrollment, with faults
//! injected at configurable rates:
//!   - percentage mismatches
//!   - deductions for coverage the employee never elected
//!   - deduction codes outside the code table
//!   - lines with a blank employee id
//! Same seed and config, same rows.

use crate::{
    error::ReconResult,
    rng::{StreamRng, StreamSlot},
    store::{DeductionLine, EmployeeRow, EnrollmentRecord, PayrollBatchRow, PlanRow, ReconStore},
    types::{BatchId, CoverageCategory, EmployeeId, TenantId},
};
use chrono::{Duration as Days, NaiveDate};
use log::info;
use serde::{Deserialize, Serialize};

const FIRST_NAMES: &[&str] = &[
    "Ava", "Ben", "Chloe", "Daniel", "Elena", "Farid", "Grace", "Hiro", "Isla", "Jamal",
    "Keiko", "Liam", "Maya", "Noah", "Olivia", "Priya", "Quinn", "Rosa", "Samuel", "Tara",
];

const LAST_NAMES: &[&str] = &[
    "Anderson", "Brooks", "Chen", "Diaz", "Evans", "Fischer", "Garcia", "Hughes", "Ibrahim",
    "Johnson", "Kowalski", "Lopez", "Murphy", "Nguyen", "Okafor", "Patel", "Reyes", "Smith",
];

const CARRIERS: &[&str] = &["Aetna", "Cigna", "Delta Dental", "VSP", "MetLife", "Fidelity"];

/// (category, payroll code) pairs; every code maps through the default code table.
const CATALOG: &[(CoverageCategory, &str)] = &[
    (CoverageCategory::Medical, "MED_PRETAX"),
    (CoverageCategory::Dental, "DEN_PRETAX"),
    (CoverageCategory::Vision, "VIS_PRETAX"),
    (CoverageCategory::Life, "LIFE_POSTTAX"),
    (CoverageCategory::Disability, "STD_POSTTAX"),
    (CoverageCategory::Fsa, "FSA_PRETAX"),
    (CoverageCategory::Hsa, "HSA_PRETAX"),
    (CoverageCategory::Retirement, "401K_PRETAX"),
];

const UNKNOWN_CODES: &[&str] = &["GARNISH", "UNION_DUES", "PARKING", "GYM_CLUB"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub tenants: Vec<TenantId>,
    pub employees_per_tenant: usize,
    pub batches_per_tenant: usize,
    /// Chance an employee elects each non-medical category.
    pub election_rate: f64,
    pub mismatch_rate: f64,
    pub missing_coverage_rate: f64,
    pub unknown_code_rate: f64,
    pub blank_id_rate: f64,
    pub first_period_start: NaiveDate,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            tenants: vec!["demo-tenant-1".into(), "demo-tenant-2".into()],
            employees_per_tenant: 50,
            batches_per_tenant: 2,
            election_rate: 0.4,
            mismatch_rate: 0.08,
            missing_coverage_rate: 0.05,
            unknown_code_rate: 0.03,
            blank_id_rate: 0.02,
            first_period_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedReport {
    pub employees: usize,
    pub plans: usize,
    pub enrollments: usize,
    pub lines: usize,
    pub batches: Vec<(TenantId, BatchId)>,
}

struct Elected {
    category: CoverageCategory,
    pct: f64,
}

pub struct SyntheticGenerator {
    seed: u64,
    config: SyntheticConfig,
}

impl SyntheticGenerator {
    pub fn new(seed: u64, config: SyntheticConfig) -> Self {
        Self { seed, config }
    }

    /// Write everything in one transaction.
    pub fn generate(&self, store: &ReconStore) -> ReconResult<SeedReport> {
        let report = store.in_transaction(|store| {
            let mut people = StreamRng::new(self.seed, StreamSlot::People);
            let mut plans = StreamRng::new(self.seed, StreamSlot::Plans);
            let mut elections = StreamRng::new(self.seed, StreamSlot::Enrollments);
            let mut payroll = StreamRng::new(self.seed, StreamSlot::Payroll);
            let mut faults = StreamRng::new(self.seed, StreamSlot::Faults);
            let mut report = SeedReport::default();

            for (t, tenant_id) in self.config.tenants.iter().enumerate() {
                store.insert_tenant(tenant_id, &format!("Demo Company {}", t + 1))?;

                let mut plan_ids = Vec::with_capacity(CATALOG.len());
                for (category, _) in CATALOG {
                    let carrier = plans.pick(CARRIERS).map(|c| c.to_string());
                    let id = store.insert_plan(&PlanRow {
                        id: None,
                        tenant_id: tenant_id.clone(),
                        plan_code: format!("{}_{}", category.as_str().to_ascii_uppercase(), t + 1),
                        plan_name: format!("{} plan", category),
                        category: *category,
                        carrier,
                        is_active: true,
                    })?;
                    plan_ids.push(id);
                    report.plans += 1;
                }

                let mut roster: Vec<(String, EmployeeId, Vec<Elected>)> = Vec::new();
                for i in 0..self.config.employees_per_tenant {
                    let ext_id = format!("EMP{}{:03}", t + 1, i + 1);
                    let hire_date = self.config.first_period_start
                        - Days::days(365 + people.below(4 * 365) as i64);
                    let employee_id = store.insert_employee(&EmployeeRow {
                        id: None,
                        tenant_id: tenant_id.clone(),
                        employee_ext_id: ext_id.clone(),
                        first_name: people.pick(FIRST_NAMES).copied().unwrap_or("Alex").into(),
                        last_name: people.pick(LAST_NAMES).copied().unwrap_or("Doe").into(),
                        hire_date,
                        is_active: true,
                    })?;
                    report.employees += 1;

                    let mut elected = Vec::new();
                    for (slot, (category, _)) in CATALOG.iter().enumerate() {
                        let takes = *category == CoverageCategory::Medical
                            || elections.chance(self.config.election_rate);
                        if !takes {
                            continue;
                        }
                        let pct = (elections.uniform(1.0, 8.0) * 100.0).round() / 100.0;
                        store.insert_enrollment(&EnrollmentRecord {
                            id: None,
                            tenant_id: tenant_id.clone(),
                            employee_id,
                            plan_id: plan_ids[slot],
                            category: *category,
                            contribution_pct: pct,
                            contribution_amount: None,
                            effective_from: hire_date,
                            effective_to: None,
                            is_active: true,
                        })?;
                        report.enrollments += 1;
                        elected.push(Elected {
                            category: *category,
                            pct,
                        });
                    }
                    roster.push((ext_id, employee_id, elected));
                }

                for b in 0..self.config.batches_per_tenant {
                    let period_start = self.config.first_period_start + Days::days(14 * b as i64);
                    let period_end = period_start + Days::days(13);
                    let batch_id = store.insert_batch(&PayrollBatchRow {
                        id: None,
                        tenant_id: tenant_id.clone(),
                        period_start,
                        period_end,
                        source: "synthetic".into(),
                        uploaded_by: "seed".into(),
                        status: "uploaded".into(),
                    })?;
                    report.batches.push((tenant_id.clone(), batch_id));

                    for (ext_id, _, elected) in &roster {
                        let gross = payroll.uniform(1500.0, 6000.0);
                        let line = |code: &str, pct: f64, faults: &mut StreamRng| {
                            let blank = faults.chance(self.config.blank_id_rate);
                            store.insert_deduction_line(&DeductionLine {
                                id: None,
                                tenant_id: tenant_id.clone(),
                                batch_id,
                                employee_ext_id: if blank { None } else { Some(ext_id.clone()) },
                                employee_id: None,
                                code: code.to_string(),
                                amount: (gross * pct).round() / 100.0,
                                contribution_pct: pct,
                                period_start,
                                period_end,
                            })
                        };

                        for e in elected {
                            let code = code_for(e.category);
                            let pct = if faults.chance(self.config.mismatch_rate) {
                                ((e.pct + faults.uniform(0.5, 2.0)) * 100.0).round() / 100.0
                            } else {
                                e.pct
                            };
                            line(code, pct, &mut faults)?;
                            report.lines += 1;
                        }
                        if faults.chance(self.config.missing_coverage_rate) {
                            let unelected: Vec<CoverageCategory> = CATALOG
                                .iter()
                                .map(|(c, _)| *c)
                                .filter(|c| elected.iter().all(|e| e.category != *c))
                                .collect();
                            if let Some(category) = faults.pick(&unelected).copied() {
                                let pct = (faults.uniform(1.0, 5.0) * 100.0).round() / 100.0;
                                line(code_for(category), pct, &mut faults)?;
                                report.lines += 1;
                            }
                        }
                        if faults.chance(self.config.unknown_code_rate) {
                            let code = faults.pick(UNKNOWN_CODES).copied().unwrap_or("MISC");
                            let pct = (faults.uniform(0.5, 3.0) * 100.0).round() / 100.0;
                            line(code, pct, &mut faults)?;
                            report.lines += 1;
                        }
                    }
                }
            }
            Ok(report)
        })?;

        info!(
            "seed {}: {} employees, {} enrollments, {} lines across {} batches",
            self.seed,
            report.employees,
            report.enrollments,
            report.lines,
            report.batches.len()
        );
        Ok(report)
    }
}

fn code_for(category: CoverageCategory) -> &'static str {
    CATALOG
        .iter()
        .find(|(c, _)| *c == category)
        .map_or("MISC", |(_, code)| code)
}
