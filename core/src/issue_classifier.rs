//! Classify one deduction line against the enrollment index.
//!
//! Decision order, first match wins:
//!   1. no employee identity on the line        → extra_deduction
//!   2. code maps to no coverage category       → extra_deduction
//!   3. no enrollment for (employee, category)  → missing_coverage
//!   4. |expected − actual| < PCT_TOLERANCE     → ok
//!   5. otherwise                               → mismatch_pct
//!
//! The amount always passes through unchanged.

use crate::{
    enrollment_index::EnrollmentIndex,
    store::DeductionLine,
    types::IssueKind,
};
use serde::{Deserialize, Serialize};

/// Absorbs floating rounding between payroll and enrollment percentages.
pub const PCT_TOLERANCE: f64 = 1e-3;

/// Reported external id for lines that carry none.
pub const UNKNOWN_EMPLOYEE: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub employee_ext_id: String,
    pub issue_kind: IssueKind,
    pub expected_pct: Option<f64>,
    pub actual_pct: Option<f64>,
    pub amount: Option<f64>,
    pub detail: String,
}

pub fn classify(line: &DeductionLine, index: &EnrollmentIndex) -> Classification {
    let actual = Some(line.contribution_pct);
    let amount = Some(line.amount);
    let outcome = |ext: &str, kind: IssueKind, expected: Option<f64>, detail: String| Classification {
        employee_ext_id: ext.to_string(),
        issue_kind: kind,
        expected_pct: expected,
        actual_pct: actual,
        amount,
        detail,
    };

    let ext_id = match line.employee_ext_id.as_deref().map(str::trim) {
        Some(ext) if !ext.is_empty() => ext,
        _ => {
            return outcome(
                UNKNOWN_EMPLOYEE,
                IssueKind::ExtraDeduction,
                None,
                format!("line carries no employee identifier (code {})", line.code),
            )
        }
    };

    let Some(category) = index.category_for(&line.code) else {
        return outcome(
            ext_id,
            IssueKind::ExtraDeduction,
            None,
            format!("deduction code '{}' maps to no coverage category", line.code),
        );
    };

    let employee = line.employee_id.or_else(|| index.resolve_employee(ext_id));
    let Some(enrollment) = employee.and_then(|emp| index.lookup(emp, category)) else {
        return outcome(
            ext_id,
            IssueKind::MissingCoverage,
            None,
            format!("no active {category} enrollment for employee {ext_id}"),
        );
    };

    let expected = enrollment.contribution_pct;
    if (expected - line.contribution_pct).abs() < PCT_TOLERANCE {
        outcome(
            ext_id,
            IssueKind::Ok,
            Some(expected),
            format!("{category} deduction matches enrollment"),
        )
    } else {
        outcome(
            ext_id,
            IssueKind::MismatchPct,
            Some(expected),
            format!(
                "{category} enrollment expects {expected}% but payroll withheld {}%",
                line.contribution_pct
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        enrollment_index::{ActiveAsOf, CodeCategoryMap},
        store::EnrollmentRecord,
        types::CoverageCategory,
    };
    use std::collections::HashMap;

    fn index() -> EnrollmentIndex {
        let codes = CodeCategoryMap::new(&AppConfig::default_test().reconciliation.code_markers);
        let enrollment = EnrollmentRecord {
            id: Some(1),
            tenant_id: "t1".into(),
            employee_id: 10,
            plan_id: 1,
            category: CoverageCategory::Medical,
            contribution_pct: 3.0,
            contribution_amount: None,
            effective_from: "2024-01-01".parse().unwrap(),
            effective_to: None,
            is_active: true,
        };
        let directory = HashMap::from([("E010".to_string(), 10), ("E011".to_string(), 11)]);
        EnrollmentIndex::from_parts(vec![enrollment], directory, ActiveAsOf::CurrentlyActive, codes)
    }

    fn line(ext: Option<&str>, code: &str, pct: f64) -> DeductionLine {
        DeductionLine {
            id: None,
            tenant_id: "t1".into(),
            batch_id: 1,
            employee_ext_id: ext.map(Into::into),
            employee_id: None,
            code: code.into(),
            amount: -42.5,
            contribution_pct: pct,
            period_start: "2024-06-01".parse().unwrap(),
            period_end: "2024-06-15".parse().unwrap(),
        }
    }

    #[test]
    fn blank_identity_wins_over_unknown_code() {
        for ext in [None, Some(""), Some("   ")] {
            let c = classify(&line(ext, "UNKNOWN_CODE", 3.0), &index());
            assert_eq!(c.issue_kind, IssueKind::ExtraDeduction);
            assert_eq!(c.employee_ext_id, UNKNOWN_EMPLOYEE);
            assert_eq!(c.expected_pct, None);
            assert_eq!(c.actual_pct, Some(3.0));
        }
    }

    #[test]
    fn unknown_code_is_extra_deduction() {
        let c = classify(&line(Some("E010"), "PARKING", 3.0), &index());
        assert_eq!(c.issue_kind, IssueKind::ExtraDeduction);
        assert_eq!(c.employee_ext_id, "E010");
    }

    #[test]
    fn no_enrollment_is_missing_coverage() {
        let idx = index();
        assert_eq!(classify(&line(Some("E011"), "MED_PRETAX", 3.0), &idx).issue_kind, IssueKind::MissingCoverage);
        assert_eq!(classify(&line(Some("E010"), "DEN_PRETAX", 3.0), &idx).issue_kind, IssueKind::MissingCoverage);
        assert_eq!(classify(&line(Some("E999"), "MED_PRETAX", 3.0), &idx).issue_kind, IssueKind::MissingCoverage);
    }

    #[test]
    fn tolerance_boundary() {
        let idx = index();
        let within = classify(&line(Some("E010"), "MED_PRETAX", 3.0009), &idx);
        assert_eq!(within.issue_kind, IssueKind::Ok);
        let outside = classify(&line(Some("E010"), "MED_PRETAX", 3.002), &idx);
        assert_eq!(outside.issue_kind, IssueKind::MismatchPct);
        assert_eq!(outside.expected_pct, Some(3.0));
        assert_eq!(outside.actual_pct, Some(3.002));
    }

    #[test]
    fn amount_passes_through_for_every_outcome() {
        let idx = index();
        for (ext, code) in [(None, "MED"), (Some("E010"), "X"), (Some("E011"), "MED"), (Some("E010"), "MED")] {
            assert_eq!(classify(&line(ext, code, 3.0), &idx).amount, Some(-42.5));
        }
    }

    #[test]
    fn internal_id_on_the_line_takes_precedence() {
        let mut l = line(Some("E011"), "MED_PRETAX", 3.0);
        l.employee_id = Some(10);
        assert_eq!(classify(&l, &index()).issue_kind, IssueKind::Ok);
    }
}
