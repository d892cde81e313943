//! Shared primitive types used across reconciliation and querying.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tenant identifier. Every tenant-owned row carries one.
pub type TenantId = String;

/// Primary key of a `payroll_batch` row.
pub type BatchId = i64;

/// Primary key of a `reconciliation_run` row.
pub type RunId = i64;

/// Internal employee key (`employee.id`).
pub type EmployeeId = i64;

/// Outcome of comparing one deduction line against enrollment data.
///
/// Closed set. Declaration order is the tie-break order used by
/// the stats histogram, so never reorder variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Ok,
    MismatchPct,
    MissingCoverage,
    ExtraDeduction,
}

impl IssueKind {
    pub const ALL: [IssueKind; 4] = [
        IssueKind::Ok,
        IssueKind::MismatchPct,
        IssueKind::MissingCoverage,
        IssueKind::ExtraDeduction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IssueKind::Ok => "ok",
            IssueKind::MismatchPct => "mismatch_pct",
            IssueKind::MissingCoverage => "missing_coverage",
            IssueKind::ExtraDeduction => "extra_deduction",
        }
    }

    /// Everything except `ok` is a discrepancy that needs action.
    pub fn is_discrepancy(self) -> bool {
        self != IssueKind::Ok
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(IssueKind::Ok),
            "mismatch_pct" => Ok(IssueKind::MismatchPct),
            "missing_coverage" => Ok(IssueKind::MissingCoverage),
            "extra_deduction" => Ok(IssueKind::ExtraDeduction),
            other => Err(format!("unknown issue kind '{other}'")),
        }
    }
}

/// Normalized benefit type derived from a deduction code or a plan type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageCategory {
    Medical,
    Dental,
    Vision,
    Life,
    Disability,
    Fsa,
    Hsa,
    Retirement,
}

impl CoverageCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            CoverageCategory::Medical => "medical",
            CoverageCategory::Dental => "dental",
            CoverageCategory::Vision => "vision",
            CoverageCategory::Life => "life",
            CoverageCategory::Disability => "disability",
            CoverageCategory::Fsa => "fsa",
            CoverageCategory::Hsa => "hsa",
            CoverageCategory::Retirement => "retirement",
        }
    }
}

impl fmt::Display for CoverageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoverageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "medical" => Ok(CoverageCategory::Medical),
            "dental" => Ok(CoverageCategory::Dental),
            "vision" => Ok(CoverageCategory::Vision),
            "life" => Ok(CoverageCategory::Life),
            "disability" => Ok(CoverageCategory::Disability),
            "fsa" => Ok(CoverageCategory::Fsa),
            "hsa" => Ok(CoverageCategory::Hsa),
            "retirement" => Ok(CoverageCategory::Retirement),
            other => Err(format!("unknown coverage category '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_issue_kind_text_is_rejected() {
        assert!("mismatch".parse::<IssueKind>().is_err());
        assert!("OK".parse::<IssueKind>().is_err());
    }

    #[test]
    fn issue_kind_order_is_declaration_order() {
        let mut kinds = vec![
            IssueKind::ExtraDeduction,
            IssueKind::Ok,
            IssueKind::MissingCoverage,
            IssueKind::MismatchPct,
        ];
        kinds.sort();
        assert_eq!(kinds, IssueKind::ALL.to_vec());
    }
}
