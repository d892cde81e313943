//! Lookup of coverage by (employee, coverage category).
//!
//! Built once per reconciliation run, read-only afterwards. The index also
//! carries the deduction-code → category table and the external-id directory
//! so the classifier needs nothing else.

use crate::{
    config::CodeMarker,
    error::ReconResult,
    store::{EnrollmentRecord, ReconStore},
    types::{CoverageCategory, EmployeeId},
};
use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::HashMap;

/// Which enrollments count as "active" while building the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveAsOf {
    /// The enrollment's active flag, regardless of effective dates.
    CurrentlyActive,
    /// Active flag plus `effective_from <= d <= effective_to` (open-ended when `to` is null).
    Date(NaiveDate),
}

impl ActiveAsOf {
    fn admits(&self, e: &EnrollmentRecord) -> bool {
        match self {
            ActiveAsOf::CurrentlyActive => e.is_active,
            ActiveAsOf::Date(d) => {
                e.is_active && e.effective_from <= *d && e.effective_to.map_or(true, |to| *d <= to)
            }
        }
    }
}

/// Maps deduction codes to coverage categories by marker.
///
/// A code is split into alphanumeric tokens; a token matches a marker only
/// when it is the whole marker (case-insensitive), so `RETRO` is not `RET`.
/// Long forms such as `DENTAL` are markers of their own. Markers are tried in
/// table order and the first hit wins.
#[derive(Debug, Clone)]
pub struct CodeCategoryMap {
    markers: Vec<(String, CoverageCategory)>,
}

impl CodeCategoryMap {
    pub fn new(markers: &[CodeMarker]) -> Self {
        Self {
            markers: markers
                .iter()
                .map(|m| (m.marker.trim().to_ascii_uppercase(), m.category))
                .filter(|(marker, _)| !marker.is_empty())
                .collect(),
        }
    }

    pub fn category_for(&self, code: &str) -> Option<CoverageCategory> {
        let upper = code.to_ascii_uppercase();
        let tokens: Vec<&str> = upper
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        self.markers
            .iter()
            .find(|(marker, _)| tokens.iter().any(|t| *t == marker.as_str()))
            .map(|(_, category)| *category)
    }
}

pub struct EnrollmentIndex {
    by_key: HashMap<(EmployeeId, CoverageCategory), EnrollmentRecord>,
    directory: HashMap<String, EmployeeId>,
    codes: CodeCategoryMap,
}

impl EnrollmentIndex {
    pub fn build(
        store: &ReconStore,
        tenant_id: &str,
        as_of: ActiveAsOf,
        codes: &CodeCategoryMap,
    ) -> ReconResult<Self> {
        let enrollments = store.enrollments_for_tenant(tenant_id)?;
        let directory = store.employee_directory(tenant_id)?.into_iter().collect();
        let index = Self::from_parts(enrollments, directory, as_of, codes.clone());
        debug!(
            "tenant {tenant_id}: enrollment index holds {} entries ({:?})",
            index.by_key.len(),
            as_of
        );
        Ok(index)
    }

    /// Build from already-loaded rows. Rows of other tenants are the caller's concern.
    pub fn from_parts(
        enrollments: Vec<EnrollmentRecord>,
        directory: HashMap<String, EmployeeId>,
        as_of: ActiveAsOf,
        codes: CodeCategoryMap,
    ) -> Self {
        let mut by_key: HashMap<(EmployeeId, CoverageCategory), EnrollmentRecord> = HashMap::new();
        for e in enrollments.into_iter().filter(|e| as_of.admits(e)) {
            let key = (e.employee_id, e.category);
            match by_key.get(&key) {
                Some(existing) => {
                    warn!(
                        "employee {} holds overlapping {} enrollments; keeping the latest",
                        e.employee_id, e.category
                    );
                    if e.effective_from >= existing.effective_from {
                        by_key.insert(key, e);
                    }
                }
                None => {
                    by_key.insert(key, e);
                }
            }
        }
        Self {
            by_key,
            directory,
            codes,
        }
    }

    pub fn category_for(&self, code: &str) -> Option<CoverageCategory> {
        self.codes.category_for(code)
    }

    pub fn resolve_employee(&self, ext_id: &str) -> Option<EmployeeId> {
        self.directory.get(ext_id).copied()
    }

    pub fn lookup(&self, employee_id: EmployeeId, category: CoverageCategory) -> Option<&EnrollmentRecord> {
        self.by_key.get(&(employee_id, category))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
