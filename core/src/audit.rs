//! Explicit audit trail.
//!
//! Callers build an `AuditRecord` after a mutation has succeeded and hand it
//! to `record`. Nothing is inferred from call arguments.

use crate::{
    error::ReconResult,
    store::{AuditFilter, AuditLogRow, Page, ReconStore},
};
use log::debug;

pub use crate::store::AuditRecord;

pub mod action {
    pub const CREATE: &str = "create";
    pub const APPROVE: &str = "approve";
    pub const SEED: &str = "seed";
}

impl AuditRecord {
    pub fn new(
        tenant_id: impl Into<String>,
        actor: impl Into<String>,
        action: &str,
        entity: &str,
        entity_id: i64,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor: actor.into(),
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id,
            before: None,
            after: None,
        }
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = Some(after);
        self
    }
}

pub fn record(store: &ReconStore, entry: &AuditRecord) -> ReconResult<i64> {
    let id = store.insert_audit(entry)?;
    debug!(
        "audit {id}: {} {} {} {}#{}",
        entry.tenant_id, entry.actor, entry.action, entry.entity, entry.entity_id
    );
    Ok(id)
}

pub fn list(
    store: &ReconStore,
    tenant_id: &str,
    filter: &AuditFilter,
    page: Page,
) -> ReconResult<Vec<AuditLogRow>> {
    store.list_audit(tenant_id, filter, page)
}
