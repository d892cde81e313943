use super::{AuditFilter, AuditLogRow, AuditRecord, Page, ReconStore};
use crate::error::ReconResult;
use rusqlite::params;

impl ReconStore {
    pub fn insert_audit(&self, r: &AuditRecord) -> ReconResult<i64> {
        let before = r.before.as_ref().map(serde_json::to_string).transpose()?;
        let after = r.after.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO audit_log (tenant_id, actor, action, entity, entity_id, before, after)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![r.tenant_id, r.actor, r.action, r.entity, r.entity_id, before, after],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Newest first. Every filter field is optional.
    pub fn list_audit(
        &self,
        tenant_id: &str,
        filter: &AuditFilter,
        page: Page,
    ) -> ReconResult<Vec<AuditLogRow>> {
        let (limit, offset) = page.limit_offset();
        let mut stmt = self.conn.prepare(
            "SELECT id, tenant_id, actor, action, entity, entity_id, before, after, at
             FROM audit_log
             WHERE tenant_id = ?1
               AND (?2 IS NULL OR entity = ?2)
               AND (?3 IS NULL OR entity_id = ?3)
               AND (?4 IS NULL OR action = ?4)
               AND (?5 IS NULL OR actor = ?5)
             ORDER BY at DESC, id DESC
             LIMIT ?6 OFFSET ?7",
        )?;
        let rows = stmt
            .query_map(
                params![
                    tenant_id,
                    filter.entity,
                    filter.entity_id,
                    filter.action,
                    filter.actor,
                    limit,
                    offset,
                ],
                |row| {
                    Ok(AuditLogRow {
                        id: row.get(0)?,
                        tenant_id: row.get(1)?,
                        actor: row.get(2)?,
                        action: row.get(3)?,
                        entity: row.get(4)?,
                        entity_id: row.get(5)?,
                        before: row.get(6)?,
                        after: row.get(7)?,
                        at: row.get(8)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
