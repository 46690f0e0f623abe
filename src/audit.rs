use crate::errors::AppError;
use crate::models::AuditEntry;
use crate::storage::{NewAuditEntry, Storage};
use std::sync::Arc;

/// Append-only record of terminal lookup outcomes.
///
/// Every lookup that reaches a terminal state leaves exactly one entry
/// here, except cache hits, which cost nothing and are not recorded.
/// The success-path entry is written inside the charge transaction by
/// the ledger; this type handles the failure paths and reads.
pub struct AuditLog {
    storage: Arc<dyn Storage>,
}

impl AuditLog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Appends a failure-path entry. Write errors are logged and
    /// swallowed: an audit failure must not replace the response it
    /// describes.
    pub async fn record(&self, entry: NewAuditEntry) {
        let status = entry.status;
        if let Err(e) = self.storage.append_audit(entry).await {
            tracing::error!("Failed to record {} audit entry: {}", status, e);
        }
    }

    /// Newest-first page of a principal's lookup history.
    pub async fn history(
        &self,
        principal_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, AppError> {
        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        self.storage
            .audit_history(principal_id, limit as i64, offset)
            .await
    }
}
