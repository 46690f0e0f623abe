use crate::errors::AppError;
use crate::models::Principal;
use crate::storage::Storage;
use std::sync::Arc;

/// Reason text attached to a protected record that was stored without one.
pub const DEFAULT_PROTECTION_REASON: &str = "Protected record";

/// Outcome of the access gate for a single lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Allowed,
    Denied {
        message: String,
        reason: Option<String>,
    },
}

impl AccessDecision {
    pub fn is_denied(&self) -> bool {
        matches!(self, AccessDecision::Denied { .. })
    }
}

/// Gate evaluated before anything else in the lookup pipeline.
///
/// Checks run in a fixed order: account block, origin block, then record
/// protection. A denial here means no cache read, no upstream call and no
/// charge ever happens for the request.
pub struct AccessGate {
    storage: Arc<dyn Storage>,
}

impl AccessGate {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn evaluate(
        &self,
        principal: &Principal,
        normalized_query: &str,
    ) -> Result<AccessDecision, AppError> {
        if principal.is_blocked {
            tracing::warn!("Denied lookup for blocked account {}", principal.id);
            return Ok(AccessDecision::Denied {
                message: "Your account is restricted. Contact support to resolve.".to_string(),
                reason: None,
            });
        }

        if principal.is_origin_blocked {
            tracing::warn!("Denied lookup for blocked origin, account {}", principal.id);
            return Ok(AccessDecision::Denied {
                message: "Access from your network is restricted. Contact support to resolve."
                    .to_string(),
                reason: None,
            });
        }

        if let Some(protection) = self.storage.get_protection(normalized_query).await? {
            let reason = protection
                .reason
                .unwrap_or_else(|| DEFAULT_PROTECTION_REASON.to_string());
            tracing::warn!("Denied lookup for protected record: {}", normalized_query);
            return Ok(AccessDecision::Denied {
                message: "This record is restricted from lookup.".to_string(),
                reason: Some(reason),
            });
        }

        Ok(AccessDecision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, PrincipalUpsert};

    async fn seeded_principal(storage: &MemoryStorage, id: &str) -> Principal {
        storage
            .upsert_principal(PrincipalUpsert {
                id: id.to_string(),
                email: None,
                username: None,
                signup_credits: 10,
                origin: None,
                terms_accepted: true,
                privacy_accepted: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn account_block_takes_precedence_over_protection() {
        let storage = Arc::new(MemoryStorage::new());
        let mut principal = seeded_principal(&storage, "u1").await;
        principal.is_blocked = true;
        storage.add_protection("9876543210", Some("vip")).await.unwrap();

        let gate = AccessGate::new(storage);
        let decision = gate.evaluate(&principal, "9876543210").await.unwrap();
        match decision {
            AccessDecision::Denied { message, reason } => {
                assert!(message.contains("account"));
                assert_eq!(reason, None);
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn protection_without_reason_uses_default() {
        let storage = Arc::new(MemoryStorage::new());
        let principal = seeded_principal(&storage, "u2").await;
        storage.add_protection("9876543210", None).await.unwrap();

        let gate = AccessGate::new(storage);
        let decision = gate.evaluate(&principal, "9876543210").await.unwrap();
        match decision {
            AccessDecision::Denied { reason, .. } => {
                assert_eq!(reason.as_deref(), Some(DEFAULT_PROTECTION_REASON));
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn clean_principal_and_query_pass() {
        let storage = Arc::new(MemoryStorage::new());
        let principal = seeded_principal(&storage, "u3").await;

        let gate = AccessGate::new(storage);
        let decision = gate.evaluate(&principal, "9876543210").await.unwrap();
        assert_eq!(decision, AccessDecision::Allowed);
    }
}
