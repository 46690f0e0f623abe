use crate::errors::AppError;
use crate::models::{Principal, RedeemCode};
use crate::storage::{NewAuditEntry, RedeemOutcome, Storage};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Credits a principal can actually spend right now. A balance past its
/// expiry date counts as zero without being rewritten in storage.
pub fn spendable(principal: &Principal) -> i64 {
    match principal.credits_expire_at {
        Some(expires_at) if expires_at <= Utc::now() => 0,
        _ => principal.credits,
    }
}

/// Credit accounting: charges, admin grants and redeem codes.
///
/// Every balance move is server-side arithmetic in storage, never a
/// read-modify-write here, so concurrent requests cannot double-spend.
pub struct CreditLedger {
    storage: Arc<dyn Storage>,
}

impl CreditLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Debits the lookup cost and records the audit entry in one atomic
    /// step. Returns the balance after the charge.
    pub async fn charge(
        &self,
        principal_id: &str,
        cost: i64,
        entry: NewAuditEntry,
    ) -> Result<i64, AppError> {
        let balance = self
            .storage
            .charge_and_record(principal_id, cost, entry)
            .await?;
        tracing::info!(
            "Charged {} credit(s) to {}, balance now {}",
            cost,
            principal_id,
            balance
        );
        Ok(balance)
    }

    pub async fn set_balance(&self, principal_id: &str, credits: i64) -> Result<Principal, AppError> {
        let principal = self.storage.set_credits(principal_id, credits).await?;
        tracing::info!("Set balance of {} to {}", principal_id, credits);
        Ok(principal)
    }

    /// Grants the same amount to every principal. Returns how many were
    /// credited.
    pub async fn grant_all(&self, amount: i64) -> Result<u64, AppError> {
        let count = self.storage.grant_credits_all(amount).await?;
        tracing::info!("Granted {} credit(s) to {} principal(s)", amount, count);
        Ok(count)
    }

    /// Mints a single-use redeem code worth the given amount.
    pub async fn generate_code(&self, credits: i64) -> Result<RedeemCode, AppError> {
        let code = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        let record = self.storage.create_redeem_code(&code, credits).await?;
        tracing::info!("Generated redeem code worth {} credit(s)", credits);
        Ok(record)
    }

    /// Claims a code for a principal. The claim and the grant are one
    /// atomic operation, so a code can never pay out twice.
    pub async fn redeem(
        &self,
        code: &str,
        principal_id: &str,
    ) -> Result<RedeemOutcome, AppError> {
        match self.storage.claim_redeem_code(code, principal_id).await? {
            Some(outcome) => {
                tracing::info!(
                    "Principal {} redeemed {} credit(s)",
                    principal_id,
                    outcome.granted
                );
                Ok(outcome)
            }
            None => Err(AppError::BadRequest(
                "Invalid or already used code".to_string(),
            )),
        }
    }
}
