//! Storage interface for the lookup pipeline.
//!
//! The pipeline only needs point reads/writes by key, atomic
//! increments/decrements, an append-only log, and a single-row claim, so
//! those operations are the whole interface. `PgStorage` is the production
//! engine; `MemoryStorage` backs tests and local development.

mod memory;
mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

use crate::errors::AppError;
use crate::models::{
    AppSettings, AuditEntry, AuditStatus, CacheRecord, Principal, ProtectionRecord, RedeemCode,
    Service,
};
use async_trait::async_trait;
use serde_json::Value;

/// Fields the authentication boundary supplies when it creates or refreshes
/// a principal.
#[derive(Debug, Clone)]
pub struct PrincipalUpsert {
    pub id: String,
    pub email: Option<String>,
    pub username: Option<String>,
    /// Balance granted when this upsert creates the principal; ignored on
    /// refresh.
    pub signup_credits: i64,
    /// Origin address of the authenticated request.
    pub origin: Option<String>,
    /// Consent flags from the verified token; sticky once true.
    pub terms_accepted: bool,
    pub privacy_accepted: bool,
}

/// An audit entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub principal_id: String,
    pub service: Service,
    /// Raw query as submitted, not the normalized form.
    pub query: String,
    pub status: AuditStatus,
    pub result: Option<Value>,
}

/// Outcome of a successful redeem-code claim.
#[derive(Debug, Clone, Copy)]
pub struct RedeemOutcome {
    /// Credits the code granted.
    pub granted: i64,
    /// Balance after the grant.
    pub balance: i64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    // ---- Principals ----

    async fn get_principal(&self, id: &str) -> Result<Option<Principal>, AppError>;

    /// Creates the principal on first authentication (with the signup grant)
    /// or refreshes origin/consent fields on subsequent ones.
    async fn upsert_principal(&self, upsert: PrincipalUpsert) -> Result<Principal, AppError>;

    async fn list_principals(&self) -> Result<Vec<Principal>, AppError>;

    async fn set_credits(&self, id: &str, credits: i64) -> Result<Principal, AppError>;

    /// Updates the account block flag; the origin block flag only when given.
    async fn set_blocked(
        &self,
        id: &str,
        blocked: bool,
        origin_blocked: Option<bool>,
    ) -> Result<Principal, AppError>;

    // ---- Ledger ----

    /// Atomic decrement executed storage-side; returns the updated balance.
    async fn debit_credits(&self, id: &str, amount: i64) -> Result<i64, AppError>;

    /// Atomic increment; returns the updated balance.
    async fn grant_credits(&self, id: &str, amount: i64) -> Result<i64, AppError>;

    /// Atomic increment for every principal; returns how many were credited.
    async fn grant_credits_all(&self, amount: i64) -> Result<u64, AppError>;

    /// Debits `amount` and appends the success audit entry in one
    /// transaction, so a charge can never exist without its record. Returns
    /// the updated balance.
    async fn charge_and_record(
        &self,
        id: &str,
        amount: i64,
        entry: NewAuditEntry,
    ) -> Result<i64, AppError>;

    // ---- Redeem codes ----

    async fn create_redeem_code(&self, code: &str, credits: i64) -> Result<RedeemCode, AppError>;

    /// Claims the code and credits the principal in one transaction. Returns
    /// None when the code is unknown or already used; at most one concurrent
    /// claim can succeed.
    async fn claim_redeem_code(
        &self,
        code: &str,
        principal_id: &str,
    ) -> Result<Option<RedeemOutcome>, AppError>;

    // ---- Audit log ----

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<(), AppError>;

    /// Entries for one principal, newest first.
    async fn audit_history(
        &self,
        principal_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, AppError>;

    // ---- Protection records ----

    async fn get_protection(&self, query: &str) -> Result<Option<ProtectionRecord>, AppError>;

    async fn add_protection(&self, query: &str, reason: Option<&str>) -> Result<(), AppError>;

    async fn remove_protection(&self, query: &str) -> Result<(), AppError>;

    async fn list_protections(&self) -> Result<Vec<ProtectionRecord>, AppError>;

    // ---- Result cache (persistent tier) ----

    async fn cache_get(&self, service: Service, query: &str)
        -> Result<Option<CacheRecord>, AppError>;

    async fn cache_put(&self, record: CacheRecord) -> Result<(), AppError>;

    async fn cache_delete(&self, service: Service, query: &str) -> Result<(), AppError>;

    // ---- Settings ----

    /// Current settings; a missing row yields (and persists) the defaults.
    async fn get_settings(&self) -> Result<AppSettings, AppError>;

    async fn update_settings(&self, settings: AppSettings) -> Result<AppSettings, AppError>;
}
