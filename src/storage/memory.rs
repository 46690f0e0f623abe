use super::{NewAuditEntry, PrincipalUpsert, RedeemOutcome, Storage};
use crate::errors::AppError;
use crate::models::{
    AppSettings, AuditEntry, CacheRecord, Principal, ProtectionRecord, RedeemCode, Service,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory storage engine behind a single mutex.
///
/// Mirrors the PostgreSQL semantics closely enough to back the full
/// pipeline in tests and local development without a database. Every
/// operation takes the lock once, so multi-step operations like
/// charge-and-record are atomic here too.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    principals: HashMap<String, Principal>,
    audit: Vec<AuditEntry>,
    next_audit_id: i64,
    protections: HashMap<String, ProtectionRecord>,
    codes: HashMap<String, RedeemCode>,
    next_code_id: i64,
    cache: HashMap<(String, String), CacheRecord>,
    settings: Option<AppSettings>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directly sets a principal's credit expiry. There is no HTTP surface
    /// for this; expiry is driven by external ops tooling in production.
    pub fn set_credit_expiry(&self, id: &str, expires_at: Option<DateTime<Utc>>) {
        let mut state = self.state.lock();
        if let Some(principal) = state.principals.get_mut(id) {
            principal.credits_expire_at = expires_at;
        }
    }
}

fn push_audit(state: &mut MemoryState, entry: NewAuditEntry) {
    state.next_audit_id += 1;
    let record = AuditEntry {
        id: state.next_audit_id,
        principal_id: entry.principal_id,
        service: entry.service.as_str().to_string(),
        query: entry.query,
        status: entry.status.as_str().to_string(),
        result: entry.result,
        created_at: Utc::now(),
    };
    state.audit.push(record);
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_principal(&self, id: &str) -> Result<Option<Principal>, AppError> {
        Ok(self.state.lock().principals.get(id).cloned())
    }

    async fn upsert_principal(&self, upsert: PrincipalUpsert) -> Result<Principal, AppError> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let principal = match state.principals.get_mut(&upsert.id) {
            Some(existing) => {
                if let Some(email) = upsert.email {
                    existing.email = Some(email);
                }
                if let Some(username) = upsert.username {
                    existing.username = Some(username);
                }
                if let Some(origin) = upsert.origin {
                    existing.last_origin = Some(origin);
                }
                existing.terms_accepted = existing.terms_accepted || upsert.terms_accepted;
                existing.privacy_accepted = existing.privacy_accepted || upsert.privacy_accepted;
                existing.updated_at = Some(now);
                existing.clone()
            }
            None => {
                let fresh = Principal {
                    id: upsert.id.clone(),
                    email: upsert.email,
                    username: upsert.username,
                    credits: upsert.signup_credits,
                    is_blocked: false,
                    is_origin_blocked: false,
                    last_origin: upsert.origin,
                    credits_expire_at: None,
                    terms_accepted: upsert.terms_accepted,
                    privacy_accepted: upsert.privacy_accepted,
                    created_at: now,
                    updated_at: Some(now),
                };
                state.principals.insert(upsert.id, fresh.clone());
                fresh
            }
        };
        Ok(principal)
    }

    async fn list_principals(&self) -> Result<Vec<Principal>, AppError> {
        let state = self.state.lock();
        let mut all: Vec<Principal> = state.principals.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn set_credits(&self, id: &str, credits: i64) -> Result<Principal, AppError> {
        let mut state = self.state.lock();
        let principal = state
            .principals
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))?;
        principal.credits = credits;
        principal.updated_at = Some(Utc::now());
        Ok(principal.clone())
    }

    async fn set_blocked(
        &self,
        id: &str,
        blocked: bool,
        origin_blocked: Option<bool>,
    ) -> Result<Principal, AppError> {
        let mut state = self.state.lock();
        let principal = state
            .principals
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))?;
        principal.is_blocked = blocked;
        if let Some(flag) = origin_blocked {
            principal.is_origin_blocked = flag;
        }
        principal.updated_at = Some(Utc::now());
        Ok(principal.clone())
    }

    async fn debit_credits(&self, id: &str, amount: i64) -> Result<i64, AppError> {
        let mut state = self.state.lock();
        let principal = state
            .principals
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))?;
        principal.credits -= amount;
        principal.updated_at = Some(Utc::now());
        Ok(principal.credits)
    }

    async fn grant_credits(&self, id: &str, amount: i64) -> Result<i64, AppError> {
        let mut state = self.state.lock();
        let principal = state
            .principals
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))?;
        principal.credits += amount;
        principal.updated_at = Some(Utc::now());
        Ok(principal.credits)
    }

    async fn grant_credits_all(&self, amount: i64) -> Result<u64, AppError> {
        let mut state = self.state.lock();
        let count = state.principals.len() as u64;
        for principal in state.principals.values_mut() {
            principal.credits += amount;
            principal.updated_at = Some(Utc::now());
        }
        Ok(count)
    }

    async fn charge_and_record(
        &self,
        id: &str,
        amount: i64,
        entry: NewAuditEntry,
    ) -> Result<i64, AppError> {
        let mut state = self.state.lock();
        let balance = {
            let principal = state
                .principals
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))?;
            principal.credits -= amount;
            principal.updated_at = Some(Utc::now());
            principal.credits
        };
        push_audit(&mut state, entry);
        Ok(balance)
    }

    async fn create_redeem_code(&self, code: &str, credits: i64) -> Result<RedeemCode, AppError> {
        let mut state = self.state.lock();
        state.next_code_id += 1;
        let record = RedeemCode {
            id: state.next_code_id,
            code: code.to_string(),
            credits,
            is_used: false,
            used_by: None,
            used_at: None,
            created_at: Utc::now(),
        };
        state.codes.insert(code.to_string(), record.clone());
        Ok(record)
    }

    async fn claim_redeem_code(
        &self,
        code: &str,
        principal_id: &str,
    ) -> Result<Option<RedeemOutcome>, AppError> {
        let mut state = self.state.lock();
        let granted = match state.codes.get_mut(code) {
            Some(record) if !record.is_used => {
                record.is_used = true;
                record.used_by = Some(principal_id.to_string());
                record.used_at = Some(Utc::now());
                record.credits
            }
            _ => return Ok(None),
        };
        let principal = state
            .principals
            .get_mut(principal_id)
            .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))?;
        principal.credits += granted;
        principal.updated_at = Some(Utc::now());
        Ok(Some(RedeemOutcome {
            granted,
            balance: principal.credits,
        }))
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<(), AppError> {
        let mut state = self.state.lock();
        push_audit(&mut state, entry);
        Ok(())
    }

    async fn audit_history(
        &self,
        principal_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, AppError> {
        let state = self.state.lock();
        let entries = state
            .audit
            .iter()
            .rev()
            .filter(|e| e.principal_id == principal_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(entries)
    }

    async fn get_protection(&self, query: &str) -> Result<Option<ProtectionRecord>, AppError> {
        Ok(self.state.lock().protections.get(query).cloned())
    }

    async fn add_protection(&self, query: &str, reason: Option<&str>) -> Result<(), AppError> {
        let mut state = self.state.lock();
        state.protections.insert(
            query.to_string(),
            ProtectionRecord {
                query: query.to_string(),
                reason: reason.map(|r| r.to_string()),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn remove_protection(&self, query: &str) -> Result<(), AppError> {
        self.state.lock().protections.remove(query);
        Ok(())
    }

    async fn list_protections(&self) -> Result<Vec<ProtectionRecord>, AppError> {
        let state = self.state.lock();
        let mut all: Vec<ProtectionRecord> = state.protections.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn cache_get(
        &self,
        service: Service,
        query: &str,
    ) -> Result<Option<CacheRecord>, AppError> {
        let key = (service.as_str().to_string(), query.to_string());
        Ok(self.state.lock().cache.get(&key).cloned())
    }

    async fn cache_put(&self, record: CacheRecord) -> Result<(), AppError> {
        let key = (record.service.clone(), record.query.clone());
        self.state.lock().cache.insert(key, record);
        Ok(())
    }

    async fn cache_delete(&self, service: Service, query: &str) -> Result<(), AppError> {
        let key = (service.as_str().to_string(), query.to_string());
        self.state.lock().cache.remove(&key);
        Ok(())
    }

    async fn get_settings(&self) -> Result<AppSettings, AppError> {
        let mut state = self.state.lock();
        Ok(state
            .settings
            .get_or_insert_with(AppSettings::default)
            .clone())
    }

    async fn update_settings(&self, settings: AppSettings) -> Result<AppSettings, AppError> {
        self.state.lock().settings = Some(settings.clone());
        Ok(settings)
    }
}
