use crate::access::{AccessDecision, AccessGate};
use crate::audit::AuditLog;
use crate::cache::ResultCache;
use crate::errors::AppError;
use crate::ledger::{self, CreditLedger};
use crate::models::{AuditStatus, LookupResponse, Service, ServicePayload};
use crate::providers::ProviderDispatch;
use crate::retry::{call_with_retry, RetryPolicy, UpstreamError};
use crate::storage::{NewAuditEntry, Storage};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// The gated lookup pipeline.
///
/// Stages run in a fixed order: access gate, cache, credit check,
/// upstream call, then charge-and-record. The order is load-bearing:
/// protected or blocked requests must not reveal whether a result is
/// cached, cache hits must not charge, and the charge must only happen
/// once a chargeable result is in hand. Every terminal outcome except a
/// cache hit leaves one audit entry.
pub struct LookupPipeline {
    storage: Arc<dyn Storage>,
    gate: AccessGate,
    cache: ResultCache,
    ledger: Arc<CreditLedger>,
    audit: Arc<AuditLog>,
    providers: Arc<dyn ProviderDispatch>,
    retry: RetryPolicy,
    deadline: Duration,
}

impl LookupPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        providers: Arc<dyn ProviderDispatch>,
        cache: ResultCache,
        ledger: Arc<CreditLedger>,
        audit: Arc<AuditLog>,
        retry: RetryPolicy,
        deadline: Duration,
    ) -> Self {
        let gate = AccessGate::new(storage.clone());
        Self {
            storage,
            gate,
            cache,
            ledger,
            audit,
            providers,
            retry,
            deadline,
        }
    }

    /// Runs one lookup to a terminal outcome.
    ///
    /// `raw_query` is what the client sent; it is normalized here for
    /// cache keys and protection checks but audited verbatim.
    pub async fn execute(
        &self,
        principal_id: &str,
        service: Service,
        raw_query: &str,
    ) -> Result<LookupResponse, AppError> {
        let query = service.normalize(raw_query);
        tracing::info!(
            "Lookup request: service={}, principal={}",
            service,
            principal_id
        );

        let principal = self
            .storage
            .get_principal(principal_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

        // Gate before cache: a protected record must not be served even
        // when a cached copy exists.
        if let AccessDecision::Denied { message, reason } =
            self.gate.evaluate(&principal, &query).await?
        {
            self.record_outcome(
                &principal.id,
                service,
                raw_query,
                AuditStatus::Denied,
                json!({ "message": message, "reason": reason }),
            )
            .await;
            return Err(AppError::Denied { message, reason });
        }

        if let Some(payload) = self.cache.get(service, &query).await? {
            tracing::info!("Cache hit for {}:{}, no charge", service, query);
            return Ok(LookupResponse {
                success: true,
                data: payload,
                credits_remaining: principal.credits,
                cached: Some(true),
            });
        }

        // Settings are read fresh so cost changes apply to the very next
        // request.
        let settings = self.storage.get_settings().await?;
        let cost = settings.cost_for(service);
        let available = ledger::spendable(&principal);
        if available < cost {
            self.record_outcome(
                &principal.id,
                service,
                raw_query,
                AuditStatus::FailedNoCredits,
                json!({ "required": cost, "available": available }),
            )
            .await;
            return Err(AppError::InsufficientCredits { credits: available });
        }

        let retried = call_with_retry(&self.retry, || self.providers.fetch(service, &query));
        let payload = match tokio::time::timeout(self.deadline, retried).await {
            Err(_) => {
                tracing::error!(
                    "Lookup deadline of {}s elapsed for {}:{}",
                    self.deadline.as_secs(),
                    service,
                    query
                );
                self.record_outcome(
                    &principal.id,
                    service,
                    raw_query,
                    AuditStatus::ProviderExhausted,
                    json!({ "error": format!("Deadline of {}s elapsed", self.deadline.as_secs()) }),
                )
                .await;
                return Err(AppError::DeadlineExceeded(self.deadline.as_secs()));
            }
            Ok(Err(UpstreamError::Absent(message))) => {
                self.record_outcome(
                    &principal.id,
                    service,
                    raw_query,
                    AuditStatus::NotFound,
                    json!({ "error": message }),
                )
                .await;
                return Err(AppError::ProviderAbsence(message));
            }
            Ok(Err(UpstreamError::Rejected(message))) => {
                self.record_outcome(
                    &principal.id,
                    service,
                    raw_query,
                    AuditStatus::ProviderError,
                    json!({ "error": message }),
                )
                .await;
                return Err(AppError::ProviderOther(message));
            }
            Ok(Err(UpstreamError::Exhausted {
                last_error,
                attempts,
            })) => {
                self.record_outcome(
                    &principal.id,
                    service,
                    raw_query,
                    AuditStatus::ProviderExhausted,
                    json!({ "error": last_error, "attempts": attempts }),
                )
                .await;
                return Err(AppError::ProviderExhausted {
                    message: last_error,
                    attempts,
                });
            }
            Ok(Ok(payload)) => payload,
        };

        match ServicePayload::parse(service, &payload) {
            Ok(parsed) => tracing::debug!("Upstream returned {}", parsed.summary()),
            Err(e) => tracing::warn!("Unmodeled {} payload shape: {}", service, e),
        }

        // Debit and the success audit entry commit together.
        let balance = self
            .ledger
            .charge(
                &principal.id,
                cost,
                NewAuditEntry {
                    principal_id: principal.id.clone(),
                    service,
                    query: raw_query.to_string(),
                    status: AuditStatus::Success,
                    result: Some(payload.clone()),
                },
            )
            .await?;

        // The response is already paid for; a cache write failure only
        // costs the next caller a fresh upstream call.
        if let Err(e) = self.cache.put(service, &query, &payload).await {
            tracing::error!("Failed to cache result for {}:{}: {}", service, query, e);
        }

        Ok(LookupResponse {
            success: true,
            data: payload,
            credits_remaining: balance,
            cached: None,
        })
    }

    async fn record_outcome(
        &self,
        principal_id: &str,
        service: Service,
        raw_query: &str,
        status: AuditStatus,
        detail: Value,
    ) {
        self.audit
            .record(NewAuditEntry {
                principal_id: principal_id.to_string(),
                service,
                query: raw_query.to_string(),
                status,
                result: Some(detail),
            })
            .await;
    }
}
