use super::{NewAuditEntry, PrincipalUpsert, RedeemOutcome, Storage};
use crate::errors::AppError;
use crate::models::{
    AppSettings, AuditEntry, CacheRecord, Principal, ProtectionRecord, RedeemCode, Service,
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

/// PostgreSQL storage engine.
///
/// Every balance mutation is a server-side arithmetic update; the
/// charge/record and redeem operations run in transactions.
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn get_principal(&self, id: &str) -> Result<Option<Principal>, AppError> {
        sqlx::query_as::<_, Principal>("SELECT * FROM principals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn upsert_principal(&self, upsert: PrincipalUpsert) -> Result<Principal, AppError> {
        sqlx::query_as::<_, Principal>(
            r#"
            INSERT INTO principals (id, email, username, credits, last_origin, terms_accepted, privacy_accepted)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET email = COALESCE(EXCLUDED.email, principals.email),
                username = COALESCE(EXCLUDED.username, principals.username),
                last_origin = COALESCE(EXCLUDED.last_origin, principals.last_origin),
                terms_accepted = principals.terms_accepted OR EXCLUDED.terms_accepted,
                privacy_accepted = principals.privacy_accepted OR EXCLUDED.privacy_accepted,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&upsert.id)
        .bind(&upsert.email)
        .bind(&upsert.username)
        .bind(upsert.signup_credits)
        .bind(&upsert.origin)
        .bind(upsert.terms_accepted)
        .bind(upsert.privacy_accepted)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)
    }

    async fn list_principals(&self) -> Result<Vec<Principal>, AppError> {
        sqlx::query_as::<_, Principal>("SELECT * FROM principals ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn set_credits(&self, id: &str, credits: i64) -> Result<Principal, AppError> {
        sqlx::query_as::<_, Principal>(
            "UPDATE principals SET credits = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(credits)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))
    }

    async fn set_blocked(
        &self,
        id: &str,
        blocked: bool,
        origin_blocked: Option<bool>,
    ) -> Result<Principal, AppError> {
        sqlx::query_as::<_, Principal>(
            r#"
            UPDATE principals
            SET is_blocked = $2,
                is_origin_blocked = COALESCE($3, is_origin_blocked),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(blocked)
        .bind(origin_blocked)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))
    }

    async fn debit_credits(&self, id: &str, amount: i64) -> Result<i64, AppError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE principals SET credits = credits - $2, updated_at = now() WHERE id = $1 RETURNING credits",
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        row.map(|(credits,)| credits)
            .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))
    }

    async fn grant_credits(&self, id: &str, amount: i64) -> Result<i64, AppError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE principals SET credits = credits + $2, updated_at = now() WHERE id = $1 RETURNING credits",
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        row.map(|(credits,)| credits)
            .ok_or_else(|| AppError::NotFound("Principal not found".to_string()))
    }

    async fn grant_credits_all(&self, amount: i64) -> Result<u64, AppError> {
        let result =
            sqlx::query("UPDATE principals SET credits = credits + $1, updated_at = now()")
                .bind(amount)
                .execute(&self.pool)
                .await
                .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    async fn charge_and_record(
        &self,
        id: &str,
        amount: i64,
        entry: NewAuditEntry,
    ) -> Result<i64, AppError> {
        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        let (balance,): (i64,) = sqlx::query_as(
            "UPDATE principals SET credits = credits - $2, updated_at = now() WHERE id = $1 RETURNING credits",
        )
        .bind(id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        sqlx::query(
            "INSERT INTO audit_log (principal_id, service, query, status, result) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&entry.principal_id)
        .bind(entry.service.as_str())
        .bind(&entry.query)
        .bind(entry.status.as_str())
        .bind(&entry.result)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;
        Ok(balance)
    }

    async fn create_redeem_code(&self, code: &str, credits: i64) -> Result<RedeemCode, AppError> {
        sqlx::query_as::<_, RedeemCode>(
            "INSERT INTO redeem_codes (code, credits) VALUES ($1, $2) RETURNING *",
        )
        .bind(code)
        .bind(credits)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)
    }

    async fn claim_redeem_code(
        &self,
        code: &str,
        principal_id: &str,
    ) -> Result<Option<RedeemOutcome>, AppError> {
        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        // The conditional UPDATE is the claim: a second concurrent redemption
        // matches zero rows once this one commits.
        let claimed: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE redeem_codes
            SET is_used = true, used_by = $2, used_at = now()
            WHERE code = $1 AND is_used = false
            RETURNING credits
            "#,
        )
        .bind(code)
        .bind(principal_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        let Some((granted,)) = claimed else {
            tx.rollback().await.map_err(AppError::Database)?;
            return Ok(None);
        };

        let (balance,): (i64,) = sqlx::query_as(
            "UPDATE principals SET credits = credits + $2, updated_at = now() WHERE id = $1 RETURNING credits",
        )
        .bind(principal_id)
        .bind(granted)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;
        Ok(Some(RedeemOutcome { granted, balance }))
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO audit_log (principal_id, service, query, status, result) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&entry.principal_id)
        .bind(entry.service.as_str())
        .bind(&entry.query)
        .bind(entry.status.as_str())
        .bind(&entry.result)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;
        Ok(())
    }

    async fn audit_history(
        &self,
        principal_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, AppError> {
        sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT * FROM audit_log
            WHERE principal_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(principal_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)
    }

    async fn get_protection(&self, query: &str) -> Result<Option<ProtectionRecord>, AppError> {
        sqlx::query_as::<_, ProtectionRecord>("SELECT * FROM protected_queries WHERE query = $1")
            .bind(query)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn add_protection(&self, query: &str, reason: Option<&str>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO protected_queries (query, reason) VALUES ($1, $2)
            ON CONFLICT (query) DO UPDATE SET reason = EXCLUDED.reason
            "#,
        )
        .bind(query)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;
        tracing::info!("Protection record added for query: {}", query);
        Ok(())
    }

    async fn remove_protection(&self, query: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM protected_queries WHERE query = $1")
            .bind(query)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        tracing::info!("Protection record removed for query: {}", query);
        Ok(())
    }

    async fn list_protections(&self) -> Result<Vec<ProtectionRecord>, AppError> {
        sqlx::query_as::<_, ProtectionRecord>(
            "SELECT * FROM protected_queries ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)
    }

    async fn cache_get(
        &self,
        service: Service,
        query: &str,
    ) -> Result<Option<CacheRecord>, AppError> {
        sqlx::query_as::<_, CacheRecord>(
            "SELECT * FROM lookup_cache WHERE service = $1 AND query = $2",
        )
        .bind(service.as_str())
        .bind(query)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)
    }

    async fn cache_put(&self, record: CacheRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO lookup_cache (service, query, payload, checksum) VALUES ($1, $2, $3, $4)
            ON CONFLICT (service, query) DO UPDATE
            SET payload = EXCLUDED.payload,
                checksum = EXCLUDED.checksum,
                created_at = now()
            "#,
        )
        .bind(&record.service)
        .bind(&record.query)
        .bind(&record.payload)
        .bind(&record.checksum)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;
        Ok(())
    }

    async fn cache_delete(&self, service: Service, query: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM lookup_cache WHERE service = $1 AND query = $2")
            .bind(service.as_str())
            .bind(query)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    async fn get_settings(&self) -> Result<AppSettings, AppError> {
        let row: Option<(i64, Value)> =
            sqlx::query_as("SELECT signup_credits, service_costs FROM app_settings WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(AppError::Database)?;

        match row {
            Some((signup_credits, costs)) => {
                let service_costs = serde_json::from_value(costs).map_err(|e| {
                    AppError::Internal(format!("Corrupt service cost table: {}", e))
                })?;
                Ok(AppSettings {
                    service_costs,
                    signup_credits,
                })
            }
            None => {
                // First read seeds the defaults so operators have a row to edit
                let defaults = AppSettings::default();
                let costs = serde_json::to_value(&defaults.service_costs)
                    .map_err(|e| AppError::Internal(format!("Encoding cost table: {}", e)))?;
                sqlx::query(
                    r#"
                    INSERT INTO app_settings (id, signup_credits, service_costs) VALUES (1, $1, $2)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(defaults.signup_credits)
                .bind(costs)
                .execute(&self.pool)
                .await
                .map_err(AppError::Database)?;
                Ok(defaults)
            }
        }
    }

    async fn update_settings(&self, settings: AppSettings) -> Result<AppSettings, AppError> {
        let costs = serde_json::to_value(&settings.service_costs)
            .map_err(|e| AppError::Internal(format!("Encoding cost table: {}", e)))?;
        sqlx::query(
            r#"
            INSERT INTO app_settings (id, signup_credits, service_costs, updated_at)
            VALUES (1, $1, $2, now())
            ON CONFLICT (id) DO UPDATE
            SET signup_credits = EXCLUDED.signup_credits,
                service_costs = EXCLUDED.service_costs,
                updated_at = now()
            "#,
        )
        .bind(settings.signup_credits)
        .bind(costs)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;
        tracing::info!("Settings updated");
        Ok(settings)
    }
}
