//! Utility to create the broker's tables when they do not exist yet.
//!
//! Idempotent: every statement is `IF NOT EXISTS`, so re-running against
//! a live database is safe.

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

const STATEMENTS: &[(&str, &str)] = &[
    (
        "principals",
        r#"
        CREATE TABLE IF NOT EXISTS principals (
            id TEXT PRIMARY KEY,
            email TEXT,
            username TEXT,
            credits BIGINT NOT NULL DEFAULT 0,
            is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
            is_origin_blocked BOOLEAN NOT NULL DEFAULT FALSE,
            last_origin TEXT,
            credits_expire_at TIMESTAMPTZ,
            terms_accepted BOOLEAN NOT NULL DEFAULT FALSE,
            privacy_accepted BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ
        )
        "#,
    ),
    (
        "audit_log",
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id BIGSERIAL PRIMARY KEY,
            principal_id TEXT NOT NULL,
            service TEXT NOT NULL,
            query TEXT NOT NULL,
            status TEXT NOT NULL,
            result JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "audit_log index",
        r#"
        CREATE INDEX IF NOT EXISTS idx_audit_log_principal_created
            ON audit_log (principal_id, created_at DESC)
        "#,
    ),
    (
        "protected_queries",
        r#"
        CREATE TABLE IF NOT EXISTS protected_queries (
            query TEXT PRIMARY KEY,
            reason TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "redeem_codes",
        r#"
        CREATE TABLE IF NOT EXISTS redeem_codes (
            id BIGSERIAL PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            credits BIGINT NOT NULL,
            is_used BOOLEAN NOT NULL DEFAULT FALSE,
            used_by TEXT,
            used_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "lookup_cache",
        r#"
        CREATE TABLE IF NOT EXISTS lookup_cache (
            service TEXT NOT NULL,
            query TEXT NOT NULL,
            payload JSONB NOT NULL,
            checksum TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (service, query)
        )
        "#,
    ),
    (
        "app_settings",
        r#"
        CREATE TABLE IF NOT EXISTS app_settings (
            id INT PRIMARY KEY,
            signup_credits BIGINT NOT NULL DEFAULT 10,
            service_costs JSONB NOT NULL DEFAULT '{}'::jsonb,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let database_url = env::var("DB_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .expect("DB_URL or DATABASE_URL must be set");
    let pool = PgPoolOptions::new().connect(&database_url).await?;

    for (name, ddl) in STATEMENTS {
        sqlx::query(ddl).execute(&pool).await?;
        println!("✓ {}", name);
    }

    println!("Schema ready");
    Ok(())
}
