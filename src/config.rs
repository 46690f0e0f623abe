use serde::Deserialize;
use std::time::Duration;

/// Default public endpoints for providers that ship one; mobile has no
/// public default and must be configured.
const DEFAULT_VEHICLE_API_URL: &str = "https://vehicle-infoo.vercel.app/?rc_number={query}";
const DEFAULT_IP_API_URL: &str = "http://ip-api.com/json/{query}?fields=status,message,continent,continentCode,country,countryCode,region,regionName,city,district,zip,lat,lon,timezone,offset,currency,isp,org,as,asname,reverse,mobile,proxy,hosting,query";
const DEFAULT_IP_FALLBACK_API_URL: &str = "https://ipapi.co/{query}/json/";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// HS256 secret the identity layer signs principal tokens with.
    pub auth_secret: String,
    /// Bearer token for the admin surface; admin routes are disabled when unset.
    pub admin_token: Option<String>,
    /// Provider URL templates; `{query}` is replaced with the normalized query.
    pub mobile_api_url: String,
    pub vehicle_api_url: String,
    pub ip_api_url: String,
    pub ip_fallback_api_url: String,
    pub national_id_api_url: Option<String>, // Optional: synthetic record when unset
    pub retry_max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub lookup_deadline_secs: u64,
    pub cache_ttl_secs: Option<u64>, // Unset: cache entries never expire
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            auth_secret: std::env::var("AUTH_TOKEN_SECRET")
                .map_err(|_| anyhow::anyhow!("AUTH_TOKEN_SECRET environment variable required"))
                .and_then(|secret| {
                    if secret.trim().is_empty() {
                        anyhow::bail!("AUTH_TOKEN_SECRET cannot be empty");
                    }
                    Ok(secret)
                })?,
            admin_token: std::env::var("ADMIN_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            mobile_api_url: std::env::var("MOBILE_API_URL")
                .map_err(|_| anyhow::anyhow!("MOBILE_API_URL environment variable required"))
                .and_then(|url| validate_template("MOBILE_API_URL", url))?,
            vehicle_api_url: validate_template(
                "VEHICLE_API_URL",
                std::env::var("VEHICLE_API_URL")
                    .unwrap_or_else(|_| DEFAULT_VEHICLE_API_URL.to_string()),
            )?,
            ip_api_url: validate_template(
                "IP_API_URL",
                std::env::var("IP_API_URL").unwrap_or_else(|_| DEFAULT_IP_API_URL.to_string()),
            )?,
            ip_fallback_api_url: validate_template(
                "IP_FALLBACK_API_URL",
                std::env::var("IP_FALLBACK_API_URL")
                    .unwrap_or_else(|_| DEFAULT_IP_FALLBACK_API_URL.to_string()),
            )?,
            national_id_api_url: match std::env::var("NATIONAL_ID_API_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
            {
                Some(url) => Some(validate_template("NATIONAL_ID_API_URL", url)?),
                None => None,
            },
            retry_max_attempts: std::env::var("LOOKUP_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("LOOKUP_MAX_ATTEMPTS must be a positive number"))
                .and_then(|n: u32| {
                    if n == 0 {
                        anyhow::bail!("LOOKUP_MAX_ATTEMPTS must be at least 1");
                    }
                    Ok(n)
                })?,
            retry_backoff_ms: std::env::var("LOOKUP_BACKOFF_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("LOOKUP_BACKOFF_MS must be a number"))?,
            lookup_deadline_secs: std::env::var("LOOKUP_DEADLINE_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("LOOKUP_DEADLINE_SECS must be a number"))
                .and_then(|n: u64| {
                    if n == 0 {
                        anyhow::bail!("LOOKUP_DEADLINE_SECS must be at least 1");
                    }
                    Ok(n)
                })?,
            cache_ttl_secs: match std::env::var("CACHE_TTL_SECS")
                .ok()
                .filter(|s| !s.trim().is_empty())
            {
                Some(raw) => Some(
                    raw.parse()
                        .map_err(|_| anyhow::anyhow!("CACHE_TTL_SECS must be a number"))?,
                ),
                None => None,
            },
        };

        // Log the loaded configuration without sensitive values
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Mobile API: {}", redact_template(&config.mobile_api_url));
        tracing::debug!("Vehicle API: {}", redact_template(&config.vehicle_api_url));
        tracing::debug!("IP API: {}", redact_template(&config.ip_api_url));
        match &config.national_id_api_url {
            Some(url) => tracing::debug!("National-ID API: {}", redact_template(url)),
            None => tracing::info!("National-ID API not configured, serving synthetic records"),
        }
        if config.admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN not set, admin routes are disabled");
        }
        tracing::debug!(
            "Retry policy: {} attempts, {}ms backoff, {}s deadline",
            config.retry_max_attempts,
            config.retry_backoff_ms,
            config.lookup_deadline_secs
        );
        match config.cache_ttl_secs {
            Some(ttl) => tracing::debug!("Cache TTL: {}s", ttl),
            None => tracing::debug!("Cache TTL: none (entries persist until invalidated)"),
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn lookup_deadline(&self) -> Duration {
        Duration::from_secs(self.lookup_deadline_secs)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }
}

/// Checks that a provider URL template has an http(s) scheme and carries the
/// `{query}` placeholder the adapters substitute.
fn validate_template(name: &str, url: String) -> anyhow::Result<String> {
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    let parsed = url::Url::parse(&url)
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    if !url.contains("{query}") {
        anyhow::bail!("{} must contain the {{query}} placeholder", name);
    }
    Ok(url)
}

/// Drops the query string when logging a template; some providers carry API
/// keys there.
fn redact_template(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}
