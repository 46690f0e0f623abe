use crate::config::Config;
use crate::errors::AppError;
use crate::models::Service;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Transport-level provider failure: connection refused, timeout, non-2xx
/// status or an unparseable body. The retry loop treats all of these as
/// retryable.
#[derive(Debug, Clone)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// Seam between the lookup pipeline and the upstream data providers.
#[async_trait]
pub trait ProviderDispatch: Send + Sync {
    /// Performs one upstream call for an already-normalized query.
    async fn fetch(&self, service: Service, query: &str) -> Result<Value, TransportError>;
}

/// HTTP adapters for the four lookup providers.
///
/// Each provider is addressed by a URL template with a `{query}`
/// placeholder. Queries are normalized before they reach this layer, so
/// substitution needs no escaping. The client timeout bounds a single
/// attempt; the pipeline's deadline bounds the whole retried call.
#[derive(Clone)]
pub struct HttpProviders {
    client: reqwest::Client,
    mobile_url: String,
    vehicle_url: String,
    ip_url: String,
    ip_fallback_url: String,
    national_id_url: Option<String>,
}

impl HttpProviders {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            mobile_url: config.mobile_api_url.clone(),
            vehicle_url: config.vehicle_api_url.clone(),
            ip_url: config.ip_api_url.clone(),
            ip_fallback_url: config.ip_fallback_api_url.clone(),
            national_id_url: config.national_id_api_url.clone(),
        })
    }

    async fn fetch_template(&self, template: &str, query: &str) -> Result<Value, TransportError> {
        let url = template.replace("{query}", query);
        tracing::debug!("Calling provider: {}", redacted(&url));
        self.get_json(&url).await
    }

    /// The primary geolocation provider rate-limits aggressively, so any
    /// failure there falls through to the secondary one.
    async fn fetch_ip(&self, query: &str) -> Result<Value, TransportError> {
        let url = self.ip_url.replace("{query}", query);
        match self.get_json(&url).await {
            Ok(payload) => Ok(payload),
            Err(primary) => {
                tracing::warn!("Primary IP provider failed ({}), trying fallback", primary);
                let fallback = self.ip_fallback_url.replace("{query}", query);
                self.get_json(&fallback).await
            }
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError(format!(
                "Provider returned {}: {}",
                status,
                snippet(&body)
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError(format!("Failed to parse provider response: {}", e)))
    }
}

#[async_trait]
impl ProviderDispatch for HttpProviders {
    async fn fetch(&self, service: Service, query: &str) -> Result<Value, TransportError> {
        match service {
            Service::Mobile => self.fetch_template(&self.mobile_url, query).await,
            Service::Vehicle => self.fetch_template(&self.vehicle_url, query).await,
            Service::Ip => self.fetch_ip(query).await,
            Service::NationalId => match &self.national_id_url {
                Some(template) => self.fetch_template(template, query).await,
                None => {
                    tracing::debug!("No national-id provider configured, serving masked record");
                    Ok(synthetic_national_id(query))
                }
            },
        }
    }
}

/// Stand-in record served when no national-id provider is configured.
/// Only the last four digits of the number are echoed back.
fn synthetic_national_id(query: &str) -> Value {
    let masked = match query.len().checked_sub(4) {
        Some(prefix) => format!("{}{}", "X".repeat(prefix), &query[prefix..]),
        None => query.to_string(),
    };
    json!({
        "number": masked,
        "status": "registered",
    })
}

/// Keeps API keys in query strings out of the logs.
fn redacted(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

/// Bounds error-body text carried into error messages.
fn snippet(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
