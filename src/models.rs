use chrono::{DateTime, Utc};
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use utoipa::ToSchema;

// ============ Database Models ============

/// A registered principal (account) of the broker.
///
/// Created on first successful authentication; mutated by the credit ledger
/// and by administrative action, never deleted (soft flags only).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Subject identifier issued by the external identity layer.
    pub id: String,
    /// Email address, when the identity layer supplies one.
    pub email: Option<String>,
    /// Display name.
    pub username: Option<String>,
    /// Current credit balance.
    pub credits: i64,
    /// Account-level block; denies every lookup.
    pub is_blocked: bool,
    /// Origin-address block; denies every lookup from this principal.
    pub is_origin_blocked: bool,
    /// Origin address seen on the most recent authenticated request.
    pub last_origin: Option<String>,
    /// When set and in the past, the balance no longer covers lookups.
    pub credits_expire_at: Option<DateTime<Utc>>,
    /// Terms-of-service consent, captured at the authentication boundary.
    pub terms_accepted: bool,
    /// Privacy-policy consent, captured at the authentication boundary.
    pub privacy_accepted: bool,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: Option<DateTime<Utc>>,
}

/// One row per attempted lookup; append-only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique identifier for the entry.
    pub id: i64,
    /// Principal that made the attempt.
    pub principal_id: String,
    /// Service name as submitted.
    pub service: String,
    /// Raw query string as submitted (not normalized).
    pub query: String,
    /// Terminal status label (`SUCCESS`, `FAILED_NO_CREDITS`, ...).
    pub status: String,
    /// Provider payload for successful lookups.
    #[schema(value_type = Option<Object>)]
    pub result: Option<Value>,
    /// Timestamp of the attempt.
    pub created_at: DateTime<Utc>,
}

/// A query no service will process, regardless of cache or credits.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionRecord {
    /// Normalized query the protection applies to (service-agnostic).
    pub query: String,
    /// Human-readable reason shown to callers, when one was stored.
    pub reason: Option<String>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// A single-use token mapping to a fixed credit grant.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCode {
    /// Unique identifier for the code row.
    pub id: i64,
    /// The redeemable token itself.
    pub code: String,
    /// Credits granted on redemption.
    pub credits: i64,
    /// Whether the code has been consumed.
    pub is_used: bool,
    /// Principal that consumed the code.
    pub used_by: Option<String>,
    /// When the code was consumed.
    pub used_at: Option<DateTime<Utc>>,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// A persisted cache entry: the last successful provider payload for a
/// (service, normalized query) pair.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Service the payload came from.
    pub service: String,
    /// Normalized query the payload answers.
    pub query: String,
    /// The successful provider payload.
    pub payload: Value,
    /// SHA-256 checksum of the payload, verified on read.
    pub checksum: String,
    /// Timestamp of creation; drives TTL expiry.
    pub created_at: DateTime<Utc>,
}

/// Operator-tunable settings, read fresh on every lookup.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Per-service lookup cost in credits.
    pub service_costs: HashMap<String, i64>,
    /// Credits granted when a principal first authenticates.
    pub signup_credits: i64,
}

impl Default for AppSettings {
    /// Every service costs 1 credit; new principals start with 10.
    fn default() -> Self {
        let mut service_costs = HashMap::new();
        for service in Service::ALL {
            service_costs.insert(service.as_str().to_string(), 1);
        }
        Self {
            service_costs,
            signup_credits: 10,
        }
    }
}

impl AppSettings {
    /// Cost of one lookup against `service`; services absent from the cost
    /// table cost 1 credit.
    pub fn cost_for(&self, service: Service) -> i64 {
        self.service_costs
            .get(service.as_str())
            .copied()
            .unwrap_or(1)
    }
}

// ============ Services ============

/// The lookup kinds the broker offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    Mobile,
    Vehicle,
    Ip,
    NationalId,
}

impl Service {
    pub const ALL: [Service; 4] = [
        Service::Mobile,
        Service::Vehicle,
        Service::Ip,
        Service::NationalId,
    ];

    /// Wire name; also the cost-table and cache key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Mobile => "mobile",
            Service::Vehicle => "vehicle",
            Service::Ip => "ip",
            Service::NationalId => "national-id",
        }
    }

    /// Checks the raw query against this service's format rule.
    ///
    /// Returns the client-facing message on rejection. Runs at the HTTP
    /// boundary, before the pipeline sees the request.
    pub fn validate(&self, raw: &str) -> Result<(), String> {
        match self {
            Service::Mobile => validate_mobile(raw),
            Service::Vehicle => validate_vehicle(raw),
            Service::Ip => validate_ip(raw),
            Service::NationalId => validate_national_id(raw),
        }
    }

    /// Canonicalizes a query so cache keys and protection checks are
    /// consistent regardless of client formatting.
    ///
    /// Infallible: queries that fail `validate` are cleaned up best-effort.
    pub fn normalize(&self, raw: &str) -> String {
        match self {
            Service::Mobile => {
                mobile_subscriber_digits(raw.trim()).unwrap_or_else(|| digits_only(raw))
            }
            Service::Vehicle => strip_separators(raw).to_uppercase(),
            Service::Ip => match raw.trim().parse::<Ipv4Addr>() {
                Ok(addr) => addr.to_string(),
                Err(_) => raw.trim().to_string(),
            },
            Service::NationalId => digits_only(raw),
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile" => Ok(Service::Mobile),
            "vehicle" => Ok(Service::Vehicle),
            "ip" => Ok(Service::Ip),
            "national-id" => Ok(Service::NationalId),
            other => Err(format!("Unknown service: {}", other)),
        }
    }
}

/// Validate a mobile query: must be a valid number under the Indian
/// numbering plan whose subscriber part is 10 digits.
///
/// Uses the phonenumber library (port of Google's libphonenumber) rather
/// than a bare digit count, so numbers with +91 prefixes or separators
/// validate the same as plain 10-digit input.
fn validate_mobile(raw: &str) -> Result<(), String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() < 8 {
        return Err("Must be a valid 10-digit mobile number".to_string());
    }
    match mobile_subscriber_digits(trimmed) {
        Some(digits) if digits.len() == 10 => Ok(()),
        _ => Err("Must be a valid 10-digit mobile number".to_string()),
    }
}

/// Parse with the IN region and return the subscriber digits (E.164 minus
/// the +91 country code), or None when the number does not validate.
fn mobile_subscriber_digits(raw: &str) -> Option<String> {
    match phonenumber::parse(Some(CountryId::IN), raw) {
        Ok(number) => {
            if phonenumber::is_valid(&number) {
                let e164 = number.format().mode(Mode::E164).to_string();
                e164.strip_prefix("+91").map(|digits| digits.to_string())
            } else {
                None
            }
        }
        Err(_) => None,
    }
}

fn validate_vehicle(raw: &str) -> Result<(), String> {
    let normalized = strip_separators(raw).to_uppercase();
    let re = Regex::new(r"^[A-Za-z]{2}[0-9]{2}[A-Za-z0-9]+$").unwrap();
    if re.is_match(&normalized) {
        Ok(())
    } else {
        Err("Must start with 2 letters, 2 numbers, then alphanumeric".to_string())
    }
}

fn validate_ip(raw: &str) -> Result<(), String> {
    raw.trim()
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| "Invalid IP address".to_string())
}

fn validate_national_id(raw: &str) -> Result<(), String> {
    let digits = digits_only(raw);
    let re = Regex::new(r"^[0-9]{16}$").unwrap();
    if re.is_match(&digits) {
        Ok(())
    } else {
        Err("Must be a valid 16-digit ID number".to_string())
    }
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn strip_separators(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

// ============ Audit Statuses ============

/// Terminal outcome labels written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Success,
    FailedNoCredits,
    Denied,
    NotFound,
    ProviderError,
    ProviderExhausted,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::FailedNoCredits => "FAILED_NO_CREDITS",
            AuditStatus::Denied => "DENIED",
            AuditStatus::NotFound => "NOT_FOUND",
            AuditStatus::ProviderError => "PROVIDER_ERROR",
            AuditStatus::ProviderExhausted => "PROVIDER_EXHAUSTED",
        }
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ API Request/Response Models ============

/// Request payload for a lookup.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LookupRequest {
    /// The identifier to look up (format depends on the service).
    pub query: String,
}

/// Successful lookup response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LookupResponse {
    /// Always true; failures use the error body instead.
    pub success: bool,
    /// The provider payload, passed through verbatim.
    #[schema(value_type = Object)]
    pub data: Value,
    /// Balance after any charge for this lookup.
    #[serde(rename = "creditsRemaining")]
    pub credits_remaining: i64,
    /// Present (true) only when served from the result cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

/// Error body shape shared by every failure status.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Always false.
    pub success: bool,
    /// Client-facing description of the failure.
    pub message: String,
}

/// Request payload for redeeming a code.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RedeemRequest {
    /// The single-use code to redeem.
    pub code: String,
}

/// Response for a successful redemption.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedeemResponse {
    /// Always true; failed redemptions use the error body.
    pub success: bool,
    /// Confirmation message including the granted amount.
    pub message: String,
    /// Balance after the grant.
    pub credits: i64,
}

/// Pagination query parameters for history endpoints.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// One page of audit history.
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    /// Entries, newest first.
    pub data: Vec<AuditEntry>,
    /// 1-based page number served.
    pub page: u32,
    /// Page size served.
    pub limit: u32,
    /// True when a full page was returned and more entries may exist.
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

/// Admin request: set a principal's balance to an absolute value.
#[derive(Debug, Deserialize)]
pub struct SetCreditsRequest {
    pub credits: i64,
}

/// Admin request: block or unblock a principal.
#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    /// Account-level block flag.
    pub blocked: bool,
    /// Origin-address block flag; unchanged when absent.
    #[serde(rename = "blockIp")]
    pub block_origin: Option<bool>,
}

/// Admin request: add a protection record.
#[derive(Debug, Deserialize)]
pub struct ProtectRequest {
    pub query: String,
    pub reason: Option<String>,
}

/// Admin request: mint a redeem code worth `credits`.
#[derive(Debug, Deserialize)]
pub struct GenerateCodeRequest {
    pub credits: i64,
}

/// Admin request: grant `credits` to every principal.
#[derive(Debug, Deserialize)]
pub struct GiftAllRequest {
    pub credits: i64,
}

/// Admin request: partial settings update.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub service_costs: Option<HashMap<String, i64>>,
    pub signup_credits: Option<i64>,
}

/// Admin request: drop one cache entry.
#[derive(Debug, Deserialize)]
pub struct InvalidateCacheRequest {
    pub service: Service,
    pub query: String,
}

// ============ Provider Payloads ============

/// Typed view of a successful provider payload, tagged by service.
///
/// Parsed at the upstream-caller boundary for validation and logging; the
/// raw payload is what gets cached and returned, so unknown provider fields
/// survive verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServicePayload {
    Mobile(MobileRecord),
    Vehicle(VehicleRecord),
    Ip(IpRecord),
    NationalId(NationalIdRecord),
}

impl ServicePayload {
    /// Parses a raw provider payload into the service's typed record.
    ///
    /// Every known field is optional and unknown fields are retained, so any
    /// JSON object parses; non-object payloads are rejected.
    pub fn parse(service: Service, payload: &Value) -> Result<Self, String> {
        if !payload.is_object() {
            return Err(format!(
                "provider returned a non-object payload for {}",
                service
            ));
        }
        let parsed = match service {
            Service::Mobile => serde_json::from_value(payload.clone()).map(ServicePayload::Mobile),
            Service::Vehicle => {
                serde_json::from_value(payload.clone()).map(ServicePayload::Vehicle)
            }
            Service::Ip => serde_json::from_value(payload.clone()).map(ServicePayload::Ip),
            Service::NationalId => {
                serde_json::from_value(payload.clone()).map(ServicePayload::NationalId)
            }
        };
        parsed.map_err(|e| e.to_string())
    }

    /// Compact description for operational logs.
    pub fn summary(&self) -> String {
        match self {
            ServicePayload::Mobile(r) => format!(
                "mobile record (operator: {}, circle: {})",
                r.operator.as_deref().unwrap_or("?"),
                r.circle.as_deref().unwrap_or("?")
            ),
            ServicePayload::Vehicle(r) => format!(
                "vehicle record (model: {}, rto: {})",
                r.maker_model.as_deref().unwrap_or("?"),
                r.rto.as_deref().unwrap_or("?")
            ),
            ServicePayload::Ip(r) => format!(
                "ip record (country: {}, isp: {})",
                r.country.as_deref().unwrap_or("?"),
                r.isp.as_deref().unwrap_or("?")
            ),
            ServicePayload::NationalId(r) => format!(
                "national-id record (state: {}, status: {})",
                r.state.as_deref().unwrap_or("?"),
                r.status.as_deref().unwrap_or("?")
            ),
        }
    }
}

/// Subscriber record from the mobile provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileRecord {
    pub name: Option<String>,
    pub address: Option<String>,
    pub circle: Option<String>,
    pub operator: Option<String>,
    pub alt_mobile: Option<String>,
    pub email: Option<String>,
    /// Provider fields this view does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Registration record from the vehicle provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub rc_number: Option<String>,
    pub owner_name: Option<String>,
    pub vehicle_class: Option<String>,
    pub fuel_type: Option<String>,
    pub maker_model: Option<String>,
    pub registration_date: Option<String>,
    pub insurance_upto: Option<String>,
    pub rto: Option<String>,
    /// Provider fields this view does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Geolocation record from the IP provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpRecord {
    pub status: Option<String>,
    pub country: Option<String>,
    #[serde(rename = "countryCode")]
    pub country_code: Option<String>,
    pub region: Option<String>,
    #[serde(rename = "regionName")]
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "as")]
    pub asn: Option<String>,
    pub proxy: Option<bool>,
    pub hosting: Option<bool>,
    pub query: Option<String>,
    /// Provider fields this view does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Identity record from the national-ID provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NationalIdRecord {
    pub number: Option<String>,
    pub status: Option<String>,
    pub age_band: Option<String>,
    pub state: Option<String>,
    pub gender: Option<String>,
    /// Provider fields this view does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}
