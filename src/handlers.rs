use crate::audit::AuditLog;
use crate::auth::RequestContext;
use crate::cache::ResultCache;
use crate::config::Config;
use crate::errors::AppError;
use crate::ledger::CreditLedger;
use crate::models::*;
use crate::pipeline::LookupPipeline;
use crate::storage::Storage;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use utoipa::OpenApi;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Storage engine behind every persistent read and write.
    pub storage: Arc<dyn Storage>,
    /// The gated lookup pipeline.
    pub pipeline: LookupPipeline,
    /// Two-tier result cache; exposed for admin invalidation.
    pub cache: ResultCache,
    /// Credit accounting.
    pub ledger: Arc<CreditLedger>,
    /// Append-only lookup history.
    pub audit: Arc<AuditLog>,
    /// Application configuration.
    pub config: Config,
}

/// OpenAPI document for the authenticated surface. The admin surface is
/// deliberately undocumented here.
#[derive(OpenApi)]
#[openapi(
    paths(lookup, me, history, redeem),
    components(schemas(
        LookupRequest,
        LookupResponse,
        ErrorBody,
        RedeemRequest,
        RedeemResponse,
        HistoryResponse,
        AuditEntry,
        Principal,
        Service
    )),
    tags(
        (name = "lookup", description = "Gated, metered lookups"),
        (name = "account", description = "Principal self-service")
    )
)]
pub struct ApiDoc;

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lookup-broker",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

// ============ Lookups ============

/// POST /api/services/:service
///
/// Runs one lookup through the gate, cache, credit check and upstream
/// call. Validation happens here, before the pipeline sees the request,
/// so malformed queries are rejected without an audit entry.
#[utoipa::path(
    post,
    path = "/api/services/{service}",
    tag = "lookup",
    params(("service" = String, Path, description = "One of: mobile, vehicle, ip, national-id")),
    request_body = LookupRequest,
    responses(
        (status = 200, description = "Lookup result, fresh or cached", body = LookupResponse),
        (status = 400, description = "Malformed query or provider rejection", body = ErrorBody),
        (status = 402, description = "Insufficient credits", body = ErrorBody),
        (status = 403, description = "Blocked account, blocked origin or protected record", body = ErrorBody),
        (status = 404, description = "Provider reports no record", body = ErrorBody),
        (status = 500, description = "Provider attempts exhausted", body = ErrorBody)
    )
)]
pub async fn lookup(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(service): Path<String>,
    Json(req): Json<LookupRequest>,
) -> Result<Json<LookupResponse>, AppError> {
    let service: Service = service
        .parse()
        .map_err(|e: String| AppError::BadRequest(e))?;
    service.validate(&req.query).map_err(AppError::BadRequest)?;

    let response = state
        .pipeline
        .execute(&ctx.principal_id, service, &req.query)
        .await?;
    Ok(Json(response))
}

// ============ Account ============

/// GET /api/user
///
/// The authenticated principal's profile and balance.
#[utoipa::path(
    get,
    path = "/api/user",
    tag = "account",
    responses(
        (status = 200, description = "The authenticated principal", body = Principal),
        (status = 401, description = "Missing or invalid token", body = ErrorBody)
    )
)]
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Principal>, AppError> {
    let principal = state
        .storage
        .get_principal(&ctx.principal_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;
    Ok(Json(principal))
}

/// GET /api/user/history?page=&limit=
///
/// Newest-first pages of the principal's lookup history.
#[utoipa::path(
    get,
    path = "/api/user/history",
    tag = "account",
    params(
        ("page" = Option<u32>, Query, description = "1-based page number, default 1"),
        ("limit" = Option<u32>, Query, description = "Page size, default 10, max 50")
    ),
    responses((status = 200, description = "One page of history", body = HistoryResponse))
)]
pub async fn history(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let (page, limit) = page_params(&params);
    let entries = state.audit.history(&ctx.principal_id, page, limit).await?;
    let has_more = entries.len() as u32 == limit;
    Ok(Json(HistoryResponse {
        data: entries,
        page,
        limit,
        has_more,
    }))
}

/// POST /api/user/redeem
///
/// Claims a single-use code for the authenticated principal.
#[utoipa::path(
    post,
    path = "/api/user/redeem",
    tag = "account",
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Credits granted", body = RedeemResponse),
        (status = 400, description = "Invalid or already used code", body = ErrorBody)
    )
)]
pub async fn redeem(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, AppError> {
    let code = req.code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::BadRequest("Code is required".to_string()));
    }

    let outcome = state.ledger.redeem(&code, &ctx.principal_id).await?;
    Ok(Json(RedeemResponse {
        success: true,
        message: format!("Successfully redeemed {} credits!", outcome.granted),
        credits: outcome.balance,
    }))
}

// ============ Admin ============

/// GET /api/admin/users
pub async fn list_principals(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Principal>>, AppError> {
    let principals = state.storage.list_principals().await?;
    Ok(Json(principals))
}

/// POST /api/admin/users/:id/credits
pub async fn set_credits(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetCreditsRequest>,
) -> Result<Json<Principal>, AppError> {
    if req.credits < 0 {
        return Err(AppError::BadRequest("Credits cannot be negative".to_string()));
    }
    let principal = state.ledger.set_balance(&id, req.credits).await?;
    Ok(Json(principal))
}

/// GET /api/admin/users/:id/history?page=&limit=
pub async fn principal_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let (page, limit) = page_params(&params);
    let entries = state.audit.history(&id, page, limit).await?;
    let has_more = entries.len() as u32 == limit;
    Ok(Json(HistoryResponse {
        data: entries,
        page,
        limit,
        has_more,
    }))
}

/// POST /api/admin/users/:id/block
pub async fn block(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<BlockRequest>,
) -> Result<Json<Principal>, AppError> {
    let principal = state
        .storage
        .set_blocked(&id, req.blocked, req.block_origin)
        .await?;
    tracing::info!(
        "Principal {} block flags updated: blocked={}, origin={:?}",
        id,
        req.blocked,
        req.block_origin
    );
    Ok(Json(principal))
}

/// GET /api/admin/protections
pub async fn list_protections(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProtectionRecord>>, AppError> {
    let protections = state.storage.list_protections().await?;
    Ok(Json(protections))
}

/// POST /api/admin/protections
pub async fn add_protection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProtectRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = protection_key(&req.query);
    if key.is_empty() {
        return Err(AppError::BadRequest("Query is required".to_string()));
    }
    state
        .storage
        .add_protection(&key, req.reason.as_deref())
        .await?;
    Ok(Json(json!({ "success": true, "message": "Protection added" })))
}

/// DELETE /api/admin/protections/:query
pub async fn remove_protection(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = protection_key(&query);
    state.storage.remove_protection(&key).await?;
    Ok(Json(json!({ "success": true, "message": "Protection removed" })))
}

/// POST /api/admin/codes
pub async fn generate_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateCodeRequest>,
) -> Result<Json<RedeemCode>, AppError> {
    if req.credits <= 0 {
        return Err(AppError::BadRequest("Credits must be positive".to_string()));
    }
    let code = state.ledger.generate_code(req.credits).await?;
    Ok(Json(code))
}

/// POST /api/admin/gift-all
pub async fn gift_all(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GiftAllRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.credits <= 0 {
        return Err(AppError::BadRequest("Credits must be positive".to_string()));
    }
    let count = state.ledger.grant_all(req.credits).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Gifted {} credits to {} users", req.credits, count)
    })))
}

/// GET /api/admin/settings
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AppSettings>, AppError> {
    let settings = state.storage.get_settings().await?;
    Ok(Json(settings))
}

/// POST /api/admin/settings
///
/// Partial update: only the fields present in the request change.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<AppSettings>, AppError> {
    let mut settings = state.storage.get_settings().await?;

    if let Some(costs) = req.service_costs {
        for (service, cost) in costs {
            if cost < 0 {
                return Err(AppError::BadRequest(format!(
                    "Cost for {} cannot be negative",
                    service
                )));
            }
            settings.service_costs.insert(service, cost);
        }
    }
    if let Some(signup_credits) = req.signup_credits {
        if signup_credits < 0 {
            return Err(AppError::BadRequest(
                "Signup credits cannot be negative".to_string(),
            ));
        }
        settings.signup_credits = signup_credits;
    }

    let updated = state.storage.update_settings(settings).await?;
    Ok(Json(updated))
}

/// POST /api/admin/cache/invalidate
pub async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvalidateCacheRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let query = req.service.normalize(&req.query);
    state.cache.invalidate(req.service, &query).await?;
    Ok(Json(json!({ "success": true, "message": "Cache entry invalidated" })))
}

// ============ Helpers ============

fn page_params(params: &HistoryParams) -> (u32, u32) {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).clamp(1, 50);
    (page, limit)
}

/// Protections are service-agnostic, so an admin-supplied string is keyed
/// by the normalized form of whichever service format it matches, falling
/// back to the trimmed input. This keeps the stored key aligned with what
/// the gate computes at lookup time.
fn protection_key(raw: &str) -> String {
    for service in Service::ALL {
        if service.validate(raw).is_ok() {
            return service.normalize(raw);
        }
    }
    raw.trim().to_string()
}
