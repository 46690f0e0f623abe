use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use lookup_broker::audit::AuditLog;
use lookup_broker::auth;
use lookup_broker::cache::ResultCache;
use lookup_broker::config::Config;
use lookup_broker::db::Database;
use lookup_broker::handlers::{self, ApiDoc, AppState};
use lookup_broker::ledger::CreditLedger;
use lookup_broker::pipeline::LookupPipeline;
use lookup_broker::providers::HttpProviders;
use lookup_broker::retry::RetryPolicy;
use lookup_broker::storage::{PgStorage, Storage};

/// Serves the generated OpenAPI document.
async fn serve_openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Serves a Swagger UI page pointed at the generated document.
async fn serve_docs_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Lookup Broker - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-standalone-preset.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIStandalonePreset
                ],
                layout: "StandaloneLayout"
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lookup_broker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool and storage engine
    let db = Database::new(&config.database_url).await?;
    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(db.pool.clone()));

    // Result cache: in-process hot tier over the persistent tier
    let cache = ResultCache::new(storage.clone(), config.cache_ttl());
    match config.cache_ttl() {
        Some(ttl) => tracing::info!("Result cache initialized ({}s TTL)", ttl.as_secs()),
        None => tracing::info!("Result cache initialized (no expiry)"),
    }

    // Upstream provider adapters
    let providers = Arc::new(HttpProviders::new(&config)?);
    tracing::info!("✓ Provider adapters initialized");

    let ledger = Arc::new(CreditLedger::new(storage.clone()));
    let audit = Arc::new(AuditLog::new(storage.clone()));
    let retry = RetryPolicy::new(config.retry_max_attempts, config.retry_backoff());
    let pipeline = LookupPipeline::new(
        storage.clone(),
        providers,
        cache.clone(),
        ledger.clone(),
        audit.clone(),
        retry,
        config.lookup_deadline(),
    );
    tracing::info!(
        "Lookup pipeline ready ({} attempts, {}ms backoff, {}s deadline)",
        config.retry_max_attempts,
        config.retry_backoff().as_millis(),
        config.lookup_deadline().as_secs()
    );

    // Build application state
    let app_state = Arc::new(AppState {
        storage,
        pipeline,
        cache,
        ledger,
        audit,
        config: config.clone(),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Principal surface: token-verified, principal context injected
    let user_routes = Router::new()
        .route("/api/services/:service", post(handlers::lookup))
        .route("/api/user", get(handlers::me))
        .route("/api/user/history", get(handlers::history))
        .route("/api/user/redeem", post(handlers::redeem))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::require_principal,
        ));

    // Admin surface: static operator token, fails closed when unset
    let admin_routes = Router::new()
        .route("/api/admin/users", get(handlers::list_principals))
        .route("/api/admin/users/:id/credits", post(handlers::set_credits))
        .route(
            "/api/admin/users/:id/history",
            get(handlers::principal_history),
        )
        .route("/api/admin/users/:id/block", post(handlers::block))
        .route(
            "/api/admin/protections",
            get(handlers::list_protections).post(handlers::add_protection),
        )
        .route(
            "/api/admin/protections/:query",
            delete(handlers::remove_protection),
        )
        .route("/api/admin/codes", post(handlers::generate_code))
        .route("/api/admin/gift-all", post(handlers::gift_all))
        .route(
            "/api/admin/settings",
            get(handlers::get_settings).post(handlers::update_settings),
        )
        .route(
            "/api/admin/cache/invalidate",
            post(handlers::invalidate_cache),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::require_admin,
        ));

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route("/docs", get(serve_docs_ui))
        .route("/api-docs/openapi.json", get(serve_openapi_spec))
        .merge(user_routes)
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                // Request size limit: lookup bodies are tiny, 1MB is generous
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting for the platform's probes
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
