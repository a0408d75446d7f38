use std::sync::Arc;

use axum::extract::State;
use axum::middleware;
use axum::{
    Json, Router,
    routing::{get, post},
};
use emg_control::auth;
use emg_control::config::ControlConfig;
use emg_control::geocoding::{GeocodingService, NominatimTransport};
use emg_control::request_meta::RequestMeta;
use emg_control::rpc;
use emg_control::security;
use emg_control::state::AppState;
use emg_control::workflow;
use sea_orm_migration::MigratorTrait;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    database: bool,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    let database = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "database ping failed");
            false
        }
    };
    Json(HealthzResponse {
        status: if database { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
    })
}

async fn init_state(config: ControlConfig) -> anyhow::Result<AppState> {
    let db = emg_db::connect(&config.database_url).await?;

    // Apply migrations on boot (idempotent).
    emg_migration::Migrator::up(&db, None).await?;

    auth::ensure_admin_profile(&db, &config).await?;
    workflow::seed_default_statuses(&db).await?;

    let transport = NominatimTransport::new(config.geocoding_url.clone())?;
    let geocoding = GeocodingService::new(transport, config.geocoding_cache_ttl);

    Ok(AppState {
        db: Arc::new(db),
        config: Arc::new(config),
        geocoding: Arc::new(geocoding),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ControlConfig::from_env()?;
    let addr = config.bind_addr;
    let state = init_state(config).await?;

    let (procedures, _types) = rpc::router()
        .build()
        .map_err(|errs| anyhow::anyhow!("rspc build failed: {errs:?}"))?;

    // State-changing auth routes are protected by CSRF double-submit + Origin allowlist.
    let auth_router = Router::new()
        .route("/csrf", get(auth::csrf))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/setup-password", post(auth::setup_password))
        .route("/password-reset", post(auth::password_reset))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security::csrf_and_origin,
        ))
        .with_state(state.clone());

    let rspc_router = rspc_axum::endpoint(
        procedures,
        |State(state): State<AppState>,
         axum::Extension(meta): axum::Extension<RequestMeta>,
         user: Option<axum::Extension<rpc::AuthUser>>| {
            rpc::Ctx {
                db: state.db.clone(),
                config: state.config.clone(),
                geocoding: state.geocoding.clone(),
                user: user.map(|axum::Extension(u)| u),
                request_id: meta.request_id,
            }
        },
    )
    .layer(middleware::from_fn_with_state(
        state.clone(),
        security::rspc_auth_guard,
    ))
    .layer(middleware::from_fn_with_state(
        state.clone(),
        security::csrf_and_origin,
    ));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/whoami", get(auth::whoami))
        .nest("/auth", auth_router)
        .nest("/rspc", rspc_router)
        .layer(middleware::from_fn(security::request_id))
        .with_state(state);

    tracing::info!(%addr, "emg-control HTTP listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
