mod api;
mod auth;
mod config;
mod db;
mod error;
mod presence;
mod registry;
mod store;
mod ws;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::{sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::jwt::AccessTokenService;
use crate::config::GatewayConfig;
use crate::db::{
    migrations::run_migrations,
    pool::{check_pool_health, create_pg_pool, PoolConfig},
};
use crate::registry::RoomRegistry;
use crate::store::ChatStore;

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
const REQUEST_ID_HEADER: &str = "x-request-id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set QUAD_GATEWAY_JWT_SECRET in production");
    }

    let token_service =
        Arc::new(AccessTokenService::new(&config.jwt_secret).context("invalid gateway JWT secret")?);

    let store = match &config.database_url {
        Some(database_url) => {
            let pool = create_pg_pool(database_url, PoolConfig::from_env())
                .await
                .context("failed to initialize gateway PostgreSQL pool")?;
            check_pool_health(&pool)
                .await
                .context("gateway PostgreSQL health check failed")?;
            run_migrations(&pool).await?;
            ChatStore::postgres(pool)
        }
        None => {
            warn!(
                "QUAD_GATEWAY_DATABASE_URL is not set; using the in-memory store \
                 (messages do not survive restarts)"
            );
            ChatStore::memory()
        }
    };

    let app = build_router(token_service, store, config.cors_origins.as_deref());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting quad gateway");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited unexpectedly")
}

/// The composition root: the registries and the store are constructed here,
/// once, and handed to every session through router state.
fn build_router(
    token_service: Arc<AccessTokenService>,
    store: ChatStore,
    cors_origins: Option<&str>,
) -> Router {
    let ws_state = ws::WsRouterState {
        token_service: Arc::clone(&token_service),
        chat_registry: RoomRegistry::new(),
        group_registry: RoomRegistry::new(),
        store: store.clone(),
    };

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(ws_state))
            .merge(api::router(token_service, store)),
        cors_origins,
    )
}

fn apply_middleware(router: Router, cors_origins: Option<&str>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(cors_layer(cors_origins))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        None | Some("*") => CorsLayer::permissive(),
        Some(list) => {
            let origins = list
                .split(',')
                .filter_map(|origin| origin.trim().parse::<HeaderValue>().ok())
                .collect::<Vec<_>>();
            CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
