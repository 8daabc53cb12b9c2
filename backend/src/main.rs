use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use redis::Client as RedisClient;
use shared::constants::API_BASE_PATH;
use shared::rate_limit::{get_rate_limit_key, RateLimitCheck, RateLimitType};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::broadcast::ResultBroadcaster;
use crate::config::Config;
use crate::error::Error;
use crate::services::wheel_service::now_ms;
use crate::services::WheelService;
use crate::store::{DataAccess, MemoryStore, PgStore};

mod auth;
mod broadcast;
mod config;
mod error;
mod games;
mod logging;
mod services;
mod store;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    wheel: WheelService,
    redis: Option<RedisClient>,
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Per-user request counting in Redis. Without Redis nothing is limited.
async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: middleware::Next,
) -> Result<Response, Error> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(next.run(request).await);
    };

    let user_id = request
        .extensions()
        .get::<auth::middleware::UserId>()
        .map(|id| id.0.to_string())
        .unwrap_or_else(|| "anonymous".to_string());
    let limit_type = if request.method() == Method::POST {
        RateLimitType::for_path(request.uri().path())
    } else {
        RateLimitType::Api
    };
    let rate_limit_key = get_rate_limit_key(limit_type, &user_id);

    match redis.get_async_connection().await {
        Ok(mut conn) => {
            let attempts: Option<u32> = redis::cmd("GET")
                .arg(&rate_limit_key)
                .query_async(&mut conn)
                .await
                .unwrap_or(None);

            let check = RateLimitCheck::new(attempts.unwrap_or(0), limit_type);
            if check.is_locked {
                warn!("Rate limit hit for {} on {:?}", user_id, limit_type);
                return Err(Error::RateLimited(limit_type.get_error_message()));
            }

            let result: Result<(), redis::RedisError> = redis::cmd("SETEX")
                .arg(&rate_limit_key)
                .arg(limit_type.get_window().as_secs())
                .arg(check.current_attempts + 1)
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                error!("Failed to record rate limit attempt: {}", e);
            }
        }
        Err(e) => error!("Redis unavailable for rate limiting: {}", e),
    }

    Ok(next.run(request).await)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(vec![
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
        ]);

    match config
        .cors_origin
        .as_deref()
        .map(|origin| origin.parse::<HeaderValue>())
    {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(_)) => {
            warn!("Ignoring invalid CORS_ORIGIN, allowing any origin");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .nest(
            API_BASE_PATH,
            games::backend_wheel_game::create_router(state.clone()),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn open_store(config: &Config) -> Result<Arc<dyn DataAccess>, store::StoreError> {
    match config.database_url.as_deref() {
        Some(url) => Ok(Arc::new(PgStore::connect(url).await?)),
        None => {
            warn!("DATABASE_URL not set, wheel history is kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::from_path(".env").ok();
    logging::setup();

    let config = Config::from_env()?;
    let redis = match config.redis_url.as_deref() {
        Some(url) => Some(RedisClient::open(url)?),
        None => None,
    };
    let store = open_store(&config).await?;
    let broadcaster = ResultBroadcaster::new(BROADCAST_CAPACITY);
    let wheel = WheelService::new(config.wheel, store, broadcaster, now_ms()).await?;

    tokio::spawn(wheel.clone().run_driver());

    let state = AppState {
        config: Arc::new(config),
        wheel: wheel.clone(),
        redis,
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = build_router(state);

    info!("🎡 Wheel server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    wheel.shutdown();
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use shared::shared_wheel_game::WheelSettings;

    pub const SECRET: &str = "test-secret";
    pub const ADMIN_ID: &str = "6f1c1c1e-8a57-4c1b-9d8e-3f3a5b0c2d11";

    pub async fn test_state() -> AppState {
        let config = Config::from_lookup(|key| match key {
            "JWT_SECRET_KEY" => Some(SECRET.to_string()),
            "ADMIN_USER_IDS" => Some(ADMIN_ID.to_string()),
            _ => None,
        })
        .unwrap();
        let wheel = WheelService::new(
            WheelSettings::default(),
            Arc::new(MemoryStore::new()),
            ResultBroadcaster::new(BROADCAST_CAPACITY),
            now_ms(),
        )
        .await
        .unwrap();
        AppState {
            config: Arc::new(config),
            wheel,
            redis: None,
        }
    }
}
