use std::{collections::HashSet, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

mod bot_detect;
mod cache;
mod error;
mod normalize;
mod proxy;
mod rate_limit;
mod rewrite;
mod transform;
mod upstream;
mod validate;

use bot_detect::BotTracker;
use cache::{DownloadUrlCache, ResponseCache};
use error::ApiError;
use rate_limit::RateLimiter;
use upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>,
    pub bot_tracker: Arc<BotTracker>,
    pub response_cache: Arc<ResponseCache>,
    pub download_cache: Arc<DownloadUrlCache>,
    pub upstream: Option<Arc<UpstreamClient>>,
    pub allowed_origins: Arc<HashSet<String>>,
    pub trust_proxy_headers: bool,
}

#[tokio::main]
async fn main() {
    let debug_mode = read_bool_env("DEBUG_MODE").unwrap_or(false);
    let default_filter = if debug_mode {
        "fsmvid_backend=debug,tower_http=info"
    } else {
        "fsmvid_backend=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string()))
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let data_dir = root.join("data");

    tokio::fs::create_dir_all(&data_dir)
        .await
        .map_err(|error| ApiError::internal(format!("Could not create data directory: {error}")))?;

    let rate_limiter = RateLimiter::load(data_dir.join("rate_limits.json")).await;
    let download_cache = DownloadUrlCache::load(data_dir.join("download_urls.json")).await;

    let trust_proxy_headers = read_bool_env("TRUST_PROXY_HEADERS").unwrap_or(false);
    if !trust_proxy_headers {
        warn!("TRUST_PROXY_HEADERS=false: socket addresses will be used for rate limiting.");
    }

    let upstream = build_upstream_client()?;
    if upstream.is_none() {
        warn!("ZM_API_URL or ZM_API_KEY is not set. Proxy requests will fail until configured.");
    }

    let allowed_origins = resolve_allowed_origins()?;
    let cors = build_cors_layer(&allowed_origins);

    let state = AppState {
        rate_limiter: Arc::new(rate_limiter),
        bot_tracker: Arc::new(BotTracker::new()),
        response_cache: Arc::new(ResponseCache::new()),
        download_cache: Arc::new(download_cache),
        upstream,
        allowed_origins: Arc::new(allowed_origins),
        trust_proxy_headers,
    };

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/proxy", post(proxy::proxy))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = resolve_bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("Could not bind to {addr}: {error}")))?;

    info!("Backend listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn build_upstream_client() -> Result<Option<Arc<UpstreamClient>>, ApiError> {
    let api_url = std::env::var("ZM_API_URL")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string));
    let api_key = std::env::var("ZM_API_KEY")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string));

    let (Some(api_url), Some(api_key)) = (api_url, api_key) else {
        return Ok(None);
    };

    debug!("Upstream API key loaded: {}", masked_key(&api_key));

    let http = reqwest::Client::builder()
        .build()
        .map_err(|error| ApiError::internal(format!("Could not create HTTP client: {error}")))?;

    Ok(Some(Arc::new(UpstreamClient::new(http, api_url, api_key))))
}

fn masked_key(key: &str) -> String {
    if key.len() <= 8 {
        return "*".repeat(key.len());
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}

fn resolve_allowed_origins() -> Result<HashSet<String>, ApiError> {
    let configured = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let origins = if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Falling back to development defaults.");
        vec![
            "http://127.0.0.1:3000".to_string(),
            "http://localhost:3000".to_string(),
        ]
    } else {
        configured
    };

    let normalized = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://domain.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;

    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        normalized.len(),
        normalized
    );

    Ok(normalized)
}

fn build_cors_layer(allowed_origins: &HashSet<String>) -> CorsLayer {
    let allowed_origins = Arc::new(allowed_origins.clone());
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| allowed_origins.contains(value));
        debug!(
            "CORS origin check raw={:?} normalized={:?} allowed={}",
            origin, normalized, allowed
        );
        allowed
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };
    let port = parsed.port();

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    let include_port = port.is_some_and(|explicit| explicit != default_port);

    if include_port {
        Some(format!("{scheme}://{host}:{}", port?))
    } else {
        Some(format!("{scheme}://{host}"))
    }
}

fn read_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    "127.0.0.1:8787".to_string()
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
