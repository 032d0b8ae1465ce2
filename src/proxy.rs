use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::normalize::normalize_url;
use crate::rate_limit::{RateLimitDecision, RateLimitPolicy};
use crate::rewrite::{needs_rewrite, rewrite_response};
use crate::transform::transform_response;
use crate::validate::{RecommendedAction, validate_request};

#[derive(Debug, Deserialize)]
pub struct ProxyRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    platform: String,
    #[serde(default, rename = "isHomepage")]
    is_homepage: bool,
}

pub async fn proxy(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ProxyRequest>,
) -> Result<Response, ApiError> {
    let url = payload.url.trim();
    let platform = payload.platform.trim();
    if url.is_empty() || platform.is_empty() {
        return Err(ApiError::bad_request("Both url and platform are required."));
    }

    let client_ip = client_ip_for_request(&state, &headers, addr);

    let baseline = state.rate_limiter.check(&client_ip, RateLimitPolicy::Proxy).await;
    if !baseline.allowed {
        return Err(rate_limit_error(&baseline));
    }

    let verdict = state.bot_tracker.track(&client_ip).await;
    if verdict.is_bot {
        debug!(
            "Blocked bot burst from {client_ip}: {}",
            verdict.reason.as_deref().unwrap_or("velocity threshold")
        );
        return Err(ApiError::bot_burst(
            "Too many requests in a short period. Please slow down.",
        ));
    }

    let validation = validate_request(&headers, &state.allowed_origins);
    if !validation.valid {
        debug!(
            "Validation flagged {client_ip}: is_bot={} action={:?} reasons={:?}",
            validation.is_bot, validation.recommended_action, validation.reasons
        );
    }
    if validation.is_bot {
        return Err(ApiError::bot_blocked(
            "Automated clients are not allowed to use this endpoint.",
        ));
    }

    let mut quota = baseline;
    match validation.recommended_action {
        RecommendedAction::Block => {
            return Err(ApiError::forbidden("This request could not be validated."));
        }
        RecommendedAction::StrictLimit => {
            let strict = state
                .rate_limiter
                .check(&client_ip, RateLimitPolicy::ProxyStrict)
                .await;
            if !strict.allowed {
                return Err(rate_limit_error(&strict));
            }
            quota = strict;
        }
        RecommendedAction::Allow => {}
    }

    let normalized = normalize_url(url, platform);
    if normalized != url {
        debug!("Normalized {platform} url {url} to {normalized}");
    }
    if payload.is_homepage {
        debug!("Homepage request for {normalized}");
    }

    if let Some(cached) = state.response_cache.get(&normalized).await {
        debug!("Response cache hit for {normalized}");
        return Ok(success_response(cached, &quota));
    }

    let Some(upstream) = state.upstream.as_ref() else {
        return Err(ApiError::configuration(
            "Download service is not configured: missing API credentials.",
        ));
    };

    let data = upstream
        .fetch(&normalized)
        .await
        .map_err(|error| error.into_api_error())?;

    let transformed = transform_response(data, platform)?;

    let final_payload = if needs_rewrite(platform, &normalized) {
        rewrite_response(&state.download_cache, transformed, &normalized).await
    } else {
        transformed
    };

    state.response_cache.set(&normalized, final_payload.clone()).await;

    Ok(success_response(final_payload, &quota))
}

fn rate_limit_error(decision: &RateLimitDecision) -> ApiError {
    ApiError::rate_limited(
        format!(
            "Rate limit exceeded. Try again in {} seconds.",
            decision.retry_after_seconds
        ),
        decision.retry_after_seconds,
    )
}

fn success_response(payload: Value, quota: &RateLimitDecision) -> Response {
    let mut response = Json(payload).into_response();

    let headers = response.headers_mut();
    insert_header(headers, "x-ratelimit-limit", quota.limit.to_string());
    insert_header(headers, "x-ratelimit-remaining", quota.remaining.to_string());
    insert_header(headers, "x-ratelimit-reset", quota.reset_at.timestamp().to_string());

    response
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: String) {
    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(error) => warn!("Could not build {name} header: {error}"),
    }
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(forwarded) = check_header("x-forwarded-for") {
        let first_ip = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        if first_ip.is_some() {
            return first_ip;
        }
    }

    check_header("cf-connecting-ip").or_else(|| check_header("x-real-ip"))
}

fn client_ip_for_request(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> String {
    if state.trust_proxy_headers {
        extract_client_ip(headers).unwrap_or_else(|| addr.ip().to_string())
    } else {
        addr.ip().to_string()
    }
}
