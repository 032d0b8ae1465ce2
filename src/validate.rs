use std::collections::HashSet;

use axum::http::{HeaderMap, header};
use url::Url;

const BOT_SIGNATURES: [&str; 16] = [
    "bot",
    "crawler",
    "spider",
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "go-http-client",
    "okhttp",
    "java/",
    "libwww",
    "httpclient",
    "scrapy",
    "headless",
    "phantomjs",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedAction {
    Allow,
    StrictLimit,
    Block,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub is_bot: bool,
    pub reasons: Vec<String>,
    pub recommended_action: RecommendedAction,
}

pub fn validate_request(headers: &HeaderMap, allowed_origins: &HashSet<String>) -> ValidationResult {
    let mut reasons = Vec::new();

    let user_agent = header_value(headers, header::USER_AGENT);
    match &user_agent {
        None => reasons.push("missing user-agent".to_string()),
        Some(value) => {
            let lower = value.to_ascii_lowercase();
            if let Some(signature) = BOT_SIGNATURES
                .iter()
                .find(|signature| lower.contains(*signature))
            {
                reasons.push(format!("bot signature in user-agent: {signature}"));
            }
        }
    }
    if !reasons.is_empty() {
        return ValidationResult {
            valid: false,
            is_bot: true,
            reasons,
            recommended_action: RecommendedAction::Block,
        };
    }

    let has_accept = headers.contains_key(header::ACCEPT);
    let has_accept_language = headers.contains_key(header::ACCEPT_LANGUAGE);
    if !has_accept && !has_accept_language {
        reasons.push("missing browser negotiation headers".to_string());
        return ValidationResult {
            valid: false,
            is_bot: false,
            reasons,
            recommended_action: RecommendedAction::Block,
        };
    }

    let origin = header_value(headers, header::ORIGIN);
    let referer = header_value(headers, header::REFERER);

    let origin_trusted = origin
        .as_deref()
        .is_some_and(|value| origin_in_allow_list(value, allowed_origins));
    let referer_trusted = referer
        .as_deref()
        .is_some_and(|value| origin_in_allow_list(value, allowed_origins));

    if origin.is_none() && referer.is_none() {
        reasons.push("no origin or referer".to_string());
    } else if !origin_trusted && !referer_trusted {
        reasons.push("origin and referer outside the allow-list".to_string());
    }

    if reasons.is_empty() {
        ValidationResult {
            valid: true,
            is_bot: false,
            reasons,
            recommended_action: RecommendedAction::Allow,
        }
    } else {
        ValidationResult {
            valid: false,
            is_bot: false,
            reasons,
            recommended_action: RecommendedAction::StrictLimit,
        }
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn origin_in_allow_list(value: &str, allowed_origins: &HashSet<String>) -> bool {
    let Ok(parsed) = Url::parse(value) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };

    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return false,
    };
    let normalized = match parsed.port().filter(|port| *port != default_port) {
        Some(port) => format!("{scheme}://{}:{port}", host.to_ascii_lowercase()),
        None => format!("{scheme}://{}", host.to_ascii_lowercase()),
    };

    allowed_origins.contains(&normalized)
}
