use axum::http::StatusCode;
use serde_json::{Value, json};
use tokio::time::Duration;
use tracing::debug;

use crate::error::ApiError;

pub const MAX_UPSTREAM_ATTEMPTS: usize = 5;
pub const UPSTREAM_RETRY_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug)]
pub enum UpstreamError {
    NoMedia {
        message: String,
        details: Option<Value>,
    },
    Failed {
        status: u16,
        message: String,
        details: Option<Value>,
    },
    Logical {
        message: String,
        details: Option<Value>,
    },
    Unreachable {
        message: String,
    },
}

impl UpstreamError {
    pub fn into_api_error(self) -> ApiError {
        match self {
            Self::NoMedia { message, details } => ApiError::no_media(message, details),
            Self::Failed {
                status,
                message,
                details,
            } => {
                let code = upstream_error_code(&details);
                let friendly = if status == 503 || code.as_deref() == Some("NETWORK_UNAVAILABLE") {
                    "The download service is temporarily unavailable. Please try again later."
                        .to_string()
                } else if status == 429 {
                    "The download service is receiving too many requests. Please try again in a moment."
                        .to_string()
                } else if status >= 500 {
                    "The download service is experiencing issues. Please try again later."
                        .to_string()
                } else {
                    message
                };
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                ApiError::upstream(status, friendly, details)
            }
            Self::Logical { message, details } => {
                ApiError::upstream(StatusCode::UNPROCESSABLE_ENTITY, message, details)
            }
            Self::Unreachable { message } => ApiError::unreachable(message),
        }
    }
}

enum Attempt {
    Success(Value),
    Retry(UpstreamError),
    Fail(UpstreamError),
}

pub struct UpstreamClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    retry_delay: Duration,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, api_url: String, api_key: String) -> Self {
        Self {
            http,
            api_url,
            api_key,
            retry_delay: UPSTREAM_RETRY_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub async fn fetch(&self, normalized_url: &str) -> Result<Value, UpstreamError> {
        let mut last_retryable = None;

        for attempt in 1..=MAX_UPSTREAM_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }

            match self.attempt(normalized_url).await {
                Attempt::Success(data) => {
                    debug!("Upstream call succeeded on attempt {attempt} for {normalized_url}");
                    return Ok(data);
                }
                Attempt::Fail(error) => {
                    debug!("Upstream call failed permanently on attempt {attempt}: {error:?}");
                    return Err(error);
                }
                Attempt::Retry(error) => {
                    debug!(
                        "Upstream attempt {attempt}/{MAX_UPSTREAM_ATTEMPTS} retryable for {normalized_url}: {error:?}"
                    );
                    last_retryable = Some(error);
                }
            }
        }

        Err(last_retryable.unwrap_or_else(|| UpstreamError::Unreachable {
            message: "Unable to reach the download service. Please try again later.".to_string(),
        }))
    }

    async fn attempt(&self, normalized_url: &str) -> Attempt {
        let response = self
            .http
            .post(&self.api_url)
            .header("apikey", &self.api_key)
            .json(&json!({ "url": normalized_url }))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                return Attempt::Retry(UpstreamError::Unreachable {
                    message: format!("Unable to reach the download service: {error}"),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let details = response.json::<Value>().await.ok();
            let message = extract_message(details.as_ref())
                .unwrap_or_else(|| format!("The download service returned status {status}."));
            return Attempt::Fail(UpstreamError::Failed {
                status: status.as_u16(),
                message,
                details,
            });
        }

        match response.json::<Value>().await {
            Ok(data) => classify_payload(data),
            Err(error) => Attempt::Retry(UpstreamError::Unreachable {
                message: format!("The download service returned an unreadable response: {error}"),
            }),
        }
    }
}

fn classify_payload(data: Value) -> Attempt {
    let message = extract_message(Some(&data));

    if let Some(message) = &message
        && is_no_media_message(message)
    {
        return Attempt::Retry(UpstreamError::NoMedia {
            message: message.clone(),
            details: Some(data),
        });
    }

    if is_error_payload(&data) {
        let message =
            message.unwrap_or_else(|| "The download service rejected the request.".to_string());
        return Attempt::Fail(UpstreamError::Logical {
            message,
            details: Some(data),
        });
    }

    Attempt::Success(data)
}

fn is_error_payload(data: &Value) -> bool {
    if data.get("error").is_some_and(|error| {
        error.as_bool() == Some(true) || error.as_str().is_some_and(|text| !text.is_empty())
    }) {
        return true;
    }

    if data
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| matches!(status, "error" | "fail"))
    {
        return true;
    }

    data.get("success").and_then(Value::as_bool) == Some(false)
}

fn extract_message(data: Option<&Value>) -> Option<String> {
    let data = data?;
    for key in ["message", "msg", "error"] {
        if let Some(text) = data.get(key).and_then(Value::as_str) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn is_no_media_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("no media")
}

fn upstream_error_code(details: &Option<Value>) -> Option<String> {
    details
        .as_ref()?
        .get("code")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> UpstreamClient {
        UpstreamClient::new(
            reqwest::Client::new(),
            format!("{}/v1/download", server.uri()),
            "test-key".to_string(),
        )
        .with_retry_delay(Duration::ZERO)
    }

    #[test]
    fn no_media_messages_are_recognized() {
        assert!(is_no_media_message("No medias found"));
        assert!(is_no_media_message("no media found for this url"));
        assert!(!is_no_media_message("Invalid URL supplied"));
    }

    #[test]
    fn error_payloads_are_recognized() {
        assert!(is_error_payload(&json!({"error": true})));
        assert!(is_error_payload(&json!({"error": "bad input"})));
        assert!(is_error_payload(&json!({"status": "fail"})));
        assert!(is_error_payload(&json!({"success": false})));
        assert!(!is_error_payload(&json!({"status": "success", "medias": []})));
        assert!(!is_error_payload(&json!({"error": false, "formats": {}})));
    }

    #[test]
    fn no_media_wins_over_error_flags() {
        let payload = json!({"error": true, "message": "No medias found"});
        match classify_payload(payload) {
            Attempt::Retry(UpstreamError::NoMedia { message, .. }) => {
                assert_eq!(message, "No medias found");
            }
            _ => panic!("expected a retryable no-media classification"),
        }
    }

    #[tokio::test]
    async fn no_media_retries_to_the_attempt_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/download"))
            .and(header("apikey", "test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"message": "No medias found"})),
            )
            .expect(MAX_UPSTREAM_ATTEMPTS as u64)
            .mount(&server)
            .await;

        let result = client(&server).fetch("https://www.youtube.com/watch?v=abc").await;
        let error = match result {
            Err(UpstreamError::NoMedia { message, .. }) => message,
            other => panic!("expected a no-media error, got {other:?}"),
        };
        assert_eq!(error, "No medias found");

        let api_error = UpstreamError::NoMedia {
            message: error,
            details: None,
        }
        .into_api_error();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn permanent_errors_stop_after_one_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/download"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"message": "extractor crashed"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server).fetch("https://www.youtube.com/watch?v=abc").await;
        match result {
            Err(UpstreamError::Failed { status, .. }) => assert_eq!(status, 500),
            other => panic!("expected a permanent failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn logical_errors_stop_after_one_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "error", "message": "Unsupported URL"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server).fetch("https://example.com/video").await;
        let api_error = match result {
            Err(error @ UpstreamError::Logical { .. }) => error.into_api_error(),
            other => panic!("expected a logical failure, got {other:?}"),
        };
        assert_eq!(api_error.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(api_error.message, "Unsupported URL");
    }

    #[tokio::test]
    async fn success_returns_the_payload_unchanged() {
        let server = MockServer::start().await;
        let payload = json!({"medias": [{"url": "https://cdn.example.com/v.mp4"}]});
        Mock::given(method("POST"))
            .and(path("/v1/download"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server).fetch("https://example.com/video").await;
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn known_upstream_statuses_map_to_friendly_messages() {
        let unavailable = UpstreamError::Failed {
            status: 503,
            message: "raw upstream text".to_string(),
            details: None,
        }
        .into_api_error();
        assert!(unavailable.message.contains("temporarily unavailable"));

        let throttled = UpstreamError::Failed {
            status: 429,
            message: "raw upstream text".to_string(),
            details: None,
        }
        .into_api_error();
        assert!(throttled.message.contains("too many requests"));
        assert_eq!(throttled.status, StatusCode::TOO_MANY_REQUESTS);

        let broken = UpstreamError::Failed {
            status: 500,
            message: "raw upstream text".to_string(),
            details: None,
        }
        .into_api_error();
        assert!(broken.message.contains("experiencing issues"));

        let network_flag = UpstreamError::Failed {
            status: 400,
            message: "raw upstream text".to_string(),
            details: Some(json!({"code": "NETWORK_UNAVAILABLE"})),
        }
        .into_api_error();
        assert!(network_flag.message.contains("temporarily unavailable"));

        let passthrough = UpstreamError::Failed {
            status: 400,
            message: "Unsupported platform".to_string(),
            details: None,
        }
        .into_api_error();
        assert_eq!(passthrough.message, "Unsupported platform");
        assert_eq!(passthrough.status, StatusCode::BAD_REQUEST);
    }
}
