use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
    pub details: Option<Value>,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            details: None,
            retry_after_seconds: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            code: Some("CONFIGURATION_ERROR"),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_seconds: u64) -> Self {
        Self {
            code: Some("RATE_LIMIT_EXCEEDED"),
            retry_after_seconds: Some(retry_after_seconds),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, message)
        }
    }

    pub fn bot_burst(message: impl Into<String>) -> Self {
        Self {
            code: Some("BOT_BURST_DETECTED"),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, message)
        }
    }

    pub fn bot_blocked(message: impl Into<String>) -> Self {
        Self {
            code: Some("BOT_DETECTED"),
            ..Self::new(StatusCode::FORBIDDEN, message)
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            code: Some("REQUEST_BLOCKED"),
            ..Self::new(StatusCode::FORBIDDEN, message)
        }
    }

    pub fn no_media(message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            code: Some("NO_MEDIA_FOUND"),
            details,
            ..Self::new(StatusCode::NOT_FOUND, message)
        }
    }

    pub fn upstream(status: StatusCode, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            code: Some("UPSTREAM_ERROR"),
            details,
            ..Self::new(status, message)
        }
    }

    pub fn invalid_shape() -> Self {
        Self {
            code: Some("INVALID_RESPONSE_FORMAT"),
            ..Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Invalid API response format",
            )
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            code: Some("SERVICE_UNREACHABLE"),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            status: "error",
            message: self.message,
            code: self.code,
            details: self.details,
            retry_after_seconds: self.retry_after_seconds,
        });

        let mut response = (self.status, body).into_response();
        if let Some(seconds) = self.retry_after_seconds
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }

        response
    }
}
