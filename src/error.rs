use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no route matches path {path}")]
    RouteNotFound { path: String },

    #[error("unknown service {service}")]
    UnknownService { service: String },

    #[error("rate limit exceeded")]
    QuotaExceeded,

    #[error("rate limit store error: {0}")]
    Store(String),

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to send request to {target}: {source}")]
    Send {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read response body from {target}: {source}")]
    ResponseBody {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::Store(err.to_string())
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } | GatewayError::UnknownService { .. } => {
                StatusCode::NOT_FOUND
            }
            GatewayError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InvalidTarget { .. }
            | GatewayError::Send { .. }
            | GatewayError::ResponseBody { .. }
            | GatewayError::Configuration(_)
            | GatewayError::Validation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Internal failure detail carried on an error response.
///
/// Never serialized into the body; the request observer picks it up from
/// the response extensions and writes it to the access log.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_gateway_error(err: &GatewayError) -> Self {
        let code = err.status().as_u16();
        match err.status() {
            StatusCode::NOT_FOUND => Self::new("not_found", "Not Found", code),
            StatusCode::TOO_MANY_REQUESTS => {
                Self::new("rate_limit_exceeded", "Too Many Requests", code)
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                Self::new("service_unavailable", "Service Unavailable", code)
            }
            _ => Self::new("internal_error", "Internal Server Error", code),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_gateway_error(&self);
        let mut response = (self.status(), Json(body)).into_response();
        response
            .extensions_mut()
            .insert(ErrorDetail(self.to_string()));
        response
    }
}
