//! API error handling

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
            retry_after_secs: None,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
            retry_after_secs: None,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
            retry_after_secs: None,
        }
    }

    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: format!("Rate limit exceeded, retry in {retry_after_secs}s"),
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "type": match self.status {
                    StatusCode::BAD_REQUEST => "invalid_request_error",
                    StatusCode::NOT_FOUND => "not_found_error",
                    StatusCode::TOO_MANY_REQUESTS => "rate_limit_error",
                    _ => "server_error",
                },
                "retry_after": self.retry_after_secs,
                "code": self.status.as_str()
            }
        }));
        let mut response = (self.status, body).into_response();
        if let Some(retry_after) = self.retry_after_secs {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<reverie_core::Error> for ApiError {
    fn from(err: reverie_core::Error) -> Self {
        match &err {
            reverie_core::Error::Validation(_) => ApiError::bad_request(err.to_string()),
            reverie_core::Error::JobNotFound(_) | reverie_core::Error::ModelNotFound(_) => {
                ApiError::not_found(err.to_string())
            }
            reverie_core::Error::RateLimited { retry_after_secs } => {
                ApiError::too_many_requests(*retry_after_secs)
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_errors_carry_retry_after() {
        let err = ApiError::too_many_requests(42);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "42"
        );
    }

    #[test]
    fn core_validation_maps_to_bad_request() {
        let err: ApiError = reverie_core::Error::Validation("script is empty".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
