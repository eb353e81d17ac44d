use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use veilchat_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not authenticated")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        if err.is_internal() {
            tracing::error!(error = %err, "store failure");
            return ServerError::Internal(err.to_string());
        }
        match err {
            StoreError::NotAuthenticated => ServerError::Unauthorized,
            StoreError::Forbidden(reason) => ServerError::Forbidden(reason),
            StoreError::NotAParticipant => {
                ServerError::Forbidden("not a participant in this conversation".into())
            }
            e @ StoreError::NotFound(_) => ServerError::NotFound(e.to_string()),
            StoreError::Validation(reason) => ServerError::BadRequest(reason),
            StoreError::Conflict(reason) => ServerError::Conflict(reason),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::RateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, self.to_string())
            }
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let ServerError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_taxonomy_maps_to_status_codes() {
        let cases = [
            (StoreError::NotAuthenticated, StatusCode::UNAUTHORIZED),
            (StoreError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (StoreError::NotAParticipant, StatusCode::FORBIDDEN),
            (StoreError::NotFound("Message"), StatusCode::NOT_FOUND),
            (StoreError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (StoreError::Conflict("x".into()), StatusCode::CONFLICT),
            (StoreError::NoDataDir, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = ServerError::RateLimited {
            retry_after_secs: 3,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }
}
