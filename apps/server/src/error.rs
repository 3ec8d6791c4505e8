use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use businessmap_client::{ClientError, RetryError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Client(#[from] ClientError),
    /// An orchestrated fetch stopped early. The partial result goes back
    /// to the caller with the error.
    #[error("{error}")]
    Fetch {
        error: RetryError,
        envelope: serde_json::Value,
    },
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

impl ApiError {
    pub fn fetch<R: Serialize>(error: RetryError, response: &R) -> Self {
        match serde_json::to_value(response) {
            Ok(envelope) => ApiError::Fetch { error, envelope },
            Err(e) => ApiError::Anyhow(anyhow::anyhow!("{}: {}", error, e)),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    envelope: Option<serde_json::Value>,
}

fn retry_status(error: &RetryError) -> StatusCode {
    if error.is_canceled() {
        StatusCode::REQUEST_TIMEOUT
    } else if error.is_invalid_config() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, envelope) = match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::Client(e) => {
                let status = match &e {
                    e if e.is_invalid_input() => StatusCode::BAD_REQUEST,
                    ClientError::Api(failure) if failure.status == Some(404) => {
                        StatusCode::NOT_FOUND
                    }
                    ClientError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                    ClientError::Retry(err) => retry_status(err),
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, None)
            }
            ApiError::Fetch { error, envelope } => (retry_status(&error), Some(envelope)),
            ApiError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        if status.is_server_error() {
            tracing::warn!("Request failed ({}): {}", status, message);
        }
        let body = Json(ErrorBody {
            code: status.as_u16(),
            message,
            envelope,
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
