use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use babylog_store::StoreError;
use serde::Serialize;
use snafu::Snafu;
use tracing::info;

const LOG_TARGET: &str = "babylog::server";

#[derive(Debug, Snafu)]
pub enum RequestError {
    #[snafu(display("missing or invalid access token"))]
    Unauthorized,
    #[snafu(display("family not found"))]
    NotFound,
    #[snafu(transparent)]
    Store { source: StoreError },
}

pub type RequestResult<T> = std::result::Result<T, RequestError>;

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        info!(target: LOG_TARGET, err = %self, "Request error");

        let status = match &self {
            RequestError::Unauthorized => StatusCode::UNAUTHORIZED,
            RequestError::NotFound => StatusCode::NOT_FOUND,
            RequestError::Store {
                source: StoreError::FamilyNotFound { .. },
            } => StatusCode::NOT_FOUND,
            RequestError::Store {
                source: StoreError::TokenNotUsable { .. },
            } => StatusCode::UNAUTHORIZED,
            RequestError::Store {
                source: StoreError::Storage { .. } | StoreError::Transaction { .. } | StoreError::Transient { .. },
            } => StatusCode::SERVICE_UNAVAILABLE,
            RequestError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "internal server error".to_string(),
            _ => self.to_string(),
        };

        (status, axum::Json(ErrorBody { message })).into_response()
    }
}
