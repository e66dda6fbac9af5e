//! Response envelopes

use crate::error::Error;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// `{success: true, data}`
pub struct Success<T>(pub T);

impl<T: Serialize> IntoResponse for Success<T> {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": self.0,
            })),
        )
            .into_response()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind.http_status().is_server_error() {
            error!(error_kind = kind.as_str(), error = %self, "request failed");
        }

        let body = json!({
            "success": false,
            "error": true,
            "error_kind": kind.as_str(),
            "message": self.public_message(),
            "retryable": kind.is_retryable(),
        });
        (kind.http_status(), Json(body)).into_response()
    }
}
