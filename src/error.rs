//! Error types shared by the stores and the web layer.
//!
//! A missing backing file is never an error here; every store treats it as
//! an empty store. What does surface is real I/O trouble and unparsable
//! store content, both of which are fatal to the request that hit them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON in {path}: {source}")]
    MalformedJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed table in {path}: {reason}")]
    MalformedTable { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("request failed: {self}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal error: {self}"),
        )
            .into_response()
    }
}
