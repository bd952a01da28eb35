use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use super::store::StoreError;

/// Message returned for every failed face login. It must not reveal whether
/// the account has face login enabled.
pub const UNAUTHORIZED_MESSAGE: &str = "Face not recognized";

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("descriptor must have {expected} values, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("descriptor value at index {index} is not a finite number")]
    NonFinite { index: usize },

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("{}", UNAUTHORIZED_MESSAGE)]
    Unauthorized,

    /// A valid token whose account no longer exists.
    #[error("User not found")]
    UnknownAccount,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl FaceError {
    pub fn status(&self) -> StatusCode {
        match self {
            FaceError::InvalidLength { .. }
            | FaceError::NonFinite { .. }
            | FaceError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            FaceError::Unauthorized | FaceError::UnknownAccount => StatusCode::UNAUTHORIZED,
            FaceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for FaceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownUser(_) => FaceError::UnknownAccount,
            StoreError::Other(e) => FaceError::Internal(e),
        }
    }
}

impl IntoResponse for FaceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            FaceError::Internal(e) => {
                error!(error = %e, "face request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
