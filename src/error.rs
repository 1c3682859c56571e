use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request")]
    BadRequest,

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()).into_response(),
            AppError::BadRequest => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
            AppError::Store(StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, "Not Found").into_response()
            }
            AppError::Store(
                StoreError::LimitExceeded(_)
                | StoreError::InvalidStay
                | StoreError::InvalidRestriction(_),
            ) => (StatusCode::BAD_REQUEST, "Bad Request").into_response(),
            other => {
                error!("{other}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::NotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::BadRequest.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::from(StoreError::reservation(3)).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(StoreError::LimitExceeded("field too long"))
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StoreError::WalError("disk full".into()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
