// region:    --- Imports
use crate::bidding::rules::BidRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

// endregion: --- Imports

// region:    --- Error

/// Error taxonomy for the marketplace core. Every user-input failure carries
/// the specific reason so clients can react (e.g. prompt to raise a bid).
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Rejected(#[from] BidRejection),

    #[error("insufficient balance: {balance} available, {required} required")]
    InsufficientFunds { balance: i64, required: i64 },

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),
}

impl MarketError {
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::NotFound(_) => "NOT_FOUND",
            MarketError::Forbidden(_) => "FORBIDDEN",
            MarketError::Conflict(_) => "CONFLICT",
            MarketError::Validation(_) => "INVALID_REQUEST",
            MarketError::Rejected(r) => r.code(),
            MarketError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            MarketError::Store(_) => "STORAGE",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            MarketError::NotFound(_) => StatusCode::NOT_FOUND,
            MarketError::Forbidden(_) => StatusCode::FORBIDDEN,
            MarketError::Conflict(_) => StatusCode::CONFLICT,
            MarketError::Validation(_) => StatusCode::BAD_REQUEST,
            MarketError::Rejected(r) => match r {
                BidRejection::SelfBid => StatusCode::FORBIDDEN,
                BidRejection::NotStarted | BidRejection::Ended => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            },
            MarketError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            MarketError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        (self.status(), body).into_response()
    }
}

// endregion: --- Error
