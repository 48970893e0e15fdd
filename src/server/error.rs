// src/server/error.rs

use thiserror::Error;
use warp::http::StatusCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("PIN expired or not found")]
    NotFound,

    // Unreachable while fetch removes the entry in one step; kept so the
    // 410 contract stays distinct from 404.
    #[error("Data already consumed")]
    AlreadyConsumed,

    #[error("Failed to generate unique PIN after {attempts} attempts")]
    PinSpaceExhausted { attempts: u32 },
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::AlreadyConsumed => StatusCode::GONE,
            StoreError::PinSpaceExhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
