use log::error;
use rouille::Response;
use serde_json::json;
use thiserror::Error;

use crate::{domain::tag::TagIdError, storage::error::StorageError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    TooLarge(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SongNotFound(name) => ApiError::NotFound(format!("song {name} not found")),

            StorageError::InvalidName(name) => {
                ApiError::BadRequest(format!("{name:?} is not a valid song name"))
            }

            StorageError::TooLarge { limit } => {
                ApiError::TooLarge(format!("uploads are limited to {limit} bytes"))
            }

            StorageError::Corrupt { .. }
            | StorageError::DurableWrite(_)
            | StorageError::Fs(_)
            | StorageError::Internal(_) => {
                error!("{err}");
                ApiError::Internal("internal server error".into())
            }
        }
    }
}

impl From<TagIdError> for ApiError {
    fn from(err: TagIdError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::BadRequest(_) => 400,
            ApiError::TooLarge(_) => 413,
            ApiError::Unavailable(_) => 503,
            ApiError::Internal(_) => 500,
        }
    }

    pub fn into_response(self) -> Response {
        Response::json(&json!({ "success": false, "error": self.to_string() }))
            .with_status_code(self.status_code())
    }
}
