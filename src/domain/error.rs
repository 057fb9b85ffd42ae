use thiserror::Error;

use super::tile::tile_bounds_message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("{}", tile_bounds_message(.index, .grid_size))]
    InvalidTileIndex { index: i64, grid_size: i64 },
}

impl DomainError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn invalid_tile_index(index: i64, grid_size: i64) -> Self {
        Self::InvalidTileIndex { index, grid_size }
    }
}
