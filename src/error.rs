//! Error types for mapper-engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapperError {
    /// Malformed request data, rejected before any write
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The mutation would break a protected structural or option rule
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MapperError {
    /// Whether the caller sent something the engine refuses to act on.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MapperError::InvalidInput(_) | MapperError::NotFound(_) | MapperError::Invariant(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(MapperError::InvalidInput("bad".into()).is_client_error());
        assert!(MapperError::NotFound("map".into()).is_client_error());
        assert!(MapperError::Invariant("last floor".into()).is_client_error());
        assert!(!MapperError::Internal("boom".into()).is_client_error());
        assert!(!MapperError::Database(diesel::result::Error::RollbackTransaction).is_client_error());
    }
}
