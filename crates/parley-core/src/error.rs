//! Errors surfaced by the message pipeline.

use crate::crypto::CryptoError;
use crate::store::StoreError;
use thiserror::Error;

/// Message pipeline errors.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A required field was empty. Nothing was persisted.
    #[error("Invalid message: {0}")]
    Validation(String),

    /// The body could not be encrypted. Nothing was persisted.
    #[error("Encryption failed: {0}")]
    Encryption(#[from] CryptoError),

    /// The store rejected the write. Nothing was broadcast.
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl ChatError {
    /// Status code reported to the client in an `error` event.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            ChatError::Validation(_) => 400,
            ChatError::Encryption(_) => 500,
            ChatError::Persistence(_) => 503,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ChatError::Validation("empty".into()).code(), 400);
        assert_eq!(
            ChatError::from(CryptoError::Encrypt("bad key".into())).code(),
            500
        );
        assert_eq!(
            ChatError::from(StoreError::NotFound("room".into())).code(),
            503
        );
    }
}
