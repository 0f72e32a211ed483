//! Error types for the courier-store crate.

use std::io;

use courier_common::QueueId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Queue record not found: {0}")]
    NotFound(QueueId),

    #[error("Recipient {recipient} not found on queue record {id}")]
    RecipientNotFound { id: QueueId, recipient: String },

    #[error("Queue record already exists: {0}")]
    AlreadyExists(QueueId),

    #[error("Store validation error: {0}")]
    Validation(String),

    /// Lock poisoning and other invariant breaks
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
