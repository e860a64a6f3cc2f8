use crate::transport::TransportError;
use crate::types::OperationId;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ProxyDeckError {
    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("Cannot retry, operation {0} is in progress")]
    OperationInProgress(OperationId),

    #[error("Operation {0} has no retry payload")]
    NotRetryable(OperationId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ProxyDeckError>;
