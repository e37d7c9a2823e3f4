use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalletError>;

#[derive(Error, Debug)]
pub enum WalletError {
    /// Bad user input, rejected synchronously before any state change.
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    /// Undecodable or invalid negotiation state.
    #[error("negotiation protocol error: {0}")]
    Protocol(String),
    #[error("ledger error: {0}")]
    Ledger(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}
