use thiserror::Error;

/// Export macros for creating errors
mod macros;

#[derive(Error, Debug)]
pub enum AllowanceError {
    #[error("sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("conversion error: {0}")]
    ConversionError(#[from] crate::utils::ConversionError),
    #[error("web3 error: {0}")]
    Web3Error(#[from] web3::Error),
    #[error("abi error: {0}")]
    Web3AbiError(#[from] web3::ethabi::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Request timed out after {0} ms")]
    Timeout(u128),
    #[error("All rpc endpoints for chain {chain_id} are failing or cooling down")]
    EndpointsExhausted { chain_id: u64 },
    #[error("Unknown or disabled chain: {0}")]
    UnknownChain(u64),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Malformed event: {0}")]
    DecodeError(String),
    #[error("Scan cancelled")]
    Cancelled,
    #[error("Other error: {0}")]
    OtherError(String),
}

impl AllowanceError {
    /// Failures that go away on their own and should be retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AllowanceError::Web3Error(_)
                | AllowanceError::Timeout(_)
                | AllowanceError::EndpointsExhausted { .. }
                | AllowanceError::IoError(_)
        )
    }

    /// Failures an operator has to fix before a scan can succeed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AllowanceError::ConfigError(_) | AllowanceError::UnknownChain(_)
        )
    }

    /// Whether the retry wrapper may immediately try again.
    ///
    /// Exhausted endpoints are transient but are left to the next scheduled
    /// scan so the circuit breaker cooldown is respected.
    pub fn is_retryable(&self) -> bool {
        match self {
            AllowanceError::EndpointsExhausted { .. } => false,
            AllowanceError::Web3Error(e) => !crate::rpc::transport::is_deterministic_error(e),
            e => e.is_transient(),
        }
    }
}
