use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid resource address: {0}")]
    InvalidAddress(String),

    #[error("resource '{0}' not found in state")]
    ResourceNotInState(String),

    #[error("resource '{address}' has no value for attribute '{key}'")]
    MissingAttribute { address: String, key: String },
}
