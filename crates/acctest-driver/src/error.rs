use acctest_domain::DomainError;
use thiserror::Error;

/// Failures talking to the system of record.
///
/// "Not found" is never an error here: absent resources and absent parents
/// come back as values (`Resolution`, `DeleteOutcome::AlreadyAbsent`).
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{method} {url}: {message}")]
    Http {
        method: String,
        url: String,
        message: String,
    },

    #[error("{method} {url}: status {status}: {message}")]
    Status {
        method: String,
        url: String,
        status: u16,
        message: String,
    },

    #[error(transparent)]
    MissingAttribute(#[from] DomainError),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("no driver registered for resource type '{0}'")]
    UnsupportedType(String),

    #[error("lookup cancelled: {0}")]
    Cancelled(String),
}

/// Failures from an apply engine.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The resource already exists outside this configuration's state.
    #[error("{message}")]
    ImportRequired {
        address: String,
        id: String,
        message: String,
    },

    /// The configuration could not be evaluated (bad reference, missing argument).
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("{command} exited with code {code}:\n{output}")]
    Failed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("{command} timed out after {minutes} minutes")]
    Timeout { command: String, minutes: u64 },

    #[error("workspace io: {0}")]
    Io(String),

    #[error("decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error(transparent)]
    Lookup(#[from] LookupError),
}
