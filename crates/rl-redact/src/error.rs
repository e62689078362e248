use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedactionError>;

/// Anonymization failures. Messages never include document values.
#[derive(Error, Debug)]
pub enum RedactionError {
    #[error("placeholder key: {0}")]
    Key(String),

    #[error("entity document must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("key file: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("key file is not valid JSON: {0}")]
    KeyFileFormat(#[from] serde_json::Error),

    #[error("HMAC rejected the key")]
    Mac,
}
