#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown sequence: {0}")]
    UnknownSequence(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}
