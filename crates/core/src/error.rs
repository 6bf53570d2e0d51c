/// Errors raised while decoding an inbound text frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Envelope is missing a string \"type\" field")]
    MissingType,
}
