use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    /// The envelope carries one of our tags but its payload does not parse.
    #[error("malformed {tag} message: {reason}")]
    Malformed { tag: String, reason: String },

    #[error("{tag} message is missing `{field}`")]
    MissingField { tag: String, field: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
