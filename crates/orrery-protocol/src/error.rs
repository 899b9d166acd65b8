//! Error types for orrery-protocol.

use thiserror::Error;

/// Result type for envelope decoding and encoding.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding or encoding wire envelopes.
#[derive(Error, Debug)]
pub enum Error {
    /// The frame was not valid JSON, or a payload did not match its schema.
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame decoded to JSON but not to an object.
    #[error("Envelope must be a JSON object")]
    NotAnObject,

    /// The object matched none of the Call, Response or Notification shapes.
    #[error("Unrecognized envelope shape: {0}")]
    UnknownShape(String),

    /// A field required by the detected shape is absent.
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    /// A field is present but unusable.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The envelope variant has no wire representation.
    #[error("Envelope cannot be encoded: {0}")]
    Unencodable(String),
}
