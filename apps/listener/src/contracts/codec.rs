use serde::{de::DeserializeOwned, Serialize};

use super::event::Event;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to marshal event: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to unmarshal event: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to unmarshal event: invalid event name: {0:?}")]
    InvalidName(String),
}

/// Serializes an event into the JSON wire envelope.
pub fn encode<P: Serialize>(event: &Event<P>) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(event).map_err(CodecError::Encode)
}

/// Parses a message body into an event.
///
/// The returned event is built from scratch; on error nothing is handed back.
pub fn decode<P: DeserializeOwned>(bytes: &[u8]) -> Result<Event<P>, CodecError> {
    let event: Event<P> = serde_json::from_slice(bytes).map_err(CodecError::Decode)?;

    if event.name.trim().is_empty() {
        return Err(CodecError::InvalidName(event.name));
    }

    Ok(event)
}
