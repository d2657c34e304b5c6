use goalhunt_logic::{ClientEvent, ServerEvent};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

/// How outbound events are put on the wire. Inbound frames are accepted in either encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameEncoding {
    /// JSON in text frames
    #[default]
    Json,
    /// MessagePack in binary frames
    MessagePack,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed MessagePack frame: {0}")]
    MessagePack(#[from] rmp_serde::decode::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

pub fn encode(event: &ClientEvent, encoding: FrameEncoding) -> Result<Message, FrameError> {
    Ok(match encoding {
        FrameEncoding::Json => Message::text(serde_json::to_string(event)?),
        // Named so variants and coordinates decode the same way JSON ones do
        FrameEncoding::MessagePack => Message::binary(rmp_serde::to_vec_named(event)?),
    })
}

/// Decode an inbound frame, control frames decode to `None`
pub fn decode(frame: &Message) -> Result<Option<ServerEvent>, FrameError> {
    match frame {
        Message::Text(text) => Ok(Some(serde_json::from_str(text.as_str())?)),
        Message::Binary(bytes) => Ok(Some(rmp_serde::from_slice(bytes)?)),
        _ => Ok(None),
    }
}
