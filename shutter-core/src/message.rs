//! Wire messages exchanged with the controller.
//!
//! Every frame is a JSON object `{"type": <MessageType>, "message": ...}`
//! carried in a websocket text frame. Decoding is total: any input maps
//! to a [`Command`] or a [`DecodeError`].

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, ShutterError};

/// Prefix of the encoded image string in `RECEIVE_PHOTO`.
pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

// ── MessageType ──────────────────────────────────────────────────

/// The `type` tag of a wire frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    OpenCamera,
    TakePhoto,
    ReceivePhoto,
    CancelTask,
}

impl MessageType {
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageType::OpenCamera => "OPEN_CAMERA",
            MessageType::TakePhoto => "TAKE_PHOTO",
            MessageType::ReceivePhoto => "RECEIVE_PHOTO",
            MessageType::CancelTask => "CANCEL_TASK",
        }
    }
}

impl FromStr for MessageType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN_CAMERA" => Ok(MessageType::OpenCamera),
            "TAKE_PHOTO" => Ok(MessageType::TakePhoto),
            "RECEIVE_PHOTO" => Ok(MessageType::ReceivePhoto),
            "CANCEL_TASK" => Ok(MessageType::CancelTask),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ArtifactMessage ──────────────────────────────────────────────

/// Body of an outbound `RECEIVE_PHOTO` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMessage {
    pub width: u32,
    pub height: u32,
    /// `data:image/jpeg;base64,...`
    pub image: String,
    #[serde(rename = "resultUri")]
    pub result_uri: String,
    /// Tag identifying the sending device (its address).
    pub ip: String,
}

impl ArtifactMessage {
    /// Decode the JPEG bytes carried in [`image`](Self::image).
    pub fn image_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        decode_data_uri(&self.image)
    }
}

// ── Command ──────────────────────────────────────────────────────

/// The closed set of commands understood by the agent.
///
/// Only `OpenSensor` and `CaptureNow` are acted upon when received.
/// `ReceiveArtifact` is the outbound shape, and `CancelTask` is
/// reserved: it decodes but has no handler yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Warm up the sensor (`OPEN_CAMERA`).
    OpenSensor,
    /// Take a photo now (`TAKE_PHOTO`).
    CaptureNow,
    /// A captured artifact (`RECEIVE_PHOTO`).
    ReceiveArtifact(ArtifactMessage),
    /// Cancel the current task (`CANCEL_TASK`).
    CancelTask,
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a ArtifactMessage>,
}

impl Command {
    pub fn message_type(&self) -> MessageType {
        match self {
            Command::OpenSensor => MessageType::OpenCamera,
            Command::CaptureNow => MessageType::TakePhoto,
            Command::ReceiveArtifact(_) => MessageType::ReceivePhoto,
            Command::CancelTask => MessageType::CancelTask,
        }
    }

    /// Decode one wire frame.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let envelope: InboundEnvelope =
            serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        match envelope.kind.parse::<MessageType>()? {
            MessageType::OpenCamera => Ok(Command::OpenSensor),
            MessageType::TakePhoto => Ok(Command::CaptureNow),
            MessageType::CancelTask => Ok(Command::CancelTask),
            MessageType::ReceivePhoto => {
                let body = envelope.message.ok_or(DecodeError::InvalidMessage {
                    kind: MessageType::ReceivePhoto.as_str(),
                    reason: "missing message".into(),
                })?;
                let msg = serde_json::from_value(body).map_err(|e| DecodeError::InvalidMessage {
                    kind: MessageType::ReceivePhoto.as_str(),
                    reason: e.to_string(),
                })?;
                Ok(Command::ReceiveArtifact(msg))
            }
        }
    }

    /// Encode as a wire frame.
    pub fn encode(&self) -> Result<String, ShutterError> {
        let message = match self {
            Command::ReceiveArtifact(msg) => Some(msg),
            _ => None,
        };
        let envelope = OutboundEnvelope {
            kind: self.message_type().as_str(),
            message,
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::OpenSensor => write!(f, "OpenSensor"),
            Command::CaptureNow => write!(f, "CaptureNow"),
            Command::ReceiveArtifact(msg) => {
                write!(f, "ReceiveArtifact({}x{})", msg.width, msg.height)
            }
            Command::CancelTask => write!(f, "CancelTask"),
        }
    }
}

// ── Data URI helpers ─────────────────────────────────────────────

/// Wrap JPEG bytes as `data:image/jpeg;base64,<payload>`.
pub fn encode_data_uri(jpeg: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg);
    let mut out = String::with_capacity(JPEG_DATA_URI_PREFIX.len() + encoded.len());
    out.push_str(JPEG_DATA_URI_PREFIX);
    out.push_str(&encoded);
    out
}

/// Inverse of [`encode_data_uri`].
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, DecodeError> {
    let payload = uri
        .strip_prefix(JPEG_DATA_URI_PREFIX)
        .ok_or_else(|| DecodeError::InvalidDataUri("missing jpeg data uri prefix".into()))?;
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| DecodeError::InvalidDataUri(e.to_string()))
}

// ── Tests ────────────────────────────────────────────────────────
