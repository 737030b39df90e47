//! JSON message codec for the real-time transcription protocol.
//!
//! Inbound messages are classified by their `message_type` discriminator and
//! may carry an `error` indicator alongside (or instead of) a discriminator.
//! Audio travels outbound as raw binary frames and never passes through here.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use uuid::Uuid;

/// Close code reported when a close frame carries no status
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when the connection ends without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code for a locally initiated orderly close
pub const CLOSE_NORMAL: u16 = 1000;

/// Inbound message discriminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    SessionBegins,
    PartialTranscript,
    FinalTranscript,
    SessionTerminated,
    Unknown(String),
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "SessionBegins" => MessageType::SessionBegins,
            "PartialTranscript" => MessageType::PartialTranscript,
            "FinalTranscript" => MessageType::FinalTranscript,
            "SessionTerminated" => MessageType::SessionTerminated,
            other => MessageType::Unknown(other.to_string()),
        }
    }
}

/// A decoded inbound control or result message
#[derive(Debug, Clone)]
pub struct ServerMessage {
    pub message_type: Option<MessageType>,
    pub error: Option<String>,
    body: Value,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    fn from_value(body: Value) -> Result<Self, serde_json::Error> {
        let message_type = body
            .get("message_type")
            .and_then(Value::as_str)
            .map(MessageType::from);

        let error = match body.get("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(message)) => Some(message.clone()),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self {
            message_type,
            error,
            body,
        })
    }

    pub fn session_begins(&self) -> Result<SessionBegins, serde_json::Error> {
        SessionBegins::deserialize(&self.body)
    }

    pub fn transcript_body(&self) -> Result<TranscriptBody, serde_json::Error> {
        TranscriptBody::deserialize(&self.body)
    }
}

/// Handshake result: the first message of every successful session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionBegins {
    pub session_id: Uuid,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub expires_at: DateTime<Utc>,
}

/// The service sends naive timestamps; they are UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc()),
    }
}

/// A recognised word with timing in milliseconds. Missing fields default.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Word {
    pub start: u64,
    pub end: u64,
    pub confidence: f64,
    #[serde(deserialize_with = "null_as_empty")]
    pub text: String,
}

/// Payload shared by partial and final transcripts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptBody {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(default)]
    pub audio_start: Option<u64>,
    #[serde(default)]
    pub audio_end: Option<u64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub words: Vec<Word>,
    /// Final transcripts only
    #[serde(default)]
    pub punctuated: Option<bool>,
    /// Final transcripts only
    #[serde(default)]
    pub text_formatted: Option<bool>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Partial,
    Final,
}

/// A recognition result. Partials may be revised; finals are not.
#[derive(Debug, Clone, PartialEq)]
pub enum Transcript {
    Partial(TranscriptBody),
    Final(TranscriptBody),
}

impl Transcript {
    pub fn text(&self) -> &str {
        &self.body().text
    }

    pub fn body(&self) -> &TranscriptBody {
        match self {
            Transcript::Partial(body) | Transcript::Final(body) => body,
        }
    }

    pub fn kind(&self) -> TranscriptKind {
        match self {
            Transcript::Partial(_) => TranscriptKind::Partial,
            Transcript::Final(_) => TranscriptKind::Final,
        }
    }

    pub fn is_final(&self) -> bool {
        self.kind() == TranscriptKind::Final
    }
}

/// An `error` indicator reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotification {
    pub message: String,
}

/// How the connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureInfo {
    pub code: u16,
    pub reason: String,
}

impl ClosureInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn from_frame(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self::new(u16::from(frame.code), frame.reason.to_string()),
            None => Self::new(CLOSE_NO_STATUS, ""),
        }
    }
}

#[derive(Serialize)]
struct TerminateSession {
    terminate_session: bool,
}

/// The control message that asks the server to end the session
pub fn terminate_session_message() -> String {
    serde_json::to_string(&TerminateSession {
        terminate_session: true,
    })
    .unwrap_or_else(|_| r#"{"terminate_session":true}"#.to_string())
}
