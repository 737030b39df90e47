//! Client-side session engine for real-time streaming transcription.
//!
//! A [`RealtimeTranscriber`] negotiates a WebSocket session with the
//! transcription service, streams binary audio frames, and fans inbound
//! results out to registered observers and to pull-based [`Conduit`]s.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod session;

pub use config::{AudioEncoding, ConfigError, TranscriberConfig};
pub use dispatch::{Conduit, ConduitCapacity, ObserverRegistry, OverflowPolicy};
pub use error::{Result, TranscriberError};
pub use protocol::{ClosureInfo, ErrorNotification, SessionBegins, Transcript, TranscriptBody, TranscriptKind};
pub use session::{RealtimeTranscriber, SessionState};
