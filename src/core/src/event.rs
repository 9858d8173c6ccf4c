//! Event protocol streamed to clients during a pack request.
//!
//! Every event is framed for server-sent events as `data: <json>\n\n`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{PackerError, Result};

/// Event severity / kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Error,
    Success,
    /// Verbatim daemon output
    Raw,
    /// Terminal success marker
    Done,
}

/// Pipeline phase that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Init,
    Pull,
    Pack,
    Finish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Pull => write!(f, "pull"),
            Self::Pack => write!(f, "pack"),
            Self::Finish => write!(f, "finish"),
        }
    }
}

/// Metadata describing a finished artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// Download path, e.g. `/download/nginx_latest_1700000000000.tar`
    pub url: String,
    /// Formatted size, e.g. `"12.34 MB"`
    pub size: String,
    pub filename: String,
    /// Literal command that loads the artifact into a daemon
    pub cmd_load: String,
    #[serde(rename = "tips")]
    pub tip: String,
}

/// Structured event payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    #[default]
    None,
    Artifact(ArtifactSummary),
}

impl Payload {
    pub fn is_none(&self) -> bool {
        matches!(self, Payload::None)
    }
}

/// One unit of the outbound protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Seconds since the Unix epoch
    #[serde(rename = "ts")]
    pub timestamp: i64,

    pub level: Level,

    pub stage: Stage,

    #[serde(rename = "msg")]
    pub content: String,

    #[serde(default, skip_serializing_if = "Payload::is_none")]
    pub payload: Payload,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(level: Level, stage: Stage, content: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            level,
            stage,
            content: content.into(),
            payload: Payload::None,
        }
    }

    /// Create the terminal success event carrying artifact metadata
    pub fn done(content: impl Into<String>, summary: ArtifactSummary) -> Self {
        Self {
            payload: Payload::Artifact(summary),
            ..Self::new(Level::Done, Stage::Finish, content)
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self.level, Level::Done | Level::Error)
    }

    /// Encode the event as a server-sent-events frame.
    pub fn to_frame(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("data: {}\n\n", json))
    }

    /// Decode a single `data: <json>` frame (surrounding whitespace ignored).
    pub fn from_frame(frame: &str) -> Result<Self> {
        let json = frame
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| PackerError::Serialization(format!("not an event frame: {frame}")))?;
        Ok(serde_json::from_str(json.trim())?)
    }
}

/// Writes events into the response channel of one request.
///
/// The receiving half is turned into the streaming response body, so a
/// send fails exactly when the client has disconnected.
#[derive(Clone)]
pub struct EventEmitter {
    sender: mpsc::Sender<String>,
}

impl EventEmitter {
    /// Create an emitter and the receiver that feeds the response body
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Emit an event.
    ///
    /// Returns [`PackerError::ClientGone`] if the receiver has been dropped.
    pub async fn emit(&self, event: Event) -> Result<()> {
        let frame = event.to_frame()?;
        self.sender
            .send(frame)
            .await
            .map_err(|_| PackerError::ClientGone)
    }

    /// Emit an event without payload
    pub async fn send(&self, level: Level, stage: Stage, content: impl Into<String>) -> Result<()> {
        self.emit(Event::new(level, stage, content)).await
    }

    pub async fn info(&self, stage: Stage, content: impl Into<String>) -> Result<()> {
        self.send(Level::Info, stage, content).await
    }

    pub async fn success(&self, stage: Stage, content: impl Into<String>) -> Result<()> {
        self.send(Level::Success, stage, content).await
    }

    pub async fn error(&self, stage: Stage, content: impl Into<String>) -> Result<()> {
        self.send(Level::Error, stage, content).await
    }

    pub async fn raw(&self, stage: Stage, content: impl Into<String>) -> Result<()> {
        self.send(Level::Raw, stage, content).await
    }

    /// Whether the client side has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolves once the client side has gone away.
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> ArtifactSummary {
        ArtifactSummary {
            url: "/download/nginx_latest_1.tar".to_string(),
            size: "1.00 MB".to_string(),
            filename: "nginx_latest_1.tar".to_string(),
            cmd_load: "docker load -i nginx_latest_1.tar".to_string(),
            tip: "load directly".to_string(),
        }
    }

    #[test]
    fn test_event_wire_fields() {
        let event = Event::new(Level::Info, Stage::Pull, "Pulling nginx:latest");
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["level"], "info");
        assert_eq!(value["stage"], "pull");
        assert_eq!(value["msg"], "Pulling nginx:latest");
        assert!(value["ts"].is_i64());
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_done_event_payload() {
        let event = Event::done("ok", summary());
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["level"], "done");
        assert_eq!(value["stage"], "finish");
        assert_eq!(value["payload"]["url"], "/download/nginx_latest_1.tar");
        assert_eq!(value["payload"]["cmd_load"], "docker load -i nginx_latest_1.tar");
        assert_eq!(value["payload"]["tips"], "load directly");
        assert!(value["payload"].get("tip").is_none());
    }

    #[test]
    fn test_frame_format() {
        let frame = Event::new(Level::Raw, Stage::Pull, "x").to_frame().unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));
    }

    #[test]
    fn test_frame_decode() {
        let event = Event::done("ok", summary());
        let decoded = Event::from_frame(&event.to_frame().unwrap()).unwrap();
        assert_eq!(decoded, event);

        let plain = Event::new(Level::Error, Stage::Init, "bad");
        let decoded = Event::from_frame(&plain.to_frame().unwrap()).unwrap();
        assert_eq!(decoded.payload, Payload::None);
        assert!(Event::from_frame("event: ping").is_err());
    }

    #[test]
    fn test_is_terminal() {
        assert!(Event::done("ok", summary()).is_terminal());
        assert!(Event::new(Level::Error, Stage::Pack, "x").is_terminal());
        assert!(!Event::new(Level::Success, Stage::Pull, "x").is_terminal());
        assert!(!Event::new(Level::Raw, Stage::Pull, "x").is_terminal());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Init.to_string(), "init");
        assert_eq!(Stage::Finish.to_string(), "finish");
    }

    #[tokio::test]
    async fn test_emitter_delivers_in_order() {
        let (emitter, mut rx) = EventEmitter::channel(8);
        emitter.info(Stage::Pull, "one").await.unwrap();
        emitter.raw(Stage::Pull, "two").await.unwrap();
        emitter.success(Stage::Pull, "three").await.unwrap();
        drop(emitter);

        let mut messages = Vec::new();
        while let Some(frame) = rx.recv().await {
            messages.push(Event::from_frame(&frame).unwrap().content);
        }
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_emitter_reports_client_gone() {
        let (emitter, rx) = EventEmitter::channel(8);
        drop(rx);
        assert!(emitter.is_closed());
        let err = emitter.error(Stage::Init, "x").await.unwrap_err();
        assert!(err.is_client_gone());
    }
}
