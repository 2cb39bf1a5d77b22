//! Lifecycle and session event types

use serde::{Deserialize, Serialize};

/// Which component raised an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Server,
    Session,
}

/// What happened
///
/// Mirrors the vocabulary the orchestrator logs: connected, log, error,
/// stopped, chat, kicked (plus disconnected for remote-initiated closes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// The avatar spawned and the session is usable
    Connected { username: String },
    /// One line of supervised process output
    Log { line: String },
    /// An error reported by the process or the session
    Error { message: String },
    /// The supervised process exited
    Stopped { code: Option<i32> },
    /// A chat line observed by the avatar
    Chat { username: String, message: String },
    /// The avatar was removed by the server
    Kicked { reason: String },
    /// The session closed without a local disconnect request
    Disconnected { reason: String },
}

/// An event emitted by the supervisor or the session client
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarEvent {
    pub source: EventSource,
    #[serde(flatten)]
    pub kind: EventKind,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl AvatarEvent {
    /// Create a new event stamped with the current time
    pub fn new(source: EventSource, kind: EventKind) -> Self {
        Self {
            source,
            kind,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Sink for avatar events
///
/// Implementations must never block or panic; events nobody listens to are dropped.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: AvatarEvent);

    fn emit_log(&self, line: impl Into<String>)
    where
        Self: Sized,
    {
        self.emit(AvatarEvent::new(
            EventSource::Server,
            EventKind::Log { line: line.into() },
        ));
    }

    fn emit_error(&self, source: EventSource, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.emit(AvatarEvent::new(
            source,
            EventKind::Error {
                message: message.into(),
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat() {
        let event = AvatarEvent::new(
            EventSource::Session,
            EventKind::Chat {
                username: "alex".into(),
                message: "hi".into(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "session");
        assert_eq!(json["kind"], "chat");
        assert_eq!(json["username"], "alex");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_stopped_without_code() {
        let event = AvatarEvent::new(EventSource::Server, EventKind::Stopped { code: None });
        let json = serde_json::to_string(&event).unwrap();
        let back: AvatarEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, EventKind::Stopped { code: None });
    }
}
