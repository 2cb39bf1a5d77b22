//! World link over a newline-delimited JSON gateway
//!
//! The gateway is a small bridge process that speaks the game protocol on the
//! avatar's behalf. Each line on the TCP stream is one JSON object:
//!
//! - requests: `{"id": 7, "method": "dig", "params": {...}}`
//! - responses: `{"id": 7, "result": ...}` or `{"id": 7, "error": "..."}`
//! - pushed events: `{"event": "chat", "data": {...}}`, with events
//!   `spawn`, `position`, `chat`, `kicked`, `error` and `end`
//!
//! Requests may be outstanding concurrently (a navigation goal stays pending
//! while other actions run), so responses are matched by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

use super::error::LinkError;
use super::link::{WorldConnector, WorldLink};
use super::models::{
    AvatarStatus, Block, BlockFace, BlockPos, ControlDimension, EntitySnapshot, EquipDestination,
    Hand, InventoryItem, MovementProfile, NavigationGoal, NavigationOutcome, Position,
};
use crate::events::{AvatarEvent, EventBus, EventEmitter, EventKind, EventSource};
use crate::SessionSettings;

/// How long login may take, spawn included
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

type Reply = Result<Value, LinkError>;

#[derive(Serialize)]
struct Outbound<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Inbound {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ChatData {
    username: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct OutcomeData {
    outcome: NavigationOutcome,
}

/// State shared between the link and its reader task
struct Shared {
    username: String,
    events: EventBus,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    position: watch::Sender<Option<Position>>,
    spawned: watch::Sender<bool>,
    closed: watch::Sender<Option<String>>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Handle one inbound line; returns the close reason on `end`
    fn handle_line(&self, line: &str) -> Option<String> {
        let message: Inbound = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed gateway line");
                return None;
            }
        };

        if let Some(id) = message.id {
            let reply = match message.error {
                Some(error) => Err(LinkError::Rejected(error)),
                None => Ok(message.result.unwrap_or(Value::Null)),
            };
            match self.pending().remove(&id) {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => debug!(id, "Response for unknown request"),
            }
            return None;
        }

        let event = message.event.unwrap_or_default();
        trace!(event = %event, "Gateway event");
        match event.as_str() {
            "spawn" | "position" => {
                match serde_json::from_value::<Position>(message.data) {
                    Ok(pos) => {
                        self.position.send_replace(Some(pos));
                    }
                    Err(e) => warn!(error = %e, "Bad position payload"),
                }
                if event == "spawn" {
                    self.spawned.send_replace(true);
                }
            }
            "chat" => match serde_json::from_value::<ChatData>(message.data) {
                Ok(chat) if chat.username != self.username => {
                    self.events.emit(AvatarEvent::new(
                        EventSource::Session,
                        EventKind::Chat {
                            username: chat.username,
                            message: chat.message,
                        },
                    ));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Bad chat payload"),
            },
            "kicked" => {
                self.events.emit(AvatarEvent::new(
                    EventSource::Session,
                    EventKind::Kicked {
                        reason: text_field(&message.data, "reason"),
                    },
                ));
            }
            "error" => {
                self.events
                    .emit_error(EventSource::Session, text_field(&message.data, "message"));
            }
            "end" => return Some(text_field(&message.data, "reason")),
            other => debug!(event = other, "Unhandled gateway event"),
        }
        None
    }

    /// Mark the link closed and fail every outstanding request
    fn close(&self, reason: String) {
        let first = self.closed.send_if_modified(|closed| {
            if closed.is_none() {
                *closed = Some(reason.clone());
                true
            } else {
                false
            }
        });
        if first {
            debug!(reason = %reason, "Gateway link closed");
        }
        for (_, tx) in self.pending().drain() {
            let _ = tx.send(Err(LinkError::Closed));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }
}

fn text_field(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => match data {
            Value::String(s) => s.clone(),
            _ => String::new(),
        },
    }
}

async fn read_loop(shared: Arc<Shared>, reader: OwnedReadHalf) {
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(reason) = shared.handle_line(&line) {
                    break reason;
                }
            }
            Ok(None) => break "gateway closed the connection".to_string(),
            Err(e) => break format!("gateway read failed: {e}"),
        }
    };
    shared.close(reason);
}

/// Opens [`GatewayLink`]s to the address in [`SessionSettings::gateway`]
pub struct GatewayConnector {
    login_timeout: Duration,
}

impl Default for GatewayConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayConnector {
    pub fn new() -> Self {
        Self {
            login_timeout: LOGIN_TIMEOUT,
        }
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }
}

#[async_trait]
impl WorldConnector for GatewayConnector {
    async fn connect(
        &self,
        settings: &SessionSettings,
        events: EventBus,
    ) -> Result<Arc<dyn WorldLink>, LinkError> {
        let stream = TcpStream::connect(&settings.gateway)
            .await
            .map_err(|e| LinkError::Io(format!("{}: {e}", settings.gateway)))?;
        let (reader, writer) = stream.into_split();
        let link = Arc::new(GatewayLink::new(writer, settings.username.clone(), events));
        tokio::spawn(read_loop(link.shared.clone(), reader));

        let login = async {
            link.call(
                "login",
                json!({
                    "host": settings.host,
                    "port": settings.port,
                    "username": settings.username,
                    "version": settings.version,
                }),
            )
            .await?;
            link.wait_spawned().await
        };

        let outcome = match tokio::time::timeout(self.login_timeout, login).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Io(format!(
                "no spawn within {}s",
                self.login_timeout.as_secs()
            ))),
        };
        if let Err(e) = outcome {
            let _ = link.quit().await;
            return Err(e);
        }

        let link: Arc<dyn WorldLink> = link;
        Ok(link)
    }
}

pub struct GatewayLink {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    next_id: AtomicU64,
}

impl GatewayLink {
    fn new(writer: OwnedWriteHalf, username: String, events: EventBus) -> Self {
        Self {
            shared: Arc::new(Shared {
                username,
                events,
                pending: Mutex::new(HashMap::new()),
                position: watch::channel(None).0,
                spawned: watch::channel(false).0,
                closed: watch::channel(None).0,
            }),
            writer: tokio::sync::Mutex::new(writer),
            next_id: AtomicU64::new(1),
        }
    }

    async fn write_line(&self, id: u64, method: &str, params: Value) -> Result<(), LinkError> {
        let mut line = serde_json::to_string(&Outbound { id, method, params })
            .map_err(|e| LinkError::Protocol(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| LinkError::Io(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| LinkError::Io(e.to_string()))
    }

    /// Send a request and wait for its reply
    async fn call(&self, method: &str, params: Value) -> Result<Value, LinkError> {
        if self.shared.is_closed() {
            return Err(LinkError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);

        trace!(id, method, "Gateway request");
        if let Err(e) = self.write_line(id, method, params).await {
            self.shared.pending().remove(&id);
            return Err(e);
        }
        rx.await.unwrap_or(Err(LinkError::Closed))
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LinkError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| LinkError::Protocol(format!("{method}: {e}")))
    }

    async fn wait_spawned(&self) -> Result<(), LinkError> {
        let mut spawned = self.shared.spawned.subscribe();
        let mut closed = self.shared.closed.subscribe();
        let outcome = tokio::select! {
            result = spawned.wait_for(|s| *s) => result.map(|_| ()).map_err(|_| LinkError::Closed),
            reason = closed.wait_for(Option::is_some) => {
                let reason = reason.ok().and_then(|r| r.clone()).unwrap_or_default();
                Err(LinkError::Rejected(reason))
            }
        };
        outcome
    }
}

fn coords(pos: BlockPos) -> Value {
    json!({ "x": pos.x, "y": pos.y, "z": pos.z })
}

#[async_trait]
impl WorldLink for GatewayLink {
    fn position(&self) -> Option<Position> {
        *self.shared.position.borrow()
    }

    async fn chat(&self, message: &str) -> Result<(), LinkError> {
        self.call("chat", json!({ "message": message })).await?;
        Ok(())
    }

    async fn set_control_state(
        &self,
        control: ControlDimension,
        active: bool,
    ) -> Result<(), LinkError> {
        self.call(
            "setControlState",
            json!({ "control": control.as_str(), "state": active }),
        )
        .await?;
        Ok(())
    }

    async fn block_at(&self, pos: BlockPos) -> Result<Option<Block>, LinkError> {
        self.call_as("blockAt", coords(pos)).await
    }

    async fn place_block(&self, reference: BlockPos, face: BlockFace) -> Result<(), LinkError> {
        let (x, y, z) = face.normal();
        self.call(
            "placeBlock",
            json!({ "reference": coords(reference), "face": { "x": x, "y": y, "z": z } }),
        )
        .await?;
        Ok(())
    }

    async fn dig(&self, pos: BlockPos) -> Result<(), LinkError> {
        self.call("dig", coords(pos)).await?;
        Ok(())
    }

    async fn inventory(&self) -> Result<Vec<InventoryItem>, LinkError> {
        self.call_as("inventory", Value::Null).await
    }

    async fn select_hotbar_slot(&self, slot: u8) -> Result<(), LinkError> {
        self.call("setQuickBarSlot", json!({ "slot": slot })).await?;
        Ok(())
    }

    async fn equip(
        &self,
        item: &InventoryItem,
        destination: EquipDestination,
    ) -> Result<(), LinkError> {
        self.call(
            "equip",
            json!({ "item": item.name, "slot": item.slot, "destination": destination.as_str() }),
        )
        .await?;
        Ok(())
    }

    async fn status(&self) -> Result<AvatarStatus, LinkError> {
        self.call_as("status", Value::Null).await
    }

    async fn entities(&self) -> Result<Vec<EntitySnapshot>, LinkError> {
        self.call_as("entities", Value::Null).await
    }

    async fn player_entity(&self, username: &str) -> Result<Option<EntitySnapshot>, LinkError> {
        self.call_as("player", json!({ "username": username })).await
    }

    async fn attack(&self, entity_id: i64) -> Result<(), LinkError> {
        self.call("attack", json!({ "entityId": entity_id })).await?;
        Ok(())
    }

    async fn activate_item(&self, hand: Hand) -> Result<(), LinkError> {
        self.call("activateItem", json!({ "offHand": hand == Hand::Left }))
            .await?;
        Ok(())
    }

    async fn deactivate_item(&self) -> Result<(), LinkError> {
        self.call("deactivateItem", Value::Null).await?;
        Ok(())
    }

    async fn look_at(&self, target: Position) -> Result<(), LinkError> {
        self.call("lookAt", json!({ "x": target.x, "y": target.y, "z": target.z }))
            .await?;
        Ok(())
    }

    async fn enable_navigation(&self, profile: MovementProfile) -> Result<(), LinkError> {
        self.call("loadNavigation", json!({ "movements": profile }))
            .await?;
        Ok(())
    }

    async fn navigate(&self, goal: NavigationGoal) -> Result<NavigationOutcome, LinkError> {
        let data: OutcomeData = self.call_as("setGoal", json!({ "goal": goal })).await?;
        Ok(data.outcome)
    }

    async fn clear_goal(&self) -> Result<(), LinkError> {
        self.call("clearGoal", Value::Null).await?;
        Ok(())
    }

    /// Announce the logout and half-close the stream; the gateway ends the session
    async fn quit(&self) -> Result<(), LinkError> {
        if self.shared.is_closed() {
            return Ok(());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sent = self.write_line(id, "quit", Value::Null).await;
        let shutdown = self.writer.lock().await.shutdown().await;
        sent?;
        shutdown.map_err(|e| LinkError::Io(e.to_string()))
    }

    async fn closed(&self) -> String {
        let mut rx = self.shared.closed.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "gateway link dropped".to_string(),
        };
        reason
    }
}
