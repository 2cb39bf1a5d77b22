//! The single live avatar session
//!
//! `SessionClient` holds at most one link at a time and funnels every state
//! transition through its own methods. All avatar actions go through
//! [`SessionClient::link`], so they fail with `NotConnected` unless the
//! session is `Connected`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::SessionError;
use super::link::{WorldConnector, WorldLink};
use super::models::{
    AvatarStatus, Block, BlockFace, BlockPos, ControlDimension, EquipDestination, Hand,
    InventoryItem, MovementProfile, NavigationGoal, NavigationOutcome, NearbyEntity, Position,
};
use super::motion::MotionLock;
use crate::events::{AvatarEvent, EventBus, EventEmitter, EventKind, EventSource};
use crate::SessionSettings;

pub const TURN_DURATION: Duration = Duration::from_millis(500);
pub const JUMP_DURATION: Duration = Duration::from_millis(500);
pub const MOVE_DURATION: Duration = Duration::from_millis(1000);

/// Reach of a melee attack
pub const ATTACK_RANGE: f64 = 4.0;
/// Trailing distance kept while following a player
pub const FOLLOW_DISTANCE: f64 = 2.0;
pub const DEFAULT_ENTITY_RANGE: f64 = 10.0;
pub const HOTBAR_SLOTS: i64 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Default)]
struct SessionSlot {
    state: Option<SessionState>,
    link: Option<Arc<dyn WorldLink>>,
    id: Option<Uuid>,
}

impl SessionSlot {
    fn state(&self) -> SessionState {
        self.state.unwrap_or(SessionState::Disconnected)
    }

    fn reset(&mut self) {
        self.state = None;
        self.link = None;
        self.id = None;
    }
}

pub struct SessionClient {
    settings: SessionSettings,
    connector: Arc<dyn WorldConnector>,
    events: EventBus,
    slot: Arc<Mutex<SessionSlot>>,
    motion: Arc<MotionLock>,
    navigation_ready: Arc<AtomicBool>,
}

fn lock_slot(slot: &Mutex<SessionSlot>) -> MutexGuard<'_, SessionSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionClient {
    pub fn new(
        settings: SessionSettings,
        connector: Arc<dyn WorldConnector>,
        events: EventBus,
    ) -> Self {
        Self {
            settings,
            connector,
            events,
            slot: Arc::new(Mutex::new(SessionSlot::default())),
            motion: Arc::new(MotionLock::new()),
            navigation_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> SessionState {
        lock_slot(&self.slot).state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Whether the navigation capability was loaded for the current session
    pub fn navigation_ready(&self) -> bool {
        self.navigation_ready.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn connect(&self) -> Result<(), SessionError> {
        {
            let mut slot = lock_slot(&self.slot);
            if slot.state() != SessionState::Disconnected {
                return Err(SessionError::AlreadyConnected);
            }
            slot.state = Some(SessionState::Connecting);
        }

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            username = %self.settings.username,
            "Connecting avatar"
        );

        let link = match self
            .connector
            .connect(&self.settings, self.events.clone())
            .await
        {
            Ok(link) => link,
            Err(e) => {
                lock_slot(&self.slot).reset();
                warn!(error = %e, "Avatar connection failed");
                return Err(SessionError::ConnectionError(e.to_string()));
            }
        };

        let mut navigation = false;
        if self.settings.navigation {
            match link.enable_navigation(MovementProfile::default()).await {
                Ok(()) => navigation = true,
                Err(e) => warn!(error = %e, "Navigation capability unavailable"),
            }
        }
        self.navigation_ready.store(navigation, Ordering::SeqCst);

        let id = Uuid::new_v4();
        {
            let mut slot = lock_slot(&self.slot);
            slot.state = Some(SessionState::Connected);
            slot.link = Some(link.clone());
            slot.id = Some(id);
        }
        self.motion.reset();

        info!(session_id = %id, navigation, "Avatar spawned");
        self.events.emit(AvatarEvent::new(
            EventSource::Session,
            EventKind::Connected {
                username: self.settings.username.clone(),
            },
        ));

        self.spawn_close_watcher(link, id);
        Ok(())
    }

    /// Return the slot to Disconnected when the link closes on its own
    fn spawn_close_watcher(&self, link: Arc<dyn WorldLink>, id: Uuid) {
        let slot = self.slot.clone();
        let motion = self.motion.clone();
        let navigation_ready = self.navigation_ready.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let reason = link.closed().await;
            let was_connected = {
                let mut slot = lock_slot(&slot);
                if slot.id != Some(id) {
                    return;
                }
                let was_connected = slot.state() == SessionState::Connected;
                slot.reset();
                was_connected
            };
            motion.reset();
            navigation_ready.store(false, Ordering::SeqCst);

            if was_connected {
                warn!(session_id = %id, reason = %reason, "Avatar session closed remotely");
                events.emit(AvatarEvent::new(
                    EventSource::Session,
                    EventKind::Disconnected { reason },
                ));
            } else {
                debug!(session_id = %id, "Avatar session closed");
            }
        });
    }

    /// Log out and wait for the link to close; no-op unless connected
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (link, id) = {
            let mut slot = lock_slot(&self.slot);
            match (slot.state(), slot.link.clone(), slot.id) {
                (SessionState::Connected, Some(link), Some(id)) => {
                    slot.state = Some(SessionState::Disconnecting);
                    (link, id)
                }
                _ => return Ok(()),
            }
        };

        info!(session_id = %id, "Disconnecting avatar");
        let result = link.quit().await;
        if result.is_ok() {
            link.closed().await;
        }

        {
            let mut slot = lock_slot(&self.slot);
            if slot.id == Some(id) {
                slot.reset();
            }
        }
        self.motion.reset();
        self.navigation_ready.store(false, Ordering::SeqCst);

        result.map_err(SessionError::from)
    }

    /// The live link, or `NotConnected`
    fn link(&self) -> Result<Arc<dyn WorldLink>, SessionError> {
        let slot = lock_slot(&self.slot);
        match (slot.state(), &slot.link) {
            (SessionState::Connected, Some(link)) => Ok(link.clone()),
            _ => Err(SessionError::NotConnected),
        }
    }

    // ========================================================================
    // Chat and timed movement
    // ========================================================================

    pub async fn send_chat(&self, message: &str) -> Result<(), SessionError> {
        let link = self.link()?;
        if message.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        link.chat(message).await?;
        Ok(())
    }

    /// Hold `control` for `duration`, then release it unless a newer hold owns it
    async fn hold_control(
        &self,
        control: ControlDimension,
        duration: Duration,
    ) -> Result<(), SessionError> {
        let link = self.link()?;
        let ticket = self.motion.begin_hold(control)?;

        if let Err(e) = link.set_control_state(control, true).await {
            self.motion.end_hold(ticket);
            return Err(e.into());
        }
        tokio::time::sleep(duration).await;

        if self.motion.end_hold(ticket) {
            link.set_control_state(control, false).await?;
        } else {
            debug!(control = control.as_str(), "Hold superseded, leaving control set");
        }
        Ok(())
    }

    pub async fn jump(&self) -> Result<(), SessionError> {
        self.hold_control(ControlDimension::Jump, JUMP_DURATION).await
    }

    pub async fn move_forward(&self) -> Result<(), SessionError> {
        self.hold_control(ControlDimension::Forward, MOVE_DURATION)
            .await
    }

    pub async fn move_back(&self) -> Result<(), SessionError> {
        self.hold_control(ControlDimension::Back, MOVE_DURATION).await
    }

    pub async fn turn_left(&self) -> Result<(), SessionError> {
        self.hold_control(ControlDimension::Left, TURN_DURATION).await
    }

    pub async fn turn_right(&self) -> Result<(), SessionError> {
        self.hold_control(ControlDimension::Right, TURN_DURATION)
            .await
    }

    // ========================================================================
    // World interaction
    // ========================================================================

    /// Place the held item on top of the block at `pos`
    pub async fn place_block(&self, pos: BlockPos) -> Result<(), SessionError> {
        let link = self.link()?;
        if link.block_at(pos).await?.is_none() {
            return Err(SessionError::NoTargetBlock(pos));
        }
        link.place_block(pos, BlockFace::Top).await?;
        Ok(())
    }

    /// Dig the block at `pos`, returning what was dug
    pub async fn dig_block(&self, pos: BlockPos) -> Result<Block, SessionError> {
        let link = self.link()?;
        let block = link
            .block_at(pos)
            .await?
            .ok_or(SessionError::NoTargetBlock(pos))?;
        if block.is_air() {
            return Err(SessionError::CannotDigAir(pos));
        }
        link.dig(pos).await?;
        Ok(block)
    }

    pub async fn get_block_info(&self, pos: BlockPos) -> Result<Block, SessionError> {
        let link = self.link()?;
        link.block_at(pos)
            .await?
            .ok_or(SessionError::NoTargetBlock(pos))
    }

    // ========================================================================
    // Inventory
    // ========================================================================

    pub async fn select_slot(&self, slot: i64) -> Result<(), SessionError> {
        let link = self.link()?;
        let index = u8::try_from(slot)
            .ok()
            .filter(|s| i64::from(*s) < HOTBAR_SLOTS)
            .ok_or(SessionError::InvalidSlot(slot))?;
        link.select_hotbar_slot(index).await?;
        Ok(())
    }

    pub async fn get_inventory(&self) -> Result<Vec<InventoryItem>, SessionError> {
        let link = self.link()?;
        Ok(link.inventory().await?)
    }

    /// Equip the first item whose name contains `name`
    ///
    /// Without a destination the item goes where it naturally belongs
    /// (armor by piece, everything else in hand).
    pub async fn equip_item(
        &self,
        name: &str,
        destination: Option<EquipDestination>,
    ) -> Result<(InventoryItem, EquipDestination), SessionError> {
        let link = self.link()?;
        let item = link
            .inventory()
            .await?
            .into_iter()
            .find(|item| item.name.contains(name))
            .ok_or_else(|| SessionError::ItemNotFound(name.to_string()))?;

        let destination = destination.unwrap_or_else(|| EquipDestination::natural_for(&item.name));
        link.equip(&item, destination).await?;
        Ok((item, destination))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_status(&self) -> Result<AvatarStatus, SessionError> {
        let link = self.link()?;
        Ok(link.status().await?)
    }

    /// Entities within `range`, nearest first
    pub async fn get_nearby_entities(&self, range: f64) -> Result<Vec<NearbyEntity>, SessionError> {
        let link = self.link()?;
        let Some(origin) = link.position() else {
            return Ok(Vec::new());
        };

        let mut nearby: Vec<NearbyEntity> = link
            .entities()
            .await?
            .into_iter()
            .filter_map(|entity| {
                let distance = origin.distance_to(&entity.position);
                (distance <= range).then(|| NearbyEntity {
                    name: entity.username.unwrap_or(entity.name),
                    kind: entity.kind,
                    position: entity.position,
                    distance,
                })
            })
            .collect();
        nearby.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(nearby)
    }

    /// Last known position; `None` when disconnected or not yet spawned
    pub fn get_position(&self) -> Option<Position> {
        self.link().ok().and_then(|link| link.position())
    }

    // ========================================================================
    // Combat and item use
    // ========================================================================

    /// Attack the nearest entity answering to `name` within reach
    pub async fn attack(&self, name: &str) -> Result<(), SessionError> {
        let link = self.link()?;
        let not_found = || SessionError::EntityNotFound(name.to_string());
        let origin = link.position().ok_or_else(not_found)?;

        let target = link
            .entities()
            .await?
            .into_iter()
            .filter(|entity| entity.answers_to(name))
            .map(|entity| (origin.distance_to(&entity.position), entity))
            .filter(|(distance, _)| *distance <= ATTACK_RANGE)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, entity)| entity)
            .ok_or_else(not_found)?;

        debug!(entity_id = target.id, name, "Attacking entity");
        link.attack(target.id).await?;
        Ok(())
    }

    pub async fn use_item(&self, hand: Hand) -> Result<(), SessionError> {
        let link = self.link()?;
        link.activate_item(hand).await?;
        Ok(())
    }

    pub async fn stop_using_item(&self) -> Result<(), SessionError> {
        let link = self.link()?;
        link.deactivate_item().await?;
        Ok(())
    }

    // ========================================================================
    // Orientation and navigation
    // ========================================================================

    pub async fn look_at(&self, target: Position) -> Result<(), SessionError> {
        let link = self.link()?;
        link.look_at(target).await?;
        Ok(())
    }

    async fn navigate(
        &self,
        link: Arc<dyn WorldLink>,
        goal: NavigationGoal,
    ) -> Result<NavigationOutcome, SessionError> {
        if !self.navigation_ready() {
            return Err(SessionError::NavigationUnavailable);
        }
        let generation = self.motion.begin_navigation()?;
        debug!(?goal, generation, "Navigation goal set");

        let outcome = link.navigate(goal).await;
        self.motion.end_navigation(generation);

        let outcome = outcome?;
        debug!(?outcome, generation, "Navigation goal finished");
        Ok(outcome)
    }

    /// Follow a player until the goal is cleared or replaced
    pub async fn follow_player(&self, username: &str) -> Result<NavigationOutcome, SessionError> {
        let link = self.link()?;
        let player = link
            .player_entity(username)
            .await?
            .ok_or_else(|| SessionError::PlayerNotFound(username.to_string()))?;

        let goal = NavigationGoal::Follow {
            entity_id: player.id,
            range: FOLLOW_DISTANCE,
        };
        self.navigate(link, goal).await
    }

    /// Walk to the block containing `target`
    pub async fn go_to_position(&self, target: Position) -> Result<NavigationOutcome, SessionError> {
        let link = self.link()?;
        let goal = NavigationGoal::Block {
            position: BlockPos::containing(target.x, target.y, target.z),
        };
        self.navigate(link, goal).await
    }

    /// Drop any navigation goal, active or not
    pub async fn stop_following(&self) -> Result<(), SessionError> {
        let link = self.link()?;
        self.motion.cancel_navigation();
        link.clear_goal().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{MockConnector, MockWorld};
    use crate::session::models::EntitySnapshot;
    use crate::session::LinkError;

    fn settings() -> SessionSettings {
        SessionSettings {
            host: "localhost".into(),
            port: 25565,
            username: "MCPBot".into(),
            version: "1.21".into(),
            navigation: true,
            gateway: "127.0.0.1:0".into(),
        }
    }

    fn client_with(world: MockWorld) -> (SessionClient, Arc<MockWorld>) {
        let world = Arc::new(world);
        let connector = Arc::new(MockConnector::new(world.clone()));
        (
            SessionClient::new(settings(), connector, EventBus::default()),
            world,
        )
    }

    async fn connected(world: MockWorld) -> (Arc<SessionClient>, Arc<MockWorld>) {
        let (client, world) = client_with(world);
        client.connect().await.unwrap();
        (Arc::new(client), world)
    }

    fn entity(id: i64, name: &str, kind: &str, at: Position) -> EntitySnapshot {
        EntitySnapshot {
            id,
            name: name.into(),
            kind: kind.into(),
            username: (kind == "player").then(|| name.to_string()),
            position: at,
        }
    }

    #[tokio::test]
    async fn test_actions_require_connection() {
        let (client, _world) = client_with(MockWorld::new());

        assert_eq!(client.send_chat("hi").await, Err(SessionError::NotConnected));
        assert_eq!(client.select_slot(1).await, Err(SessionError::NotConnected));
        assert_eq!(client.jump().await, Err(SessionError::NotConnected));
        assert_eq!(client.stop_following().await, Err(SessionError::NotConnected));
        assert!(client.get_position().is_none());
    }

    #[tokio::test]
    async fn test_connect_emits_event_and_enables_navigation() {
        let (client, world) = client_with(MockWorld::new().with_position(Position::new(0.5, 64.0, 0.5)));
        let mut rx = client.events.subscribe();

        client.connect().await.unwrap();

        assert_eq!(client.state(), SessionState::Connected);
        assert!(client.navigation_ready());
        assert_eq!(world.navigation_profile(), Some(MovementProfile::default()));
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.kind,
            EventKind::Connected {
                username: "MCPBot".into()
            }
        );
        let pos = client.get_position().unwrap();
        assert!(pos.is_finite());
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let (client, world) = connected(MockWorld::new()).await;
        assert_eq!(client.connect().await, Err(SessionError::AlreadyConnected));
        assert_eq!(world.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let connector = Arc::new(MockConnector::new(Arc::new(MockWorld::new())));
        connector.refuse_next(LinkError::Io("connection refused".into()));
        let client = SessionClient::new(settings(), connector.clone(), EventBus::default());

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.kind(), "ConnectionError");
        assert_eq!(client.state(), SessionState::Disconnected);

        client.connect().await.unwrap();
        assert_eq!(connector.world().connect_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect() {
        let (client, world) = connected(MockWorld::new()).await;

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(world.is_closed());

        client.disconnect().await.unwrap();
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(world.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_remote_close_emits_disconnected() {
        let (client, world) = connected(MockWorld::new()).await;
        let mut rx = client.events.subscribe();

        world.drop_connection("kicked for spamming");

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.kind,
            EventKind::Disconnected {
                reason: "kicked for spamming".into()
            }
        );
        assert_eq!(client.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_chat_rejects_empty() {
        let (client, world) = connected(MockWorld::new()).await;
        assert_eq!(client.send_chat("  ").await, Err(SessionError::EmptyMessage));
        client.send_chat("hello").await.unwrap();
        assert_eq!(world.chat_log(), vec!["hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_hold_sets_then_clears() {
        let (client, world) = connected(MockWorld::new()).await;

        let started = tokio::time::Instant::now();
        client.move_forward().await.unwrap();

        assert!(started.elapsed() >= MOVE_DURATION);
        assert_eq!(
            world.control_log(),
            vec![
                (ControlDimension::Forward, true),
                (ControlDimension::Forward, false)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_holds_release_once() {
        let (client, world) = connected(MockWorld::new()).await;

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.turn_left().await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.turn_left().await }
        });

        first.await.unwrap().unwrap();
        assert!(world.is_control_active(ControlDimension::Left));

        second.await.unwrap().unwrap();
        assert!(!world.is_control_active(ControlDimension::Left));
        assert_eq!(
            world.control_log(),
            vec![
                (ControlDimension::Left, true),
                (ControlDimension::Left, true),
                (ControlDimension::Left, false)
            ]
        );
    }

    #[tokio::test]
    async fn test_dig_and_place() {
        let air = BlockPos::new(0, 65, 0);
        let stone = BlockPos::new(0, 64, 0);
        let (client, world) = connected(
            MockWorld::new()
                .with_block("stone", stone, Some(1.5))
                .with_block("air", air, Some(0.0))
                .with_item("dirt", 16, 0),
        )
        .await;

        assert_eq!(client.dig_block(air).await, Err(SessionError::CannotDigAir(air)));
        let missing = BlockPos::new(9, 9, 9);
        assert_eq!(
            client.dig_block(missing).await,
            Err(SessionError::NoTargetBlock(missing))
        );
        assert_eq!(
            client.place_block(missing).await,
            Err(SessionError::NoTargetBlock(missing))
        );

        client.place_block(stone).await.unwrap();
        assert_eq!(world.placements(), vec![(stone, BlockFace::Top)]);
        assert_eq!(world.block(air).unwrap().name, "dirt");

        let dug = client.dig_block(stone).await.unwrap();
        assert_eq!(dug.name, "stone");
        assert!(world.block(stone).unwrap().is_air());
    }

    #[tokio::test]
    async fn test_block_info() {
        let pos = BlockPos::new(3, 70, -2);
        let (client, _world) = connected(MockWorld::new().with_block("oak_log", pos, Some(2.0))).await;
        let block = client.get_block_info(pos).await.unwrap();
        assert_eq!(block.name, "oak_log");
        assert_eq!(block.hardness, Some(2.0));
    }

    #[tokio::test]
    async fn test_select_slot_bounds() {
        let (client, world) = connected(MockWorld::new()).await;
        for slot in 0..=8 {
            client.select_slot(slot).await.unwrap();
        }
        assert_eq!(world.selected_slot(), Some(8));
        assert_eq!(client.select_slot(9).await, Err(SessionError::InvalidSlot(9)));
        assert_eq!(client.select_slot(-1).await, Err(SessionError::InvalidSlot(-1)));
    }

    #[tokio::test]
    async fn test_equip_by_substring_with_natural_destination() {
        let (client, world) = connected(
            MockWorld::new()
                .with_item("iron_sword", 1, 0)
                .with_item("diamond_helmet", 1, 1),
        )
        .await;

        let (item, dest) = client.equip_item("helmet", None).await.unwrap();
        assert_eq!(item.name, "diamond_helmet");
        assert_eq!(dest, EquipDestination::Head);

        client
            .equip_item("sword", Some(EquipDestination::Hand))
            .await
            .unwrap();
        assert_eq!(world.equipped().len(), 2);

        assert_eq!(
            client.equip_item("bow", None).await.unwrap_err().kind(),
            "ItemNotFound"
        );
    }

    #[tokio::test]
    async fn test_nearby_entities_sorted_and_bounded() {
        let origin = Position::new(0.0, 64.0, 0.0);
        let (client, _world) = connected(
            MockWorld::new()
                .with_position(origin)
                .with_entity(entity(1, "cow", "animal", Position::new(6.0, 64.0, 0.0)))
                .with_entity(entity(2, "Steve", "player", Position::new(0.0, 64.0, 3.0)))
                .with_entity(entity(3, "zombie", "hostile", Position::new(30.0, 64.0, 0.0))),
        )
        .await;

        let nearby = client.get_nearby_entities(DEFAULT_ENTITY_RANGE).await.unwrap();
        let names: Vec<&str> = nearby.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Steve", "cow"]);
        assert_eq!(nearby[0].distance, 3.0);

        assert!(client.get_nearby_entities(1.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attack_within_reach_only() {
        let (client, world) = connected(
            MockWorld::new()
                .with_position(Position::new(0.0, 64.0, 0.0))
                .with_entity(entity(7, "zombie", "hostile", Position::new(3.0, 64.0, 0.0)))
                .with_entity(entity(8, "skeleton", "hostile", Position::new(8.0, 64.0, 0.0))),
        )
        .await;

        client.attack("zombie").await.unwrap();
        assert_eq!(world.attacks(), vec![7]);
        assert_eq!(
            client.attack("skeleton").await,
            Err(SessionError::EntityNotFound("skeleton".into()))
        );
    }

    #[tokio::test]
    async fn test_use_and_look() {
        let (client, world) = connected(MockWorld::new()).await;
        client.use_item(Hand::Left).await.unwrap();
        assert_eq!(world.active_hand(), Some(Hand::Left));
        client.stop_using_item().await.unwrap();
        assert_eq!(world.active_hand(), None);

        let target = Position::new(1.0, 2.0, 3.0);
        client.look_at(target).await.unwrap();
        assert_eq!(world.looking_at(), Some(target));
    }

    #[tokio::test]
    async fn test_go_to_position_then_stop() {
        let (client, world) = connected(MockWorld::new().with_position(Position::new(0.0, 64.0, 0.0))).await;

        let nav = tokio::spawn({
            let client = client.clone();
            async move { client.go_to_position(Position::new(10.0, 64.0, 10.0)).await }
        });
        let goal = world.wait_for_goal().await;
        assert_eq!(
            goal,
            NavigationGoal::Block {
                position: BlockPos::new(10, 64, 10)
            }
        );

        assert!(matches!(client.jump().await, Err(SessionError::Busy(_))));
        client.stop_following().await.unwrap();

        assert_eq!(nav.await.unwrap(), Ok(NavigationOutcome::Cancelled));
        assert!(client.get_status().await.is_ok());
    }

    #[tokio::test]
    async fn test_follow_player() {
        let (client, world) = connected(
            MockWorld::new()
                .with_position(Position::new(0.0, 64.0, 0.0))
                .with_entity(entity(42, "Alex", "player", Position::new(20.0, 64.0, 0.0))),
        )
        .await;

        assert_eq!(
            client.follow_player("Notch").await,
            Err(SessionError::PlayerNotFound("Notch".into()))
        );

        let follow = tokio::spawn({
            let client = client.clone();
            async move { client.follow_player("Alex").await }
        });
        let goal = world.wait_for_goal().await;
        assert_eq!(
            goal,
            NavigationGoal::Follow {
                entity_id: 42,
                range: FOLLOW_DISTANCE
            }
        );
        world.arrive();
        assert_eq!(follow.await.unwrap(), Ok(NavigationOutcome::Reached));
    }

    #[tokio::test]
    async fn test_navigation_unavailable_when_disabled() {
        let world = Arc::new(MockWorld::new());
        let mut settings = settings();
        settings.navigation = false;
        let client = SessionClient::new(
            settings,
            Arc::new(MockConnector::new(world.clone())),
            EventBus::default(),
        );
        client.connect().await.unwrap();

        assert_eq!(
            client.go_to_position(Position::new(1.0, 2.0, 3.0)).await,
            Err(SessionError::NavigationUnavailable)
        );
        assert!(world.navigation_profile().is_none());
    }
}
