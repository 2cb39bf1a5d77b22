//! In-memory world used to exercise `SessionClient` and the dispatcher without a server.
//!
//! The world records every action it receives so tests can assert on them.
//! Navigation goals stay active until a test calls [`MockWorld::arrive`] or the
//! client clears them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use super::error::LinkError;
use super::link::{WorldConnector, WorldLink};
use super::models::{
    AvatarStatus, Block, BlockFace, BlockPos, ControlDimension, EntitySnapshot, EquipDestination,
    Hand, InventoryItem, MovementProfile, NavigationGoal, NavigationOutcome, Position,
};
use crate::events::{AvatarEvent, EventBus, EventEmitter, EventKind, EventSource};
use crate::SessionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavStatus {
    Idle,
    Active,
    Reached,
    Cleared,
}

/// Latest navigation state; every new goal bumps `generation`
#[derive(Debug, Clone, PartialEq)]
pub struct NavSignal {
    pub generation: u64,
    pub goal: Option<NavigationGoal>,
    pub status: NavStatus,
}

#[derive(Debug)]
struct WorldState {
    position: Option<Position>,
    blocks: HashMap<BlockPos, Block>,
    inventory: Vec<InventoryItem>,
    entities: Vec<EntitySnapshot>,
    health: f64,
    food: f64,
    game_mode: String,
    raining: bool,
    time_of_day: i64,

    selected_slot: Option<u8>,
    controls: HashSet<ControlDimension>,
    control_log: Vec<(ControlDimension, bool)>,
    chat_log: Vec<String>,
    placements: Vec<(BlockPos, BlockFace)>,
    equipped: Vec<(String, EquipDestination)>,
    attacks: Vec<i64>,
    active_hand: Option<Hand>,
    looking_at: Option<Position>,
    navigation: Option<MovementProfile>,
    events: Option<EventBus>,
    connects: usize,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            position: None,
            blocks: HashMap::new(),
            inventory: Vec::new(),
            entities: Vec::new(),
            health: 20.0,
            food: 20.0,
            game_mode: "survival".into(),
            raining: false,
            time_of_day: 6000,
            selected_slot: None,
            controls: HashSet::new(),
            control_log: Vec::new(),
            chat_log: Vec::new(),
            placements: Vec::new(),
            equipped: Vec::new(),
            attacks: Vec::new(),
            active_hand: None,
            looking_at: None,
            navigation: None,
            events: None,
            connects: 0,
        }
    }
}

pub struct MockWorld {
    state: Mutex<WorldState>,
    nav: watch::Sender<NavSignal>,
    closed: watch::Sender<Option<String>>,
}

impl Default for MockWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWorld {
    /// An empty world; the avatar has no position until one is set
    pub fn new() -> Self {
        let (nav, _) = watch::channel(NavSignal {
            generation: 0,
            goal: None,
            status: NavStatus::Idle,
        });
        let (closed, _) = watch::channel(None);
        Self {
            state: Mutex::new(WorldState::default()),
            nav,
            closed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub fn with_position(self, position: Position) -> Self {
        self.lock().position = Some(position);
        self
    }

    pub fn with_block(self, name: &str, pos: BlockPos, hardness: Option<f64>) -> Self {
        self.lock().blocks.insert(
            pos,
            Block {
                name: name.into(),
                position: pos,
                hardness,
            },
        );
        self
    }

    pub fn with_item(self, name: &str, count: u32, slot: u32) -> Self {
        self.lock().inventory.push(InventoryItem {
            name: name.into(),
            count,
            slot,
            display_name: display_name(name),
        });
        self
    }

    pub fn with_entity(self, entity: EntitySnapshot) -> Self {
        self.lock().entities.push(entity);
        self
    }

    // ------------------------------------------------------------------
    // World-side actions
    // ------------------------------------------------------------------

    pub fn set_position(&self, position: Option<Position>) {
        self.lock().position = position;
    }

    /// Mark the active goal as reached
    pub fn arrive(&self) {
        self.nav.send_if_modified(|signal| {
            if signal.status == NavStatus::Active {
                signal.status = NavStatus::Reached;
                true
            } else {
                false
            }
        });
    }

    /// Wait until a navigation goal is active and return it
    pub async fn wait_for_goal(&self) -> NavigationGoal {
        let mut rx = self.nav.subscribe();
        loop {
            {
                let signal = rx.borrow_and_update();
                if signal.status == NavStatus::Active {
                    if let Some(goal) = signal.goal.clone() {
                        return goal;
                    }
                }
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn nav_signal(&self) -> NavSignal {
        self.nav.borrow().clone()
    }

    /// Close the link as if the server dropped the avatar
    pub fn drop_connection(&self, reason: &str) {
        self.closed.send_replace(Some(reason.to_string()));
    }

    /// Broadcast a chat line observed by the avatar
    pub fn say(&self, username: &str, message: &str) {
        if let Some(events) = self.lock().events.clone() {
            events.emit(AvatarEvent::new(
                EventSource::Session,
                EventKind::Chat {
                    username: username.into(),
                    message: message.into(),
                },
            ));
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn chat_log(&self) -> Vec<String> {
        self.lock().chat_log.clone()
    }

    pub fn control_log(&self) -> Vec<(ControlDimension, bool)> {
        self.lock().control_log.clone()
    }

    pub fn is_control_active(&self, control: ControlDimension) -> bool {
        self.lock().controls.contains(&control)
    }

    pub fn placements(&self) -> Vec<(BlockPos, BlockFace)> {
        self.lock().placements.clone()
    }

    pub fn block(&self, pos: BlockPos) -> Option<Block> {
        self.lock().blocks.get(&pos).cloned()
    }

    pub fn selected_slot(&self) -> Option<u8> {
        self.lock().selected_slot
    }

    pub fn equipped(&self) -> Vec<(String, EquipDestination)> {
        self.lock().equipped.clone()
    }

    pub fn attacks(&self) -> Vec<i64> {
        self.lock().attacks.clone()
    }

    pub fn active_hand(&self) -> Option<Hand> {
        self.lock().active_hand
    }

    pub fn looking_at(&self) -> Option<Position> {
        self.lock().looking_at
    }

    pub fn navigation_profile(&self) -> Option<MovementProfile> {
        self.lock().navigation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    fn ensure_open(&self) -> Result<(), LinkError> {
        if self.is_closed() {
            Err(LinkError::Closed)
        } else {
            Ok(())
        }
    }
}

fn display_name(name: &str) -> String {
    name.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[async_trait]
impl WorldLink for MockWorld {
    fn position(&self) -> Option<Position> {
        self.lock().position
    }

    async fn chat(&self, message: &str) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.lock().chat_log.push(message.to_string());
        Ok(())
    }

    async fn set_control_state(
        &self,
        control: ControlDimension,
        active: bool,
    ) -> Result<(), LinkError> {
        self.ensure_open()?;
        let mut state = self.lock();
        if active {
            state.controls.insert(control);
        } else {
            state.controls.remove(&control);
        }
        state.control_log.push((control, active));
        Ok(())
    }

    async fn block_at(&self, pos: BlockPos) -> Result<Option<Block>, LinkError> {
        self.ensure_open()?;
        Ok(self.lock().blocks.get(&pos).cloned())
    }

    async fn place_block(&self, reference: BlockPos, face: BlockFace) -> Result<(), LinkError> {
        self.ensure_open()?;
        let mut state = self.lock();
        let slot = u32::from(state.selected_slot.unwrap_or(0));
        let held = state
            .inventory
            .iter()
            .find(|item| item.slot == slot)
            .map(|item| item.name.clone())
            .ok_or_else(|| LinkError::Rejected("must be holding an item to place".into()))?;

        let (dx, dy, dz) = face.normal();
        let target = reference.offset(dx, dy, dz);
        state.blocks.insert(
            target,
            Block {
                name: held,
                position: target,
                hardness: None,
            },
        );
        state.placements.push((reference, face));
        Ok(())
    }

    async fn dig(&self, pos: BlockPos) -> Result<(), LinkError> {
        self.ensure_open()?;
        let mut state = self.lock();
        state.blocks.insert(
            pos,
            Block {
                name: "air".into(),
                position: pos,
                hardness: Some(0.0),
            },
        );
        Ok(())
    }

    async fn inventory(&self) -> Result<Vec<InventoryItem>, LinkError> {
        self.ensure_open()?;
        Ok(self.lock().inventory.clone())
    }

    async fn select_hotbar_slot(&self, slot: u8) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.lock().selected_slot = Some(slot);
        Ok(())
    }

    async fn equip(
        &self,
        item: &InventoryItem,
        destination: EquipDestination,
    ) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.lock().equipped.push((item.name.clone(), destination));
        Ok(())
    }

    async fn status(&self) -> Result<AvatarStatus, LinkError> {
        self.ensure_open()?;
        let state = self.lock();
        Ok(AvatarStatus {
            health: state.health,
            food: state.food,
            game_mode: state.game_mode.clone(),
            position: state.position,
            is_raining: state.raining,
            time_of_day: state.time_of_day,
        })
    }

    async fn entities(&self) -> Result<Vec<EntitySnapshot>, LinkError> {
        self.ensure_open()?;
        Ok(self.lock().entities.clone())
    }

    async fn player_entity(&self, username: &str) -> Result<Option<EntitySnapshot>, LinkError> {
        self.ensure_open()?;
        Ok(self
            .lock()
            .entities
            .iter()
            .find(|e| e.kind == "player" && e.username.as_deref() == Some(username))
            .cloned())
    }

    async fn attack(&self, entity_id: i64) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.lock().attacks.push(entity_id);
        Ok(())
    }

    async fn activate_item(&self, hand: Hand) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.lock().active_hand = Some(hand);
        Ok(())
    }

    async fn deactivate_item(&self) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.lock().active_hand = None;
        Ok(())
    }

    async fn look_at(&self, target: Position) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.lock().looking_at = Some(target);
        Ok(())
    }

    async fn enable_navigation(&self, profile: MovementProfile) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.lock().navigation = Some(profile);
        Ok(())
    }

    async fn navigate(&self, goal: NavigationGoal) -> Result<NavigationOutcome, LinkError> {
        self.ensure_open()?;
        if self.lock().navigation.is_none() {
            return Err(LinkError::Rejected("navigation is not loaded".into()));
        }

        let mut generation = 0;
        self.nav.send_modify(|signal| {
            signal.generation += 1;
            signal.goal = Some(goal);
            signal.status = NavStatus::Active;
            generation = signal.generation;
        });

        let mut nav_rx = self.nav.subscribe();
        let mut closed_rx = self.closed.subscribe();
        loop {
            {
                let signal = nav_rx.borrow_and_update();
                if signal.generation != generation {
                    return Ok(NavigationOutcome::Replaced);
                }
                match signal.status {
                    NavStatus::Reached => return Ok(NavigationOutcome::Reached),
                    NavStatus::Cleared | NavStatus::Idle => {
                        return Ok(NavigationOutcome::Cancelled)
                    }
                    NavStatus::Active => {}
                }
            }
            tokio::select! {
                changed = nav_rx.changed() => {
                    if changed.is_err() {
                        return Err(LinkError::Closed);
                    }
                }
                _ = closed_rx.wait_for(Option::is_some) => return Err(LinkError::Closed),
            }
        }
    }

    async fn clear_goal(&self) -> Result<(), LinkError> {
        self.ensure_open()?;
        self.nav.send_if_modified(|signal| {
            if signal.status == NavStatus::Active {
                signal.goal = None;
                signal.status = NavStatus::Cleared;
                true
            } else {
                false
            }
        });
        Ok(())
    }

    async fn quit(&self) -> Result<(), LinkError> {
        self.drop_connection("quit");
        Ok(())
    }

    async fn closed(&self) -> String {
        let mut rx = self.closed.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "world dropped".to_string(),
        };
        reason
    }
}

/// Hands out the same [`MockWorld`] on every connect
pub struct MockConnector {
    world: Arc<MockWorld>,
    refuse: Mutex<Option<LinkError>>,
}

impl MockConnector {
    pub fn new(world: Arc<MockWorld>) -> Self {
        Self {
            world,
            refuse: Mutex::new(None),
        }
    }

    /// Fail the next connect attempt with `error`
    pub fn refuse_next(&self, error: LinkError) {
        *self.refuse.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
    }

    pub fn world(&self) -> &Arc<MockWorld> {
        &self.world
    }
}

#[async_trait]
impl WorldConnector for MockConnector {
    async fn connect(
        &self,
        _settings: &SessionSettings,
        events: EventBus,
    ) -> Result<Arc<dyn WorldLink>, LinkError> {
        if let Some(err) = self
            .refuse
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            return Err(err);
        }

        {
            let mut state = self.world.lock();
            state.events = Some(events);
            state.connects += 1;
            state.navigation = None;
            state.controls.clear();
        }
        self.world.closed.send_replace(None);
        let link: Arc<dyn WorldLink> = self.world.clone();
        Ok(link)
    }
}
