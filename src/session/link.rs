//! Abstraction over the live connection to the world
//!
//! `SessionClient` owns policy (validation, timing, exclusivity) and talks to the
//! world through these traits. `GatewayConnector` is the production
//! implementation; `MockConnector` is an in-memory world for tests.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::LinkError;
use super::models::{
    AvatarStatus, Block, BlockFace, BlockPos, ControlDimension, EntitySnapshot, EquipDestination,
    Hand, InventoryItem, MovementProfile, NavigationGoal, NavigationOutcome, Position,
};
use crate::events::EventBus;
use crate::SessionSettings;

/// Opens links to the world
#[async_trait]
pub trait WorldConnector: Send + Sync {
    /// Log in and resolve once the avatar has spawned.
    ///
    /// Chat, kick and error notifications observed on the link are pushed to
    /// `events` for as long as the link lives.
    async fn connect(
        &self,
        settings: &SessionSettings,
        events: EventBus,
    ) -> Result<Arc<dyn WorldLink>, LinkError>;
}

/// One logged-in avatar
#[async_trait]
pub trait WorldLink: Send + Sync {
    /// Last known position, `None` before the first position update
    fn position(&self) -> Option<Position>;

    async fn chat(&self, message: &str) -> Result<(), LinkError>;

    async fn set_control_state(
        &self,
        control: ControlDimension,
        active: bool,
    ) -> Result<(), LinkError>;

    async fn block_at(&self, pos: BlockPos) -> Result<Option<Block>, LinkError>;

    /// Place the held item against `face` of `reference`
    async fn place_block(&self, reference: BlockPos, face: BlockFace) -> Result<(), LinkError>;

    async fn dig(&self, pos: BlockPos) -> Result<(), LinkError>;

    async fn inventory(&self) -> Result<Vec<InventoryItem>, LinkError>;

    async fn select_hotbar_slot(&self, slot: u8) -> Result<(), LinkError>;

    async fn equip(
        &self,
        item: &InventoryItem,
        destination: EquipDestination,
    ) -> Result<(), LinkError>;

    async fn status(&self) -> Result<AvatarStatus, LinkError>;

    /// Every entity the avatar currently tracks, itself excluded
    async fn entities(&self) -> Result<Vec<EntitySnapshot>, LinkError>;

    /// The entity of a visible player, if any
    async fn player_entity(&self, username: &str) -> Result<Option<EntitySnapshot>, LinkError>;

    async fn attack(&self, entity_id: i64) -> Result<(), LinkError>;

    async fn activate_item(&self, hand: Hand) -> Result<(), LinkError>;

    async fn deactivate_item(&self) -> Result<(), LinkError>;

    async fn look_at(&self, target: Position) -> Result<(), LinkError>;

    async fn enable_navigation(&self, profile: MovementProfile) -> Result<(), LinkError>;

    /// Install `goal` and resolve when it is reached, cleared or replaced
    async fn navigate(&self, goal: NavigationGoal) -> Result<NavigationOutcome, LinkError>;

    /// Drop the current goal; a pending `navigate` resolves `Cancelled`
    async fn clear_goal(&self) -> Result<(), LinkError>;

    /// Log out and resolve once the link is closed
    async fn quit(&self) -> Result<(), LinkError>;

    /// Resolves when the link closes for any reason, with the reason
    async fn closed(&self) -> String;
}
