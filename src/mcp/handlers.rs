//! MCP tool dispatch
//!
//! Routes validated tool calls onto [`SessionClient`] operations and turns
//! their results into text content.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::protocol::{
    JsonRpcError, ResourceContent, ResourceDefinition, ToolDefinition, INTERNAL_ERROR,
    INVALID_PARAMS, METHOD_NOT_FOUND, RESOURCE_UNAVAILABLE,
};
use super::resources;
use super::tools::{self, ToolArgs};
use crate::session::{
    BlockPos, EquipDestination, Hand, NavigationOutcome, Position, SessionClient, SessionError,
    DEFAULT_ENTITY_RANGE,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to encode result: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "UnknownTool",
            Self::InvalidArguments { .. } => "InvalidArguments",
            Self::UnknownResource(_) => "UnknownResource",
            Self::ResourceUnavailable(_) => "ResourceUnavailable",
            Self::Session(e) => e.kind(),
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<DispatchError> for JsonRpcError {
    fn from(err: DispatchError) -> Self {
        let code = match &err {
            DispatchError::UnknownTool(_) => METHOD_NOT_FOUND,
            DispatchError::InvalidArguments { .. } => INVALID_PARAMS,
            DispatchError::UnknownResource(_) | DispatchError::ResourceUnavailable(_) => {
                RESOURCE_UNAVAILABLE
            }
            DispatchError::Session(_) | DispatchError::Internal(_) => INTERNAL_ERROR,
        };
        JsonRpcError::new(code, err.to_string()).with_kind(err.kind())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, DispatchError> {
    serde_json::to_string_pretty(value).map_err(|e| DispatchError::Internal(e.to_string()))
}

/// Maps tool names onto session operations
pub struct ToolDispatcher {
    session: Arc<SessionClient>,
}

impl ToolDispatcher {
    pub fn new(session: Arc<SessionClient>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionClient> {
        &self.session
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        tools::all_tools()
    }

    pub fn list_resources(&self) -> Vec<ResourceDefinition> {
        resources::all_resources()
    }

    pub fn read_resource(&self, uri: &str) -> Result<ResourceContent, DispatchError> {
        resources::read_resource(&self.session, uri)
    }

    /// Validate and run one tool call, returning its text content
    pub async fn call(&self, name: &str, arguments: Option<&Value>) -> Result<String, DispatchError> {
        let spec = tools::find_tool(name).ok_or_else(|| DispatchError::UnknownTool(name.into()))?;
        let args = spec
            .validate(arguments)
            .map_err(|reason| DispatchError::InvalidArguments {
                tool: name.to_string(),
                reason,
            })?;
        debug!(tool = name, "Dispatching tool call");

        let s = &self.session;
        let text = match name {
            "chat" => {
                s.send_chat(text_arg(&args, name, "message")?).await?;
                "Message sent".to_string()
            }
            "jump" => {
                s.jump().await?;
                "Jumped!".to_string()
            }
            "moveForward" => {
                s.move_forward().await?;
                "Moved forward".to_string()
            }
            "moveBack" => {
                s.move_back().await?;
                "Moved back".to_string()
            }
            "turnLeft" => {
                s.turn_left().await?;
                "Turned left".to_string()
            }
            "turnRight" => {
                s.turn_right().await?;
                "Turned right".to_string()
            }
            "placeBlock" => {
                let pos = block_arg(&args, name)?;
                s.place_block(pos).await?;
                format!("Placed block on top of {pos}")
            }
            "digBlock" => {
                let pos = block_arg(&args, name)?;
                let block = s.dig_block(pos).await?;
                format!("Dug {} at {pos}", block.name)
            }
            "getBlockInfo" => to_json(&s.get_block_info(block_arg(&args, name)?).await?)?,
            "selectSlot" => {
                let slot = integer_arg(&args, name, "slot")?;
                s.select_slot(slot).await?;
                format!("Selected slot {slot}")
            }
            "getInventory" => to_json(&s.get_inventory().await?)?,
            "equipItem" => {
                let destination = args
                    .text("destination")
                    .map(str::parse::<EquipDestination>)
                    .transpose()
                    .map_err(|reason| invalid(name, reason))?;
                let (item, destination) = s
                    .equip_item(text_arg(&args, name, "itemName")?, destination)
                    .await?;
                format!("Equipped {} to {}", item.name, destination.as_str())
            }
            "getStatus" => to_json(&s.get_status().await?)?,
            "getNearbyEntities" => {
                let range = args.number("range").unwrap_or(DEFAULT_ENTITY_RANGE);
                to_json(&s.get_nearby_entities(range).await?)?
            }
            "attack" => {
                let target = text_arg(&args, name, "entityName")?;
                s.attack(target).await?;
                format!("Attacked {target}")
            }
            "useItem" => {
                let hand = args.text("hand").unwrap_or("right");
                s.use_item(hand.parse::<Hand>().map_err(|reason| invalid(name, reason))?)
                    .await?;
                format!("Using item in {hand} hand")
            }
            "stopUsingItem" => {
                s.stop_using_item().await?;
                "Stopped using item".to_string()
            }
            "lookAt" => {
                let target = position_arg(&args, name)?;
                s.look_at(target).await?;
                format!("Looking at ({}, {}, {})", target.x, target.y, target.z)
            }
            "followPlayer" => {
                let player = text_arg(&args, name, "playerName")?;
                match s.follow_player(player).await? {
                    NavigationOutcome::Reached => format!("Reached {player}"),
                    NavigationOutcome::Cancelled => format!("Stopped following {player}"),
                    NavigationOutcome::Replaced => {
                        format!("Stopped following {player}: a newer goal took over")
                    }
                }
            }
            "stopFollowing" => {
                s.stop_following().await?;
                "Stopped following".to_string()
            }
            "goToPosition" => {
                let target = position_arg(&args, name)?;
                let label = format!("({}, {}, {})", target.x, target.y, target.z);
                match s.go_to_position(target).await? {
                    NavigationOutcome::Reached => format!("Arrived at {label}"),
                    NavigationOutcome::Cancelled => format!("Navigation to {label} cancelled"),
                    NavigationOutcome::Replaced => {
                        format!("Navigation to {label} replaced by a newer goal")
                    }
                }
            }
            other => return Err(DispatchError::UnknownTool(other.to_string())),
        };
        Ok(text)
    }
}

fn invalid(tool: &str, reason: impl Into<String>) -> DispatchError {
    DispatchError::InvalidArguments {
        tool: tool.to_string(),
        reason: reason.into(),
    }
}

fn text_arg<'a>(args: &'a ToolArgs, tool: &str, field: &str) -> Result<&'a str, DispatchError> {
    args.text(field)
        .ok_or_else(|| invalid(tool, format!("missing required argument '{field}'")))
}

fn number_arg(args: &ToolArgs, tool: &str, field: &str) -> Result<f64, DispatchError> {
    args.number(field)
        .ok_or_else(|| invalid(tool, format!("missing required argument '{field}'")))
}

fn integer_arg(args: &ToolArgs, tool: &str, field: &str) -> Result<i64, DispatchError> {
    args.integer(field)
        .ok_or_else(|| invalid(tool, format!("missing required argument '{field}'")))
}

fn position_arg(args: &ToolArgs, tool: &str) -> Result<Position, DispatchError> {
    Ok(Position::new(
        number_arg(args, tool, "x")?,
        number_arg(args, tool, "y")?,
        number_arg(args, tool, "z")?,
    ))
}

fn block_arg(args: &ToolArgs, tool: &str) -> Result<BlockPos, DispatchError> {
    let p = position_arg(args, tool)?;
    Ok(BlockPos::containing(p.x, p.y, p.z))
}
