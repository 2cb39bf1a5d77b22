//! Value types exchanged with the world

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A point in the world
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance
    pub fn distance_to(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Each coordinate rounded to two decimal places
    pub fn rounded(&self) -> Position {
        let round = |v: f64| (v * 100.0).round() / 100.0;
        Position::new(round(self.x), round(self.y), round(self.z))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Integer coordinates of one world cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The cell containing the given point
    pub fn containing(x: f64, y: f64, z: f64) -> Self {
        Self::new(x.floor() as i32, y.floor() as i32, z.floor() as i32)
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Side of a reference block that a new block is placed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockFace {
    Top,
    Bottom,
    North,
    South,
    East,
    West,
}

impl BlockFace {
    /// Unit vector pointing out of this face
    pub fn normal(self) -> (i32, i32, i32) {
        match self {
            Self::Top => (0, 1, 0),
            Self::Bottom => (0, -1, 0),
            Self::North => (0, 0, -1),
            Self::South => (0, 0, 1),
            Self::East => (1, 0, 0),
            Self::West => (-1, 0, 0),
        }
    }
}

/// Identity, coordinates and hardness of a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub position: BlockPos,
    #[serde(default)]
    pub hardness: Option<f64>,
}

impl Block {
    /// Whether the cell is empty space
    pub fn is_air(&self) -> bool {
        matches!(self.name.as_str(), "air" | "cave_air" | "void_air")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub name: String,
    pub count: u32,
    pub slot: u32,
    pub display_name: String,
}

/// Where an item is equipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipDestination {
    Hand,
    Head,
    Torso,
    Legs,
    Feet,
}

impl EquipDestination {
    pub const NAMES: [&'static str; 5] = ["hand", "head", "torso", "legs", "feet"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hand => "hand",
            Self::Head => "head",
            Self::Torso => "torso",
            Self::Legs => "legs",
            Self::Feet => "feet",
        }
    }

    /// The slot an item goes to when no destination is given
    pub fn natural_for(item_name: &str) -> Self {
        if item_name.ends_with("_helmet") || item_name.ends_with("_head") || item_name == "turtle_helmet"
        {
            Self::Head
        } else if item_name.ends_with("_chestplate") || item_name == "elytra" {
            Self::Torso
        } else if item_name.ends_with("_leggings") {
            Self::Legs
        } else if item_name.ends_with("_boots") {
            Self::Feet
        } else {
            Self::Hand
        }
    }
}

impl FromStr for EquipDestination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hand" => Ok(Self::Hand),
            "head" => Ok(Self::Head),
            "torso" => Ok(Self::Torso),
            "legs" => Ok(Self::Legs),
            "feet" => Ok(Self::Feet),
            other => Err(format!("unknown equip destination '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Right,
    Left,
}

impl FromStr for Hand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "right" => Ok(Self::Right),
            "left" => Ok(Self::Left),
            other => Err(format!("unknown hand '{other}'")),
        }
    }
}

/// An entity as reported by the world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub username: Option<String>,
    pub position: Position,
}

impl EntitySnapshot {
    /// Match against the entity's name or, for players, its username
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.username.as_deref() == Some(name)
    }
}

/// Entity projection returned by nearby-entity queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Position,
    pub distance: f64,
}

/// Snapshot of the avatar's vital state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarStatus {
    pub health: f64,
    pub food: f64,
    pub game_mode: String,
    pub position: Option<Position>,
    pub is_raining: bool,
    pub time_of_day: i64,
}

/// Control flags a timed action can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlDimension {
    Forward,
    Back,
    Left,
    Right,
    Jump,
}

impl ControlDimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Back => "back",
            Self::Left => "left",
            Self::Right => "right",
            Self::Jump => "jump",
        }
    }
}

/// A standing request for the avatar to move on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavigationGoal {
    /// Stand on the given cell
    Block { position: BlockPos },
    /// Keep within `range` of a moving entity
    Follow { entity_id: i64, range: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationOutcome {
    Reached,
    Cancelled,
    /// A newer goal took over
    Replaced,
}

/// Movement costs attached when navigation is enabled
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementProfile {
    pub can_dig: bool,
    pub allow_sprinting: bool,
    pub allow_parkour: bool,
    pub max_drop_down: u32,
}

impl Default for MovementProfile {
    fn default() -> Self {
        Self {
            can_dig: true,
            allow_sprinting: true,
            allow_parkour: true,
            max_drop_down: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_pos_containing_floors() {
        assert_eq!(BlockPos::containing(10.7, 64.0, -0.2), BlockPos::new(10, 64, -1));
    }

    #[test]
    fn test_rounded_position() {
        let p = Position::new(1.23456, -7.899, 64.005).rounded();
        assert_eq!(p, Position::new(1.23, -7.9, 64.01));
    }

    #[test]
    fn test_natural_equip_destination() {
        assert_eq!(EquipDestination::natural_for("iron_helmet"), EquipDestination::Head);
        assert_eq!(EquipDestination::natural_for("elytra"), EquipDestination::Torso);
        assert_eq!(EquipDestination::natural_for("golden_leggings"), EquipDestination::Legs);
        assert_eq!(EquipDestination::natural_for("leather_boots"), EquipDestination::Feet);
        assert_eq!(EquipDestination::natural_for("diamond_sword"), EquipDestination::Hand);
    }

    #[test]
    fn test_air_variants() {
        let block = |name: &str| Block {
            name: name.into(),
            position: BlockPos::new(0, 0, 0),
            hardness: None,
        };
        assert!(block("air").is_air());
        assert!(block("cave_air").is_air());
        assert!(!block("stone").is_air());
    }

    #[test]
    fn test_goal_wire_shape() {
        let goal = NavigationGoal::Follow {
            entity_id: 7,
            range: 2.0,
        };
        let json = serde_json::to_value(&goal).unwrap();
        assert_eq!(json["type"], "follow");
        assert_eq!(json["entity_id"], 7);
    }
}
