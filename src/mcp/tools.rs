//! MCP tool catalog
//!
//! Every tool is described once in [`TOOLS`]. The same table produces the
//! JSON Schema advertised by `tools/list` and validates `tools/call`
//! arguments, applying defaults before the dispatcher sees them.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use super::protocol::{InputSchema, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Text,
    Number {
        min: Option<f64>,
        max: Option<f64>,
        default: Option<f64>,
    },
    Integer {
        min: i64,
        max: i64,
        default: Option<i64>,
    },
    Choice {
        values: &'static [&'static str],
        default: Option<&'static str>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

const fn required(name: &'static str, description: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        description,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, description: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        description,
        kind,
        required: false,
    }
}

const COORD: FieldKind = FieldKind::Number {
    min: None,
    max: None,
    default: None,
};

const XYZ: &[FieldSpec] = &[
    required("x", "X coordinate", COORD),
    required("y", "Y coordinate", COORD),
    required("z", "Z coordinate", COORD),
];

pub const EQUIP_DESTINATIONS: &[&str] = &["hand", "head", "torso", "legs", "feet"];
pub const HANDS: &[&str] = &["right", "left"];

/// The full, ordered tool catalog
pub static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "chat",
        description: "Send a chat message as the avatar",
        fields: &[required("message", "Message to send", FieldKind::Text)],
    },
    ToolSpec {
        name: "jump",
        description: "Make the avatar jump",
        fields: &[],
    },
    ToolSpec {
        name: "moveForward",
        description: "Walk forward for one second",
        fields: &[],
    },
    ToolSpec {
        name: "moveBack",
        description: "Walk backward for one second",
        fields: &[],
    },
    ToolSpec {
        name: "turnLeft",
        description: "Turn left for half a second",
        fields: &[],
    },
    ToolSpec {
        name: "turnRight",
        description: "Turn right for half a second",
        fields: &[],
    },
    ToolSpec {
        name: "placeBlock",
        description: "Place the held block on top of the block at the given coordinates",
        fields: XYZ,
    },
    ToolSpec {
        name: "digBlock",
        description: "Dig the block at the given coordinates",
        fields: XYZ,
    },
    ToolSpec {
        name: "getBlockInfo",
        description: "Get the name, position and hardness of the block at the given coordinates",
        fields: XYZ,
    },
    ToolSpec {
        name: "selectSlot",
        description: "Select a hotbar slot",
        fields: &[required(
            "slot",
            "Hotbar slot (0-8)",
            FieldKind::Integer {
                min: 0,
                max: 8,
                default: None,
            },
        )],
    },
    ToolSpec {
        name: "getInventory",
        description: "List the items in the avatar's inventory",
        fields: &[],
    },
    ToolSpec {
        name: "equipItem",
        description: "Equip the first inventory item whose name contains the given text",
        fields: &[
            required("itemName", "Item name or part of it", FieldKind::Text),
            optional(
                "destination",
                "Where to equip the item (defaults to the item's natural slot)",
                FieldKind::Choice {
                    values: EQUIP_DESTINATIONS,
                    default: None,
                },
            ),
        ],
    },
    ToolSpec {
        name: "getStatus",
        description: "Get health, food, game mode, position, weather and time of day",
        fields: &[],
    },
    ToolSpec {
        name: "getNearbyEntities",
        description: "List entities around the avatar, nearest first",
        fields: &[optional(
            "range",
            "Search radius in blocks",
            FieldKind::Number {
                min: Some(1.0),
                max: Some(100.0),
                default: Some(10.0),
            },
        )],
    },
    ToolSpec {
        name: "attack",
        description: "Attack the nearest entity with the given name within reach",
        fields: &[required("entityName", "Entity or player name", FieldKind::Text)],
    },
    ToolSpec {
        name: "useItem",
        description: "Start using the held item",
        fields: &[optional(
            "hand",
            "Which hand to use",
            FieldKind::Choice {
                values: HANDS,
                default: Some("right"),
            },
        )],
    },
    ToolSpec {
        name: "stopUsingItem",
        description: "Stop using the held item",
        fields: &[],
    },
    ToolSpec {
        name: "lookAt",
        description: "Turn to face the given coordinates",
        fields: XYZ,
    },
    ToolSpec {
        name: "followPlayer",
        description: "Follow a player until stopped; returns when following ends",
        fields: &[required("playerName", "Player to follow", FieldKind::Text)],
    },
    ToolSpec {
        name: "stopFollowing",
        description: "Cancel any active navigation goal",
        fields: &[],
    },
    ToolSpec {
        name: "goToPosition",
        description: "Walk to the given coordinates; returns on arrival or cancellation",
        fields: XYZ,
    },
];

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}

/// Tool definitions advertised by `tools/list`
pub fn all_tools() -> Vec<ToolDefinition> {
    TOOLS.iter().map(ToolSpec::definition).collect()
}

impl FieldSpec {
    fn schema(&self) -> Value {
        let mut schema = json!({ "description": self.description });
        match self.kind {
            FieldKind::Text => {
                schema["type"] = json!("string");
            }
            FieldKind::Number { min, max, default } => {
                schema["type"] = json!("number");
                if let Some(min) = min {
                    schema["minimum"] = json!(min);
                }
                if let Some(max) = max {
                    schema["maximum"] = json!(max);
                }
                if let Some(default) = default {
                    schema["default"] = json!(default);
                }
            }
            FieldKind::Integer { min, max, default } => {
                schema["type"] = json!("integer");
                schema["minimum"] = json!(min);
                schema["maximum"] = json!(max);
                if let Some(default) = default {
                    schema["default"] = json!(default);
                }
            }
            FieldKind::Choice { values, default } => {
                schema["type"] = json!("string");
                schema["enum"] = json!(values);
                if let Some(default) = default {
                    schema["default"] = json!(default);
                }
            }
        }
        schema
    }

    /// Check one supplied value against this field
    fn validate(&self, value: &Value) -> Result<ArgValue, String> {
        let name = self.name;
        match self.kind {
            FieldKind::Text => value
                .as_str()
                .map(|s| ArgValue::Text(s.to_string()))
                .ok_or_else(|| format!("'{name}' must be a string")),
            FieldKind::Number { min, max, .. } => {
                let n = value
                    .as_f64()
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| format!("'{name}' must be a number"))?;
                if min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max) {
                    return Err(format!(
                        "'{name}' must be between {} and {}",
                        min.unwrap_or(f64::MIN),
                        max.unwrap_or(f64::MAX)
                    ));
                }
                Ok(ArgValue::Number(n))
            }
            FieldKind::Integer { min, max, .. } => {
                let n = as_integer(value).ok_or_else(|| format!("'{name}' must be an integer"))?;
                if n < min || n > max {
                    return Err(format!("'{name}' must be between {min} and {max}"));
                }
                Ok(ArgValue::Integer(n))
            }
            FieldKind::Choice { values, .. } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("'{name}' must be a string"))?;
                if values.contains(&s) {
                    Ok(ArgValue::Text(s.to_string()))
                } else {
                    Err(format!("'{name}' must be one of: {}", values.join(", ")))
                }
            }
        }
    }

    fn default_value(&self) -> Option<ArgValue> {
        match self.kind {
            FieldKind::Text => None,
            FieldKind::Number { default, .. } => default.map(ArgValue::Number),
            FieldKind::Integer { default, .. } => default.map(ArgValue::Integer),
            FieldKind::Choice { default, .. } => default.map(|d| ArgValue::Text(d.to_string())),
        }
    }
}

/// Integers may arrive as `9` or `9.0`
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
            .map(|f| f as i64)
    })
}

impl ToolSpec {
    pub fn definition(&self) -> ToolDefinition {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|field| (field.name.to_string(), field.schema()))
            .collect();

        ToolDefinition {
            name: self.name.to_string(),
            description: self.description.to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties: Value::Object(properties),
                required: self
                    .fields
                    .iter()
                    .filter(|f| f.required)
                    .map(|f| f.name.to_string())
                    .collect(),
            },
        }
    }

    /// Validate raw call arguments, applying defaults
    ///
    /// `null` counts as absent. Unknown keys are ignored.
    pub fn validate(&self, arguments: Option<&Value>) -> Result<ToolArgs, String> {
        let empty = Map::new();
        let supplied = match arguments {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => return Err("arguments must be an object".to_string()),
        };

        let mut values = HashMap::new();
        for field in self.fields {
            match supplied.get(field.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    values.insert(field.name, field.validate(value)?);
                }
                None if field.required => {
                    return Err(format!("missing required argument '{}'", field.name));
                }
                None => {
                    if let Some(default) = field.default_value() {
                        values.insert(field.name, default);
                    }
                }
            }
        }
        Ok(ToolArgs { values })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Text(String),
    Number(f64),
    Integer(i64),
}

/// Arguments that passed validation
#[derive(Debug, Clone, Default)]
pub struct ToolArgs {
    values: HashMap<&'static str, ArgValue>,
}

impl ToolArgs {
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ArgValue::Number(n)) => Some(*n),
            Some(ArgValue::Integer(n)) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }
}
