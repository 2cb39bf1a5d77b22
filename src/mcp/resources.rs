//! MCP resources: the avatar's location and connectivity

use serde_json::json;

use super::handlers::DispatchError;
use super::protocol::{ResourceContent, ResourceDefinition};
use crate::session::SessionClient;

pub const LOCATION_URI: &str = "world://avatar/location";
pub const STATUS_URI: &str = "world://avatar/status";

const JSON_MIME: &str = "application/json";

pub fn all_resources() -> Vec<ResourceDefinition> {
    vec![
        ResourceDefinition {
            uri: LOCATION_URI.to_string(),
            name: "Avatar Location".to_string(),
            description: "Current avatar position in the world".to_string(),
            mime_type: JSON_MIME.to_string(),
        },
        ResourceDefinition {
            uri: STATUS_URI.to_string(),
            name: "Avatar Status".to_string(),
            description: "Whether the avatar is connected".to_string(),
            mime_type: JSON_MIME.to_string(),
        },
    ]
}

/// Read one resource; only the location can be unavailable
pub fn read_resource(session: &SessionClient, uri: &str) -> Result<ResourceContent, DispatchError> {
    let text = match uri {
        LOCATION_URI => {
            let pos = session
                .get_position()
                .ok_or_else(|| DispatchError::ResourceUnavailable("position not available".into()))?
                .rounded();
            json!({ "x": pos.x, "y": pos.y, "z": pos.z }).to_string()
        }
        STATUS_URI => json!({ "connected": session.is_connected() }).to_string(),
        other => return Err(DispatchError::UnknownResource(other.to_string())),
    };

    Ok(ResourceContent {
        uri: uri.to_string(),
        mime_type: JSON_MIME.to_string(),
        text,
    })
}
