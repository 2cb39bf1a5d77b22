//! Session error types

use thiserror::Error;

use super::models::BlockPos;

/// Failures of the underlying world link (transport or remote rejection)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LinkError {
    #[error("connection closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote side refused the request
    #[error("{0}")]
    Rejected(String),
}

/// Errors returned by [`super::SessionClient`] operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("avatar is already connected")]
    AlreadyConnected,

    #[error("failed to connect avatar: {0}")]
    ConnectionError(String),

    #[error("avatar is not connected")]
    NotConnected,

    #[error("chat message must not be empty")]
    EmptyMessage,

    #[error("invalid hotbar slot {0}: must be between 0 and 8")]
    InvalidSlot(i64),

    #[error("no block at {0}")]
    NoTargetBlock(BlockPos),

    #[error("cannot dig air at {0}")]
    CannotDigAir(BlockPos),

    #[error("no inventory item matching '{0}'")]
    ItemNotFound(String),

    #[error("no entity named '{0}' within reach")]
    EntityNotFound(String),

    #[error("player '{0}' is not visible")]
    PlayerNotFound(String),

    #[error("navigation is not available in this session")]
    NavigationUnavailable,

    /// Another motion owns the avatar's controls
    #[error("avatar is busy: {0}")]
    Busy(String),

    /// The world rejected or failed the action
    #[error("world rejected the action: {0}")]
    Remote(String),
}

impl SessionError {
    /// Stable kind name, as reported to protocol callers
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyConnected => "AlreadyConnected",
            Self::ConnectionError(_) => "ConnectionError",
            Self::NotConnected => "NotConnected",
            Self::EmptyMessage => "EmptyMessage",
            Self::InvalidSlot(_) => "InvalidSlot",
            Self::NoTargetBlock(_) => "NoTargetBlock",
            Self::CannotDigAir(_) => "CannotDigAir",
            Self::ItemNotFound(_) => "ItemNotFound",
            Self::EntityNotFound(_) => "EntityNotFound",
            Self::PlayerNotFound(_) => "PlayerNotFound",
            Self::NavigationUnavailable => "NavigationUnavailable",
            Self::Busy(_) => "Busy",
            Self::Remote(_) => "Remote",
        }
    }
}

impl From<LinkError> for SessionError {
    fn from(err: LinkError) -> Self {
        Self::Remote(err.to_string())
    }
}
