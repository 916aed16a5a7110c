use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::signaling::Role;
use crate::error::{CollabError, Result};

/// Initial buffer contents for a freshly created room.
pub const DEFAULT_CODE: &str = "// Start coding here...";
/// Initial language for a freshly created room.
pub const DEFAULT_LANGUAGE: &str = "javascript";

#[derive(Debug, Clone)]
pub struct Participant {
    /// Opaque per-socket id; participants are keyed by connection, not name.
    pub connection_id: String,
    pub user_name: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub code: String,
    pub language: String,
    /// Insertion-ordered; duplicate display names are legal.
    pub participants: Vec<Participant>,
}

impl Room {
    fn new(id: String) -> Self {
        Self {
            id,
            code: DEFAULT_CODE.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            participants: Vec::new(),
        }
    }

    fn user_names(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.user_name.clone())
            .collect()
    }
}

/// Room state returned to a joining connection.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub code: String,
    pub language: String,
    pub users: Vec<String>,
}

/// Result of removing a participant from a room.
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub participant: Participant,
    /// Remaining display names, or `None` when the room emptied and was
    /// dropped along with its transient state.
    pub remaining: Option<Vec<String>>,
}

/// Authoritative in-memory registry of rooms and their participants.
///
/// All mutation goes through this API; code and language values are
/// last-writer-wins with no version check.
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Add a participant to a room, creating the room if absent.
    ///
    /// Never fails: join implicitly creates. A re-join by the same
    /// connection id replaces the previous entry.
    pub async fn join(&self, room_id: &str, participant: Participant) -> RoomSnapshot {
        let mut rooms = self.rooms.write().await;

        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                tracing::info!(room_id = %room_id, "Room created on first join");
                Room::new(room_id.to_string())
            });

        room.participants
            .retain(|p| p.connection_id != participant.connection_id);
        tracing::info!(
            room_id = %room_id,
            connection_id = %participant.connection_id,
            user_name = %participant.user_name,
            role = ?participant.role,
            "Participant joined room"
        );
        room.participants.push(participant);

        RoomSnapshot {
            code: room.code.clone(),
            language: room.language.clone(),
            users: room.user_names(),
        }
    }

    /// Remove a participant; drops the room when its participant set
    /// becomes empty. Returns `None` if the room or participant is unknown.
    pub async fn leave(&self, room_id: &str, connection_id: &str) -> Option<LeaveOutcome> {
        let mut rooms = self.rooms.write().await;

        let room = rooms.get_mut(room_id)?;
        let position = room
            .participants
            .iter()
            .position(|p| p.connection_id == connection_id)?;
        let participant = room.participants.remove(position);

        tracing::info!(
            room_id = %room_id,
            connection_id = %connection_id,
            user_name = %participant.user_name,
            "Participant left room"
        );

        let remaining = if room.participants.is_empty() {
            rooms.remove(room_id);
            tracing::info!(room_id = %room_id, "Last participant left, dropping room");
            None
        } else {
            Some(room.user_names())
        };

        Some(LeaveOutcome {
            participant,
            remaining,
        })
    }

    /// Unconditionally overwrite the room's code buffer (last-writer-wins).
    pub async fn set_code(&self, room_id: &str, code: String) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| CollabError::RoomNotFound(room_id.to_string()))?;
        room.code = code;
        Ok(())
    }

    /// Unconditionally overwrite the room's language (last-writer-wins).
    pub async fn set_language(&self, room_id: &str, language: String) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| CollabError::RoomNotFound(room_id.to_string()))?;
        room.language = language;
        Ok(())
    }

    /// Current display-name list for a room (empty if the room is unknown).
    pub async fn users(&self, room_id: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|r| r.user_names())
            .unwrap_or_default()
    }

    /// Connection ids of every participant in a room.
    pub async fn connection_ids(&self, room_id: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|r| {
                r.participants
                    .iter()
                    .map(|p| p.connection_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|room| RoomSnapshot {
            code: room.code.clone(),
            language: room.language.clone(),
            users: room.user_names(),
        })
    }

    pub async fn room_exists(&self, room_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms.contains_key(room_id)
    }
}
