use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Create a room. Names are unique case-insensitively: the case-folded
    /// name index is claimed before the WAL write and released if it fails.
    pub async fn create_room(
        &self,
        name: String,
        capacity: u32,
        floor: i32,
        amenities: Vec<String>,
    ) -> Result<RoomInfo, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("room name must not be empty".into()));
        }
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if capacity < 1 {
            return Err(EngineError::Validation("capacity must be at least 1".into()));
        }
        if amenities.len() > MAX_AMENITIES {
            return Err(EngineError::LimitExceeded("too many amenities"));
        }
        if amenities.iter().any(|a| a.len() > MAX_AMENITY_LEN) {
            return Err(EngineError::LimitExceeded("amenity name too long"));
        }
        if self.room_count() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let id = Ulid::new();
        let folded = name.to_lowercase();
        match self.room_names.entry(folded.clone()) {
            Entry::Occupied(_) => return Err(EngineError::DuplicateName(name)),
            Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }

        let event = Event::RoomCreated {
            id,
            name: name.clone(),
            capacity,
            floor,
            amenities: amenities.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.room_names.remove(&folded);
            return Err(e);
        }

        let rs = RoomState::new(id, name.clone(), capacity, floor, amenities.clone());
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);

        Ok(RoomInfo {
            id,
            name,
            capacity,
            floor,
            amenities,
        })
    }

    /// All rooms matching the filters, sorted by name (case-insensitive, like
    /// the uniqueness collation).
    pub async fn list_rooms(
        &self,
        min_capacity: Option<u32>,
        amenity: Option<&str>,
    ) -> Vec<RoomInfo> {
        let mut rooms = Vec::new();
        for rid in self.room_ids() {
            let Some(rs) = self.get_room(&rid) else { continue };
            let guard = rs.read().await;
            if let Some(min) = min_capacity
                && guard.capacity < min
            {
                continue;
            }
            if let Some(wanted) = amenity
                && !guard.amenities.iter().any(|a| a.eq_ignore_ascii_case(wanted))
            {
                continue;
            }
            rooms.push(RoomInfo {
                id: guard.id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                floor: guard.floor,
                amenities: guard.amenities.clone(),
            });
        }
        rooms.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        rooms
    }

    pub async fn get_room_info(&self, id: &Ulid) -> Option<RoomInfo> {
        let rs = self.get_room(id)?;
        let guard = rs.read().await;
        Some(RoomInfo {
            id: guard.id,
            name: guard.name.clone(),
            capacity: guard.capacity,
            floor: guard.floor,
            amenities: guard.amenities.clone(),
        })
    }
}
