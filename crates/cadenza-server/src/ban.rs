//! Global and per-room ban sets.
//!
//! Held in memory for the server's lifetime; persistence and the admin
//! surface that mutates these live outside the core. Join-time checks
//! consult the global set first, then the room set.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use cadenza_protocol::RoomId;

/// Banned user ids, server-wide and per room.
#[derive(Debug, Default)]
pub struct BanList {
    global: RwLock<HashSet<i32>>,
    rooms: RwLock<HashMap<RoomId, HashSet<i32>>>,
}

impl BanList {
    pub fn is_banned(&self, user: i32) -> bool {
        self.global.read().unwrap().contains(&user)
    }

    /// Returns `false` if the user was already banned.
    pub fn ban(&self, user: i32) -> bool {
        self.global.write().unwrap().insert(user)
    }

    /// Returns `false` if the user was not banned.
    pub fn unban(&self, user: i32) -> bool {
        self.global.write().unwrap().remove(&user)
    }

    pub fn is_room_banned(&self, user: i32, room: &RoomId) -> bool {
        self.rooms
            .read()
            .unwrap()
            .get(room)
            .is_some_and(|set| set.contains(&user))
    }

    pub fn ban_in_room(&self, user: i32, room: &RoomId) -> bool {
        self.rooms
            .write()
            .unwrap()
            .entry(room.clone())
            .or_default()
            .insert(user)
    }

    pub fn unban_in_room(&self, user: i32, room: &RoomId) -> bool {
        self.rooms
            .write()
            .unwrap()
            .get_mut(room)
            .is_some_and(|set| set.remove(&user))
    }

    /// Drops a destroyed room's ban set.
    pub fn forget_room(&self, room: &RoomId) {
        self.rooms.write().unwrap().remove(room);
    }
}
