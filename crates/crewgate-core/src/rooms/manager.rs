//! Room persistence and the channel ↔ room mapping table.
//!
//! Layout on disk: one JSON file per room under `rooms/`, plus
//! `channel_mappings.json` holding the `"channel:chat_id" → room_id` map.
//! DM transcripts are append-only JSONL files named `dm-<a>-<b>.jsonl` with
//! the names sorted, so both directions land in the same file.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;

use rand::Rng;
use tracing::{debug, info, warn};

use super::room::{Room, RoomTask, RoomType, TaskStatus};

/// The room that always exists.
pub const DEFAULT_ROOM_ID: &str = "general";

/// Alphabet for short ids: lowercase + digits with the lookalikes
/// (l, o, 0, 1) removed.
const SHORT_ID_ALPHABET: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";
const SHORT_ID_LEN: usize = 8;

/// Owns all rooms and the channel mapping table. Participant-set changes
/// and mapping changes are persisted before the call returns.
pub struct RoomManager {
    rooms_dir: PathBuf,
    rooms: RwLock<HashMap<String, Room>>,
    mappings: RwLock<HashMap<String, String>>,
}

impl RoomManager {
    /// Load rooms from `<data_dir>/rooms/`, creating the directory and the
    /// `general` room when absent.
    pub fn new(data_dir: PathBuf) -> anyhow::Result<Self> {
        let rooms_dir = data_dir.join("rooms");
        std::fs::create_dir_all(&rooms_dir)?;

        let mgr = Self {
            rooms_dir,
            rooms: RwLock::new(HashMap::new()),
            mappings: RwLock::new(HashMap::new()),
        };
        mgr.load_all();
        mgr.get_or_create_default();
        Ok(mgr)
    }

    fn load_all(&self) {
        let entries = match std::fs::read_dir(&self.rooms_dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to read rooms directory");
                return;
            }
        };

        let mut rooms = self.rooms.write().unwrap();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            if path.file_name().map_or(false, |n| n == "channel_mappings.json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<Room>(&s).map_err(Into::into))
            {
                Ok(room) => {
                    debug!(room_id = %room.id, "loaded room");
                    rooms.insert(room.id.clone(), room);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable room file"),
            }
        }
        drop(rooms);

        let mappings_path = self.mappings_path();
        if mappings_path.exists() {
            match std::fs::read_to_string(&mappings_path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<HashMap<String, String>>(&s).map_err(Into::into))
            {
                Ok(map) => {
                    debug!(count = map.len(), "loaded channel mappings");
                    *self.mappings.write().unwrap() = map;
                }
                Err(e) => warn!(error = %e, "failed to load channel mappings"),
            }
        }
    }

    fn mappings_path(&self) -> PathBuf {
        self.rooms_dir.join("channel_mappings.json")
    }

    fn room_path(&self, room_id: &str) -> PathBuf {
        self.rooms_dir.join(format!("{room_id}.json"))
    }

    fn save_room_locked(&self, room: &Room) {
        let path = self.room_path(&room.id);
        match serde_json::to_string_pretty(room) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(room_id = %room.id, error = %e, "failed to persist room");
                }
            }
            Err(e) => warn!(room_id = %room.id, error = %e, "failed to serialize room"),
        }
    }

    fn save_mappings(&self, map: &HashMap<String, String>) {
        match serde_json::to_string_pretty(map) {
            Ok(json) => {
                if let Err(e) = std::fs::write(self.mappings_path(), json) {
                    warn!(error = %e, "failed to persist channel mappings");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize channel mappings"),
        }
    }

    // ────────────── Room lifecycle ──────────────

    /// Ensure the `general` room exists; returns a copy of it.
    pub fn get_or_create_default(&self) -> Room {
        {
            let rooms = self.rooms.read().unwrap();
            if let Some(room) = rooms.get(DEFAULT_ROOM_ID) {
                return room.clone();
            }
        }
        let general = Room::new(DEFAULT_ROOM_ID, RoomType::Open, vec!["leader".into()]);
        let mut rooms = self.rooms.write().unwrap();
        let room = rooms.entry(DEFAULT_ROOM_ID.to_string()).or_insert(general);
        self.save_room_locked(room);
        info!("created default 'general' room with leader");
        room.clone()
    }

    pub fn get_room(&self, room_id: &str) -> Option<Room> {
        self.rooms.read().unwrap().get(room_id).cloned()
    }

    pub fn participants(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .read()
            .unwrap()
            .get(room_id)
            .map(|r| r.participants.clone())
            .unwrap_or_default()
    }

    /// Create a room. With `use_short_id`, the id is
    /// `<8-char short id>-<slug>` so names can collide freely.
    pub fn create_room(
        &self,
        name: &str,
        room_type: RoomType,
        participants: Option<Vec<String>>,
        use_short_id: bool,
    ) -> anyhow::Result<Room> {
        let slug = slugify(name);
        let mut rooms = self.rooms.write().unwrap();

        let room_id = if use_short_id {
            let mut id = None;
            for _ in 0..10 {
                let candidate = format!("{}-{}", generate_short_id(), slug);
                if !rooms.contains_key(&candidate) {
                    id = Some(candidate);
                    break;
                }
            }
            id.ok_or_else(|| anyhow::anyhow!("could not generate a unique room id for '{name}'"))?
        } else {
            if rooms.contains_key(&slug) {
                anyhow::bail!("room '{slug}' already exists");
            }
            slug
        };

        let participants = participants.unwrap_or_else(|| vec!["leader".into()]);
        if participants.is_empty() {
            anyhow::bail!("a room needs at least one participant");
        }

        let room = Room::new(&room_id, room_type, participants);
        self.save_room_locked(&room);
        rooms.insert(room_id.clone(), room.clone());
        info!(room_id = %room_id, bots = room.participants.len(), "created room");
        Ok(room)
    }

    /// Create a project room, guaranteeing the leader is a participant.
    pub fn create_project_room(&self, name: &str, bots: Vec<String>) -> anyhow::Result<Room> {
        let mut participants = bots;
        if !participants.iter().any(|b| b == "leader") {
            participants.insert(0, "leader".into());
        }
        self.create_room(name, RoomType::Project, Some(participants), true)
    }

    pub fn invite_bot(&self, room_id: &str, bot: &str) -> bool {
        let mut rooms = self.rooms.write().unwrap();
        let Some(room) = rooms.get_mut(room_id) else {
            warn!(room_id = %room_id, "invite into unknown room");
            return false;
        };
        if !room.add_participant(bot) {
            return false;
        }
        self.save_room_locked(room);
        info!(room_id = %room_id, bot = %bot, "invited bot");
        true
    }

    /// Remove a bot. The last participant can never be removed.
    pub fn remove_bot(&self, room_id: &str, bot: &str) -> bool {
        let mut rooms = self.rooms.write().unwrap();
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        if room.participants.len() <= 1 {
            warn!(room_id = %room_id, "refusing to remove the last bot");
            return false;
        }
        if !room.remove_participant(bot) {
            return false;
        }
        self.save_room_locked(room);
        info!(room_id = %room_id, bot = %bot, "removed bot");
        true
    }

    pub fn list_rooms(&self) -> Vec<Room> {
        let rooms = self.rooms.read().unwrap();
        let mut all: Vec<Room> = rooms.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    // ────────────── Tasks ──────────────

    pub fn add_task(&self, room_id: &str, task: RoomTask) -> anyhow::Result<()> {
        let mut rooms = self.rooms.write().unwrap();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| anyhow::anyhow!("room '{room_id}' not found"))?;
        room.tasks.push(task);
        self.save_room_locked(room);
        Ok(())
    }

    pub fn update_task_status(
        &self,
        room_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> anyhow::Result<()> {
        let mut rooms = self.rooms.write().unwrap();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| anyhow::anyhow!("room '{room_id}' not found"))?;
        let task = room
            .find_task_mut(task_id)
            .ok_or_else(|| anyhow::anyhow!("task '{task_id}' not found in '{room_id}'"))?;
        task.status = status;
        self.save_room_locked(room);
        Ok(())
    }

    /// Reassign a task; the handoff record is appended by the task itself.
    pub fn assign_task(
        &self,
        room_id: &str,
        task_id: &str,
        to: &str,
        reason: &str,
    ) -> anyhow::Result<()> {
        let mut rooms = self.rooms.write().unwrap();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| anyhow::anyhow!("room '{room_id}' not found"))?;
        let task = room
            .find_task_mut(task_id)
            .ok_or_else(|| anyhow::anyhow!("task '{task_id}' not found in '{room_id}'"))?;
        task.reassign(to, reason);
        self.save_room_locked(room);
        Ok(())
    }

    /// Block every in-progress task in a room (`/stop`). Returns the count.
    pub fn block_room_tasks(&self, room_id: &str) -> usize {
        let mut rooms = self.rooms.write().unwrap();
        let Some(room) = rooms.get_mut(room_id) else {
            return 0;
        };
        let blocked = room.block_in_progress_tasks();
        if blocked > 0 {
            self.save_room_locked(room);
        }
        blocked
    }

    // ────────────── Channel mappings ──────────────

    pub fn join_channel_to_room(&self, channel: &str, chat_id: &str, room_id: &str) -> anyhow::Result<()> {
        if !self.rooms.read().unwrap().contains_key(room_id) {
            anyhow::bail!("cannot join channel to unknown room '{room_id}'");
        }
        let key = format!("{channel}:{chat_id}");
        let mut mappings = self.mappings.write().unwrap();
        mappings.insert(key.clone(), room_id.to_string());
        self.save_mappings(&mappings);
        info!(mapping = %key, room_id = %room_id, "joined channel to room");
        Ok(())
    }

    pub fn leave_channel_from_room(&self, channel: &str, chat_id: &str) -> bool {
        let key = format!("{channel}:{chat_id}");
        let mut mappings = self.mappings.write().unwrap();
        if mappings.remove(&key).is_some() {
            self.save_mappings(&mappings);
            info!(mapping = %key, "removed channel mapping");
            true
        } else {
            false
        }
    }

    pub fn get_room_for_channel(&self, channel: &str, chat_id: &str) -> Option<String> {
        self.mappings
            .read()
            .unwrap()
            .get(&format!("{channel}:{chat_id}"))
            .cloned()
    }

    pub fn channel_mappings_for_room(&self, room_id: &str) -> Vec<(String, String)> {
        self.mappings
            .read()
            .unwrap()
            .iter()
            .filter(|(_, rid)| rid.as_str() == room_id)
            .filter_map(|(key, _)| {
                key.split_once(':')
                    .map(|(c, id)| (c.to_string(), id.to_string()))
            })
            .collect()
    }

    /// Resolve a channel to its room, mapping it to `general` when unmapped.
    pub fn auto_join_to_general(&self, channel: &str, chat_id: &str) -> String {
        if let Some(existing) = self.get_room_for_channel(channel, chat_id) {
            return existing;
        }
        if let Err(e) = self.join_channel_to_room(channel, chat_id, DEFAULT_ROOM_ID) {
            warn!(error = %e, "auto-join failed, using general without mapping");
        }
        DEFAULT_ROOM_ID.to_string()
    }

    // ────────────── DM rooms ──────────────

    /// Append one JSON record to the DM transcript between a user and a bot.
    pub fn append_dm_log(&self, a: &str, b: &str, record: &serde_json::Value) -> anyhow::Result<()> {
        let path = self.rooms_dir.join(format!("{}.jsonl", generate_dm_room_id(a, b)));
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }
}

/// Canonical DM room id: `dm-<a>-<b>` with names lowercased and sorted, so
/// `generate_dm_room_id(a, b) == generate_dm_room_id(b, a)`.
pub fn generate_dm_room_id(a: &str, b: &str) -> String {
    let mut names = [a.to_lowercase(), b.to_lowercase()];
    names.sort();
    format!("dm-{}-{}", names[0], names[1])
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    (0..SHORT_ID_LEN)
        .map(|_| SHORT_ID_ALPHABET[rng.gen_range(0..SHORT_ID_ALPHABET.len())] as char)
        .collect()
}

fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase().replace([' ', '_'], "-");
    lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect()
}
