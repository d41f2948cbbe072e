//! Room and task models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of conversation context a room is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// The always-on default room.
    Open,
    /// A project workspace with a curated bot set.
    Project,
    /// One user, one bot.
    Direct,
    /// Bot-to-bot coordination.
    Coordination,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Blocked,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Immutable record of a task changing owner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Handoff {
    pub from: String,
    pub to: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// A unit of work tracked inside a room.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomTask {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub handoffs: Vec<Handoff>,
    pub created_at: DateTime<Utc>,
}

impl RoomTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>, owner: impl Into<String>) -> Self {
        RoomTask {
            id: id.into(),
            title: title.into(),
            owner: owner.into(),
            status: TaskStatus::Todo,
            priority: TaskPriority::Normal,
            due_date: None,
            handoffs: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Change the owner, appending exactly one handoff record.
    pub fn reassign(&mut self, to: impl Into<String>, reason: impl Into<String>) {
        let to = to.into();
        if to == self.owner {
            return;
        }
        self.handoffs.push(Handoff {
            from: std::mem::replace(&mut self.owner, to.clone()),
            to,
            reason: reason.into(),
            timestamp: Utc::now(),
        });
    }
}

/// A durable conversation context with a fixed set of bot participants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub participants: Vec<String>,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tasks: Vec<RoomTask>,
}

impl Room {
    pub fn new(id: impl Into<String>, room_type: RoomType, participants: Vec<String>) -> Self {
        Room {
            id: id.into(),
            room_type,
            participants,
            owner: "user".into(),
            created_at: Utc::now(),
            summary: String::new(),
            tasks: Vec::new(),
        }
    }

    pub fn has_participant(&self, bot: &str) -> bool {
        self.participants.iter().any(|p| p == bot)
    }

    pub fn add_participant(&mut self, bot: impl Into<String>) -> bool {
        let bot = bot.into();
        if self.has_participant(&bot) {
            return false;
        }
        self.participants.push(bot);
        true
    }

    pub fn remove_participant(&mut self, bot: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p != bot);
        self.participants.len() != before
    }

    /// Find a task by full id or unique id prefix.
    pub fn find_task_mut(&mut self, id_or_prefix: &str) -> Option<&mut RoomTask> {
        let mut matches: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.id == id_or_prefix || t.id.starts_with(id_or_prefix))
            .map(|(i, _)| i)
            .collect();
        // Exact match wins over prefix ambiguity.
        if matches.len() > 1 {
            matches.retain(|&i| self.tasks[i].id == id_or_prefix);
        }
        match matches.as_slice() {
            [i] => self.tasks.get_mut(*i),
            _ => None,
        }
    }

    /// Mark all in-progress tasks blocked (a `/stop` side effect).
    /// Returns how many were blocked.
    pub fn block_in_progress_tasks(&mut self) -> usize {
        let mut blocked = 0;
        for task in &mut self.tasks {
            if task.status == TaskStatus::InProgress {
                task.status = TaskStatus::Blocked;
                blocked += 1;
            }
        }
        blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassign_appends_one_handoff() {
        let mut task = RoomTask::new("t1", "Write docs", "leader");
        task.reassign("researcher", "domain fit");
        assert_eq!(task.owner, "researcher");
        assert_eq!(task.handoffs.len(), 1);
        assert_eq!(task.handoffs[0].from, "leader");
        assert_eq!(task.handoffs[0].to, "researcher");
        assert!(!task.handoffs[0].from.is_empty());
    }

    #[test]
    fn test_reassign_to_same_owner_is_noop() {
        let mut task = RoomTask::new("t1", "Write docs", "leader");
        task.reassign("leader", "no-op");
        assert!(task.handoffs.is_empty());
    }

    #[test]
    fn test_participants() {
        let mut room = Room::new("general", RoomType::Open, vec!["leader".into()]);
        assert!(room.add_participant("coder"));
        assert!(!room.add_participant("coder"));
        assert!(room.has_participant("coder"));
        assert!(room.remove_participant("coder"));
        assert!(!room.remove_participant("coder"));
    }

    #[test]
    fn test_find_task_by_prefix() {
        let mut room = Room::new("r", RoomType::Project, vec!["leader".into()]);
        room.tasks.push(RoomTask::new("abc123", "one", "leader"));
        room.tasks.push(RoomTask::new("abd456", "two", "leader"));
        assert_eq!(room.find_task_mut("abc").unwrap().title, "one");
        // Ambiguous prefix resolves to nothing.
        assert!(room.find_task_mut("ab").is_none());
        // Exact id beats prefix ambiguity.
        room.tasks.push(RoomTask::new("ab", "exact", "leader"));
        assert_eq!(room.find_task_mut("ab").unwrap().title, "exact");
    }

    #[test]
    fn test_block_in_progress() {
        let mut room = Room::new("r", RoomType::Project, vec!["leader".into()]);
        let mut t1 = RoomTask::new("1", "a", "leader");
        t1.status = TaskStatus::InProgress;
        let t2 = RoomTask::new("2", "b", "leader");
        let mut t3 = RoomTask::new("3", "c", "leader");
        t3.status = TaskStatus::InProgress;
        room.tasks.extend([t1, t2, t3]);

        assert_eq!(room.block_in_progress_tasks(), 2);
        assert_eq!(room.tasks[0].status, TaskStatus::Blocked);
        assert_eq!(room.tasks[1].status, TaskStatus::Todo);
    }

    #[test]
    fn test_room_serde_round_trip() {
        let room = Room::new("abc-web", RoomType::Project, vec!["leader".into(), "coder".into()]);
        let s = serde_json::to_string(&room).unwrap();
        let back: Room = serde_json::from_str(&s).unwrap();
        assert_eq!(back.id, "abc-web");
        assert_eq!(back.room_type, RoomType::Project);
        assert_eq!(back.participants.len(), 2);
    }
}
