//! Room task tool — lets bots create, update, and hand off tasks in the
//! current room. Owner changes append handoff records automatically.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crewgate_core::rooms::{RoomManager, RoomTask, TaskPriority, TaskStatus};

use super::base::{optional_string, require_string, Tool};

pub struct RoomTaskTool {
    rooms: Arc<RoomManager>,
    /// Current room, set per-turn by the loop.
    room_id: Mutex<String>,
}

impl RoomTaskTool {
    pub fn new(rooms: Arc<RoomManager>) -> Self {
        Self {
            rooms,
            room_id: Mutex::new("general".into()),
        }
    }

    pub async fn set_room(&self, room_id: &str) {
        *self.room_id.lock().await = room_id.to_string();
    }
}

fn parse_status(s: &str) -> anyhow::Result<TaskStatus> {
    match s.trim().to_lowercase().as_str() {
        "todo" => Ok(TaskStatus::Todo),
        "in_progress" | "in-progress" | "started" => Ok(TaskStatus::InProgress),
        "done" | "completed" => Ok(TaskStatus::Done),
        "blocked" => Ok(TaskStatus::Blocked),
        other => anyhow::bail!("unknown status '{other}' (use todo/in_progress/done/blocked)"),
    }
}

fn parse_priority(s: &str) -> TaskPriority {
    match s.trim().to_lowercase().as_str() {
        "low" => TaskPriority::Low,
        "high" => TaskPriority::High,
        _ => TaskPriority::Normal,
    }
}

#[async_trait]
impl Tool for RoomTaskTool {
    fn name(&self) -> &str {
        "room_task"
    }

    fn description(&self) -> &str {
        "Manage tasks in the current room: add a task, change its status, \
         assign it to a bot (logged as a handoff), or list tasks."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "status", "assign", "list"],
                    "description": "What to do"
                },
                "title": { "type": "string", "description": "Task title (for add)" },
                "owner": { "type": "string", "description": "Initial owner (for add; default 'leader')" },
                "priority": { "type": "string", "enum": ["low", "normal", "high"] },
                "due_date": { "type": "string", "description": "Due date, ISO format (optional)" },
                "task_id": { "type": "string", "description": "Task id or unique prefix (for status/assign)" },
                "status": { "type": "string", "enum": ["todo", "in_progress", "done", "blocked"] },
                "to": { "type": "string", "description": "New owner (for assign)" },
                "reason": { "type": "string", "description": "Handoff reason (for assign)" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let action = require_string(&params, "action")?;
        let room_id = self.room_id.lock().await.clone();

        match action.as_str() {
            "add" => {
                let title = require_string(&params, "title")?;
                let owner = optional_string(&params, "owner").unwrap_or_else(|| "leader".into());
                let id = Uuid::new_v4().simple().to_string()[..8].to_string();

                let mut task = RoomTask::new(&id, &title, &owner);
                if let Some(priority) = optional_string(&params, "priority") {
                    task.priority = parse_priority(&priority);
                }
                task.due_date = optional_string(&params, "due_date");

                self.rooms.add_task(&room_id, task)?;
                Ok(format!("Added task {id} \"{title}\" (owner: {owner})"))
            }
            "status" => {
                let task_id = require_string(&params, "task_id")?;
                let status = parse_status(&require_string(&params, "status")?)?;
                self.rooms.update_task_status(&room_id, &task_id, status)?;
                Ok(format!("Task {task_id} is now {status:?}"))
            }
            "assign" => {
                let task_id = require_string(&params, "task_id")?;
                let to = require_string(&params, "to")?;
                let reason = optional_string(&params, "reason").unwrap_or_else(|| "reassigned".into());
                self.rooms.assign_task(&room_id, &task_id, &to, &reason)?;
                Ok(format!("Task {task_id} handed off to {to}"))
            }
            "list" => {
                let room = self
                    .rooms
                    .get_room(&room_id)
                    .ok_or_else(|| anyhow::anyhow!("room '{room_id}' not found"))?;
                if room.tasks.is_empty() {
                    return Ok("No tasks in this room.".into());
                }
                let lines: Vec<String> = room
                    .tasks
                    .iter()
                    .map(|t| {
                        format!(
                            "- [{}] {:?}/{:?} \"{}\" (owner: {}, handoffs: {})",
                            t.id,
                            t.status,
                            t.priority,
                            t.title,
                            t.owner,
                            t.handoffs.len()
                        )
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
            other => anyhow::bail!("unknown action '{other}' (use add/status/assign/list)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (RoomTaskTool, Arc<RoomManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let rooms = Arc::new(RoomManager::new(dir.path().to_path_buf()).unwrap());
        let tool = RoomTaskTool::new(rooms.clone());
        tool.set_room("general").await;
        (tool, rooms, dir)
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let (tool, _rooms, _dir) = setup().await;
        let out = tool
            .execute(params(&[("action", "add"), ("title", "Ship v1"), ("priority", "high")]))
            .await
            .unwrap();
        assert!(out.contains("Ship v1"));

        let list = tool.execute(params(&[("action", "list")])).await.unwrap();
        assert!(list.contains("Ship v1"));
        assert!(list.contains("High"));
    }

    #[tokio::test]
    async fn test_status_and_assign_with_handoff() {
        let (tool, rooms, _dir) = setup().await;
        let out = tool
            .execute(params(&[("action", "add"), ("title", "Review PR")]))
            .await
            .unwrap();
        let id = out.split_whitespace().nth(2).unwrap().to_string();

        tool.execute(params(&[("action", "status"), ("task_id", &id), ("status", "in_progress")]))
            .await
            .unwrap();
        tool.execute(params(&[
            ("action", "assign"),
            ("task_id", &id),
            ("to", "auditor"),
            ("reason", "quality gate"),
        ]))
        .await
        .unwrap();

        let room = rooms.get_room("general").unwrap();
        let task = &room.tasks[0];
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.owner, "auditor");
        assert_eq!(task.handoffs.len(), 1);
        assert_eq!(task.handoffs[0].reason, "quality gate");
    }

    #[tokio::test]
    async fn test_bad_status_rejected() {
        let (tool, _rooms, _dir) = setup().await;
        tool.execute(params(&[("action", "add"), ("title", "X")]))
            .await
            .unwrap();
        let err = tool
            .execute(params(&[("action", "status"), ("task_id", "zzz"), ("status", "paused")]))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_empty_list() {
        let (tool, _rooms, _dir) = setup().await;
        let out = tool.execute(params(&[("action", "list")])).await.unwrap();
        assert_eq!(out, "No tasks in this room.");
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let (tool, _rooms, _dir) = setup().await;
        assert!(tool.execute(params(&[("action", "purge")])).await.is_err());
    }
}
