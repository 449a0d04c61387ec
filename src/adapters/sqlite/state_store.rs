//! SQLite implementation of the `StateStore` port.
//!
//! The whole aggregate is loaded and saved wholesale: save runs one
//! transaction that replaces every collection, so a crash mid-save leaves
//! the previous snapshot intact (last write wins). The coordinator
//! guarantees saves never race.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentInstance, AgentRole, AgentStatus, FileLock, Message, Plan, Presence, RegisteredAgent,
    SessionNote, SharedState, Task, TaskStatus, WorkContext,
};
use crate::domain::ports::StateStore;

use super::{parse_datetime, parse_json_or_default, parse_optional_datetime};

const META_NEXT_MESSAGE_ID: &str = "next_message_id";
const META_NEXT_TASK_ID: &str = "next_task_id";
const META_NEXT_NOTE_ID: &str = "next_note_id";
const META_ACTIVE_DRIVER: &str = "active_driver";

#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self) -> DomainResult<SharedState> {
        let mut state = SharedState::default();

        let task_rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        state.tasks = task_rows
            .into_iter()
            .map(Task::try_from)
            .collect::<DomainResult<_>>()?;

        let agent_rows: Vec<AgentRow> = sqlx::query_as("SELECT * FROM agents")
            .fetch_all(&self.pool)
            .await?;
        for row in agent_rows {
            let agent = AgentInstance::try_from(row)?;
            state.agents.insert(agent.instance_id.clone(), agent);
        }

        let presence_rows: Vec<PresenceRow> = sqlx::query_as("SELECT * FROM presence")
            .fetch_all(&self.pool)
            .await?;
        for row in presence_rows {
            let p = Presence::try_from(row)?;
            state.presence.insert(p.agent.clone(), p);
        }

        let message_rows: Vec<MessageRow> = sqlx::query_as("SELECT * FROM messages ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        state.messages = message_rows
            .into_iter()
            .map(Message::try_from)
            .collect::<DomainResult<_>>()?;

        let plan_rows: Vec<PlanRow> = sqlx::query_as("SELECT * FROM plans ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        state.plans = plan_rows
            .into_iter()
            .map(Plan::try_from)
            .collect::<DomainResult<_>>()?;

        let note_rows: Vec<NoteRow> = sqlx::query_as("SELECT * FROM notes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        state.notes = note_rows
            .into_iter()
            .map(SessionNote::try_from)
            .collect::<DomainResult<_>>()?;

        let lock_rows: Vec<FileLockRow> = sqlx::query_as("SELECT * FROM file_locks")
            .fetch_all(&self.pool)
            .await?;
        state.file_locks = lock_rows
            .into_iter()
            .map(FileLock::try_from)
            .collect::<DomainResult<_>>()?;

        let ctx_rows: Vec<WorkContextRow> = sqlx::query_as("SELECT * FROM work_contexts")
            .fetch_all(&self.pool)
            .await?;
        for row in ctx_rows {
            let ctx = WorkContext::try_from(row)?;
            state.work_contexts.insert(ctx.agent.clone(), ctx);
        }

        let reg_rows: Vec<RegisteredAgentRow> = sqlx::query_as("SELECT * FROM registered_agents")
            .fetch_all(&self.pool)
            .await?;
        for row in reg_rows {
            let reg = RegisteredAgent::try_from(row)?;
            state.registered_agents.insert(reg.name.clone(), reg);
        }

        let meta = self.load_meta().await?;
        state.next_message_id = meta_i64(&meta, META_NEXT_MESSAGE_ID).unwrap_or(1);
        state.next_task_id = meta_i64(&meta, META_NEXT_TASK_ID).unwrap_or(1);
        state.next_note_id = meta_i64(&meta, META_NEXT_NOTE_ID).unwrap_or(1);
        state.active_driver = meta
            .get(META_ACTIVE_DRIVER)
            .filter(|v| !v.is_empty())
            .cloned();

        // Stored counters are advisory only.
        state.normalize();

        Ok(state)
    }

    async fn save(&self, state: &SharedState) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        for table in [
            "tasks",
            "agents",
            "presence",
            "messages",
            "plans",
            "notes",
            "file_locks",
            "work_contexts",
            "registered_agents",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }

        for task in &state.tasks {
            sqlx::query(
                r#"INSERT INTO tasks (id, title, description, status, assigned_to, created_by,
                   created_at, updated_at, priority, expected_duration_sec, progress_description,
                   progress_percent, last_progress_at, eta_seconds, result_summary, dependencies,
                   blocked_by, worker_type, capabilities, relevant_files, background, constraints,
                   sla_over, cancel_seen)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(task.id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.status.as_str())
            .bind(&task.assigned_to)
            .bind(&task.created_by)
            .bind(task.created_at.to_rfc3339())
            .bind(task.updated_at.to_rfc3339())
            .bind(i64::from(task.priority))
            .bind(task.expected_duration_sec)
            .bind(&task.progress_description)
            .bind(i64::from(task.progress_percent))
            .bind(task.last_progress_at.map(|t| t.to_rfc3339()))
            .bind(task.eta_seconds)
            .bind(&task.result_summary)
            .bind(serde_json::to_string(&task.dependencies)?)
            .bind(&task.blocked_by)
            .bind(&task.worker_type)
            .bind(serde_json::to_string(&task.capabilities)?)
            .bind(serde_json::to_string(&task.relevant_files)?)
            .bind(&task.background)
            .bind(serde_json::to_string(&task.constraints)?)
            .bind(task.sla_over)
            .bind(task.cancel_seen)
            .execute(&mut *tx)
            .await?;
        }

        for agent in state.agents.values() {
            sqlx::query(
                r#"INSERT INTO agents (instance_id, agent_type, role, capabilities, max_tasks,
                   status, current_tasks, last_heartbeat, progress, step, total_steps,
                   progress_updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&agent.instance_id)
            .bind(&agent.agent_type)
            .bind(agent.role.as_str())
            .bind(serde_json::to_string(&agent.capabilities)?)
            .bind(i64::from(agent.max_tasks))
            .bind(agent.status.as_str())
            .bind(serde_json::to_string(&agent.current_tasks)?)
            .bind(agent.last_heartbeat.to_rfc3339())
            .bind(&agent.progress)
            .bind(agent.step.map(i64::from))
            .bind(agent.total_steps.map(i64::from))
            .bind(agent.progress_updated_at.map(|t| t.to_rfc3339()))
            .execute(&mut *tx)
            .await?;
        }

        for p in state.presence.values() {
            sqlx::query(
                "INSERT INTO presence (agent, status, workspace, note, last_seen) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&p.agent)
            .bind(&p.status)
            .bind(&p.workspace)
            .bind(&p.note)
            .bind(p.last_seen.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for m in &state.messages {
            sqlx::query(
                "INSERT INTO messages (id, sender, recipient, content, timestamp, read) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(m.id)
            .bind(&m.from)
            .bind(&m.to)
            .bind(&m.content)
            .bind(m.timestamp.to_rfc3339())
            .bind(m.read)
            .execute(&mut *tx)
            .await?;
        }

        for plan in &state.plans {
            sqlx::query(
                "INSERT INTO plans (id, title, created_by, created_at, updated_at, items) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(plan.id)
            .bind(&plan.title)
            .bind(&plan.created_by)
            .bind(plan.created_at.to_rfc3339())
            .bind(plan.updated_at.to_rfc3339())
            .bind(serde_json::to_string(&plan.items)?)
            .execute(&mut *tx)
            .await?;
        }

        for note in &state.notes {
            sqlx::query(
                "INSERT INTO notes (id, author, content, created_at, tags) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(note.id)
            .bind(&note.author)
            .bind(&note.content)
            .bind(note.created_at.to_rfc3339())
            .bind(serde_json::to_string(&note.tags)?)
            .execute(&mut *tx)
            .await?;
        }

        for lock in &state.file_locks {
            sqlx::query(
                "INSERT INTO file_locks (path, held_by, purpose, acquired_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&lock.path)
            .bind(&lock.held_by)
            .bind(&lock.purpose)
            .bind(lock.acquired_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for ctx in state.work_contexts.values() {
            sqlx::query(
                "INSERT INTO work_contexts (agent, summary, current_focus, open_questions, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&ctx.agent)
            .bind(&ctx.summary)
            .bind(&ctx.current_focus)
            .bind(serde_json::to_string(&ctx.open_questions)?)
            .bind(ctx.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for reg in state.registered_agents.values() {
            sqlx::query(
                "INSERT INTO registered_agents (name, display_name, capabilities, registered_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&reg.name)
            .bind(&reg.display_name)
            .bind(serde_json::to_string(&reg.capabilities)?)
            .bind(reg.registered_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for (key, value) in [
            (META_NEXT_MESSAGE_ID, state.next_message_id.to_string()),
            (META_NEXT_TASK_ID, state.next_task_id.to_string()),
            (META_NEXT_NOTE_ID, state.next_note_id.to_string()),
            (
                META_ACTIVE_DRIVER,
                state.active_driver.clone().unwrap_or_default(),
            ),
        ] {
            sqlx::query(
                "INSERT INTO meta (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

impl SqliteStateStore {
    async fn load_meta(&self) -> DomainResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM meta")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}

fn meta_i64(meta: &HashMap<String, String>, key: &str) -> Option<i64> {
    meta.get(key).and_then(|v| v.parse().ok())
}

#[derive(FromRow)]
struct TaskRow {
    id: i64,
    title: String,
    description: String,
    status: String,
    assigned_to: String,
    created_by: String,
    created_at: String,
    updated_at: String,
    priority: i64,
    expected_duration_sec: Option<i64>,
    progress_description: String,
    progress_percent: i64,
    last_progress_at: Option<String>,
    eta_seconds: Option<i64>,
    result_summary: String,
    dependencies: Option<String>,
    blocked_by: Option<String>,
    worker_type: Option<String>,
    capabilities: Option<String>,
    relevant_files: Option<String>,
    background: String,
    constraints: Option<String>,
    sla_over: bool,
    cancel_seen: bool,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> DomainResult<Self> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::Serialization(format!("unknown task status {}", row.status)))?;
        Ok(Task {
            id: row.id,
            title: row.title,
            description: row.description,
            status,
            assigned_to: row.assigned_to,
            created_by: row.created_by,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            priority: u8::try_from(row.priority.clamp(1, 5)).unwrap_or(3),
            expected_duration_sec: row.expected_duration_sec,
            progress_description: row.progress_description,
            progress_percent: u8::try_from(row.progress_percent.clamp(0, 100)).unwrap_or(0),
            last_progress_at: parse_optional_datetime(row.last_progress_at)?,
            eta_seconds: row.eta_seconds,
            result_summary: row.result_summary,
            dependencies: parse_json_or_default(row.dependencies)?,
            blocked_by: row.blocked_by,
            worker_type: row.worker_type,
            capabilities: parse_json_or_default(row.capabilities)?,
            relevant_files: parse_json_or_default(row.relevant_files)?,
            background: row.background,
            constraints: parse_json_or_default(row.constraints)?,
            sla_over: row.sla_over,
            cancel_seen: row.cancel_seen,
        })
    }
}

#[derive(FromRow)]
struct AgentRow {
    instance_id: String,
    agent_type: String,
    role: String,
    capabilities: Option<String>,
    max_tasks: i64,
    status: String,
    current_tasks: Option<String>,
    last_heartbeat: String,
    progress: String,
    step: Option<i64>,
    total_steps: Option<i64>,
    progress_updated_at: Option<String>,
}

impl TryFrom<AgentRow> for AgentInstance {
    type Error = DomainError;

    fn try_from(row: AgentRow) -> DomainResult<Self> {
        let role = AgentRole::parse_str(&row.role)
            .ok_or_else(|| DomainError::Serialization(format!("unknown role {}", row.role)))?;
        let status = AgentStatus::parse_str(&row.status)
            .ok_or_else(|| DomainError::Serialization(format!("unknown agent status {}", row.status)))?;
        Ok(AgentInstance {
            instance_id: row.instance_id,
            agent_type: row.agent_type,
            role,
            capabilities: parse_json_or_default(row.capabilities)?,
            max_tasks: u32::try_from(row.max_tasks.max(1)).unwrap_or(1),
            status,
            current_tasks: parse_json_or_default(row.current_tasks)?,
            last_heartbeat: parse_datetime(&row.last_heartbeat)?,
            progress: row.progress,
            step: row.step.and_then(|v| u32::try_from(v).ok()),
            total_steps: row.total_steps.and_then(|v| u32::try_from(v).ok()),
            progress_updated_at: parse_optional_datetime(row.progress_updated_at)?,
        })
    }
}

#[derive(FromRow)]
struct PresenceRow {
    agent: String,
    status: String,
    workspace: Option<String>,
    note: String,
    last_seen: String,
}

impl TryFrom<PresenceRow> for Presence {
    type Error = DomainError;

    fn try_from(row: PresenceRow) -> DomainResult<Self> {
        Ok(Presence {
            agent: row.agent,
            status: row.status,
            workspace: row.workspace,
            note: row.note,
            last_seen: parse_datetime(&row.last_seen)?,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: i64,
    sender: String,
    recipient: String,
    content: String,
    timestamp: String,
    read: bool,
}

impl TryFrom<MessageRow> for Message {
    type Error = DomainError;

    fn try_from(row: MessageRow) -> DomainResult<Self> {
        Ok(Message {
            id: row.id,
            from: row.sender,
            to: row.recipient,
            content: row.content,
            timestamp: parse_datetime(&row.timestamp)?,
            read: row.read,
        })
    }
}

#[derive(FromRow)]
struct PlanRow {
    id: i64,
    title: String,
    created_by: String,
    created_at: String,
    updated_at: String,
    items: Option<String>,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> DomainResult<Self> {
        Ok(Plan {
            id: row.id,
            title: row.title,
            created_by: row.created_by,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            items: parse_json_or_default(row.items)?,
        })
    }
}

#[derive(FromRow)]
struct NoteRow {
    id: i64,
    author: String,
    content: String,
    created_at: String,
    tags: Option<String>,
}

impl TryFrom<NoteRow> for SessionNote {
    type Error = DomainError;

    fn try_from(row: NoteRow) -> DomainResult<Self> {
        Ok(SessionNote {
            id: row.id,
            author: row.author,
            content: row.content,
            created_at: parse_datetime(&row.created_at)?,
            tags: parse_json_or_default(row.tags)?,
        })
    }
}

#[derive(FromRow)]
struct FileLockRow {
    path: String,
    held_by: String,
    purpose: String,
    acquired_at: String,
}

impl TryFrom<FileLockRow> for FileLock {
    type Error = DomainError;

    fn try_from(row: FileLockRow) -> DomainResult<Self> {
        Ok(FileLock {
            path: row.path,
            held_by: row.held_by,
            purpose: row.purpose,
            acquired_at: parse_datetime(&row.acquired_at)?,
        })
    }
}

#[derive(FromRow)]
struct WorkContextRow {
    agent: String,
    summary: String,
    current_focus: String,
    open_questions: Option<String>,
    updated_at: String,
}

impl TryFrom<WorkContextRow> for WorkContext {
    type Error = DomainError;

    fn try_from(row: WorkContextRow) -> DomainResult<Self> {
        Ok(WorkContext {
            agent: row.agent,
            summary: row.summary,
            current_focus: row.current_focus,
            open_questions: parse_json_or_default(row.open_questions)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(FromRow)]
struct RegisteredAgentRow {
    name: String,
    display_name: String,
    capabilities: Option<String>,
    registered_at: String,
}

impl TryFrom<RegisteredAgentRow> for RegisteredAgent {
    type Error = DomainError;

    fn try_from(row: RegisteredAgentRow) -> DomainResult<Self> {
        Ok(RegisteredAgent {
            name: row.name,
            display_name: row.display_name,
            capabilities: parse_json_or_default(row.capabilities)?,
            registered_at: parse_datetime(&row.registered_at)?,
        })
    }
}
