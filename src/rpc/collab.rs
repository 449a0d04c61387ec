//! External collaborator tools: pure CRUD over the shared state.
//!
//! These operations participate in the orchestration core only through
//! the per-agent piggyback counts they affect.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FileLock, Message, Plan, PlanItem, PlanItemStatus, SessionNote, SharedState, WorkContext,
};

use super::tools::{
    opt_bool, opt_i64, opt_str, opt_str_vec, req_i64, req_str, task_json,
};
use super::RpcDeps;

pub async fn send_message(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let from = req_str(args, "from")?;
    let to = req_str(args, "to")?;
    let content = req_str(args, "content")?;

    deps.coordinator
        .run(move |state| {
            let id = state.alloc_message_id();
            state.messages.push(Message::new(id, from, to, content));
            Ok(json!({ "id": id }))
        })
        .await
}

pub async fn read_messages(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;
    let include_read = opt_bool(args, "include_read").unwrap_or(false);
    let limit = opt_i64(args, "limit").unwrap_or(50).max(1) as usize;

    deps.coordinator
        .run(move |state| {
            let mut out = Vec::new();
            for m in state.messages.iter_mut().rev() {
                if out.len() >= limit {
                    break;
                }
                if !m.addressed_to(&agent) || m.from == agent {
                    continue;
                }
                if m.read && !include_read {
                    continue;
                }
                // Reading marks read; the flag never reverts.
                m.read = true;
                out.push(m.clone());
            }
            out.reverse();
            Ok(json!({ "messages": out }))
        })
        .await
}

pub async fn create_plan(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let title = req_str(args, "title")?;
    let created_by = req_str(args, "created_by")?;
    let items = opt_str_vec(args, "items");

    deps.coordinator
        .run(move |state| {
            let id = state.alloc_note_id();
            let mut plan = Plan::new(id, title, created_by);
            plan.items = items
                .into_iter()
                .map(|text| PlanItem {
                    text,
                    status: PlanItemStatus::Todo,
                    assignee: String::new(),
                })
                .collect();
            state.plans.push(plan.clone());
            Ok(serde_json::to_value(plan)?)
        })
        .await
}

pub async fn get_plan(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let id = opt_i64(args, "id");

    deps.coordinator
        .query(move |state: &SharedState| match id {
            Some(id) => state
                .plans
                .iter()
                .find(|p| p.id == id)
                .map(|p| serde_json::to_value(p).unwrap_or(Value::Null))
                .ok_or(DomainError::PlanNotFound(id)),
            None => Ok(state
                .plans
                .last()
                .map(|p| serde_json::to_value(p).unwrap_or(Value::Null))
                .unwrap_or(Value::Null)),
        })
        .await?
}

pub async fn update_plan(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let id = req_i64(args, "id")?;
    let _updated_by = req_str(args, "updated_by")?;
    let items = args.get("items").and_then(Value::as_array).map(|a| {
        a.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect::<Vec<_>>()
    });
    let item_index = opt_i64(args, "item_index");
    let item_status = opt_str(args, "item_status");
    let item_assignee = opt_str(args, "item_assignee");

    deps.coordinator
        .run(move |state| {
            let plan = state
                .plans
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or(DomainError::PlanNotFound(id))?;

            if let Some(items) = items {
                plan.items = items
                    .into_iter()
                    .map(|text| PlanItem {
                        text,
                        status: PlanItemStatus::Todo,
                        assignee: String::new(),
                    })
                    .collect();
            }
            if let Some(index) = item_index {
                let item = plan
                    .items
                    .get_mut(index as usize)
                    .ok_or_else(|| {
                        DomainError::ValidationFailed(format!("no plan item at index {index}"))
                    })?;
                if let Some(status) = &item_status {
                    item.status = PlanItemStatus::parse_str(status).ok_or_else(|| {
                        DomainError::ValidationFailed(format!("unknown item status: {status}"))
                    })?;
                }
                if let Some(assignee) = &item_assignee {
                    item.assignee = assignee.clone();
                }
            }
            plan.updated_at = Utc::now();
            Ok(serde_json::to_value(&*plan)?)
        })
        .await
}

pub async fn lock_file(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;
    let path = req_str(args, "path")?;
    let purpose = opt_str(args, "purpose").unwrap_or_default();
    let release = opt_bool(args, "release").unwrap_or(false);

    deps.coordinator.validate_path(&path)?;

    deps.coordinator
        .run(move |state| {
            let now = Utc::now();
            if release {
                let held = state
                    .file_locks
                    .iter()
                    .any(|l| l.path == path && l.held_by == agent);
                if !held {
                    return Err(DomainError::Conflict(format!(
                        "{agent} does not hold a lock on {path}"
                    )));
                }
                state.file_locks.retain(|l| l.path != path);
                return Ok(json!({ "locked": false, "path": path }));
            }

            if let Some(existing) = state.file_locks.iter().find(|l| l.path == path) {
                if existing.held_by != agent && !existing.is_stale(now) {
                    return Err(DomainError::Conflict(format!(
                        "{path} is locked by {}",
                        existing.held_by
                    )));
                }
                state.file_locks.retain(|l| l.path != path);
            }

            state.file_locks.push(FileLock {
                path: path.clone(),
                held_by: agent.clone(),
                purpose,
                acquired_at: now,
            });
            Ok(json!({ "locked": true, "path": path, "held_by": agent }))
        })
        .await
}

pub async fn add_note(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let author = req_str(args, "author")?;
    let content = req_str(args, "content")?;
    let tags = opt_str_vec(args, "tags");

    deps.coordinator
        .run(move |state| {
            let id = state.alloc_note_id();
            let note = SessionNote {
                id,
                author,
                content,
                created_at: Utc::now(),
                tags,
            };
            state.notes.push(note.clone());
            Ok(serde_json::to_value(note)?)
        })
        .await
}

pub async fn get_work_context(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;

    deps.coordinator
        .query(move |state: &SharedState| {
            state
                .work_contexts
                .get(&agent)
                .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
                .unwrap_or(Value::Null)
        })
        .await
}

pub async fn update_work_context(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;
    let summary = opt_str(args, "summary");
    let current_focus = opt_str(args, "current_focus");
    let open_questions = args.get("open_questions").and_then(Value::as_array).map(|a| {
        a.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    deps.coordinator
        .run(move |state| {
            let ctx = state
                .work_contexts
                .entry(agent.clone())
                .or_insert_with(|| WorkContext::new(agent.clone()));
            if let Some(summary) = summary {
                ctx.summary = summary;
            }
            if let Some(focus) = current_focus {
                ctx.current_focus = focus;
            }
            if let Some(questions) = open_questions {
                ctx.open_questions = questions;
            }
            ctx.updated_at = Utc::now();
            Ok(serde_json::to_value(&*ctx)?)
        })
        .await
}

pub async fn request_review(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let from = req_str(args, "from")?;
    let task_id = opt_i64(args, "task_id");
    let notes = opt_str(args, "notes").unwrap_or_default();

    deps.coordinator
        .run(move |state| {
            if let Some(id) = task_id {
                if state.task(id).is_none() {
                    return Err(DomainError::TaskNotFound(id));
                }
            }
            let recipient = state
                .active_driver
                .clone()
                .unwrap_or_else(|| crate::domain::models::message::RECIPIENT_ALL.to_string());
            let body = match task_id {
                Some(id) => format!("{from} requests review of task #{id}. {notes}"),
                None => format!("{from} requests review. {notes}"),
            };
            let id = state.alloc_message_id();
            state.messages.push(Message::new(id, from, recipient, body.trim().to_string()));
            Ok(json!({ "message_id": id }))
        })
        .await
}

pub async fn handoff(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let from = req_str(args, "from")?;
    let to = req_str(args, "to")?;
    let summary = req_str(args, "summary")?;
    let task_id = opt_i64(args, "task_id");

    deps.coordinator
        .run(move |state| {
            if let Some(id) = task_id {
                let task = state.task_mut(id).ok_or(DomainError::TaskNotFound(id))?;
                if task.status.is_terminal() {
                    return Err(DomainError::Conflict(format!(
                        "task {id} is {}",
                        task.status.as_str()
                    )));
                }
                task.assigned_to = to.clone();
                task.updated_at = Utc::now();
                state.release_task(id);
            }

            let message_id = state.alloc_message_id();
            state.messages.push(Message::new(
                message_id,
                from.clone(),
                to,
                format!("Handoff from {from}: {summary}"),
            ));

            let ctx = state
                .work_contexts
                .entry(from.clone())
                .or_insert_with(|| WorkContext::new(from.clone()));
            ctx.summary = summary;
            ctx.updated_at = Utc::now();

            Ok(json!({ "message_id": message_id }))
        })
        .await
}

pub async fn list_agents(deps: &Arc<RpcDeps>) -> DomainResult<Value> {
    let connected = deps.registry.connected_agents();
    deps.coordinator
        .query(move |state: &SharedState| {
            let agents: Vec<Value> = state
                .agents
                .values()
                .map(|a| {
                    json!({
                        "instance_id": a.instance_id,
                        "agent_type": a.agent_type,
                        "role": a.role.as_str(),
                        "status": a.status.as_str(),
                        "current_tasks": a.current_tasks,
                        "connected": connected.contains(&a.instance_id),
                    })
                })
                .collect();
            json!({
                "agents": agents,
                "presence": state.presence.values().collect::<Vec<_>>(),
                "registered": state.registered_agents.values().collect::<Vec<_>>(),
                "active_driver": state.active_driver,
            })
        })
        .await
}

pub async fn list_tasks(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let status = opt_str(args, "status");
    let assigned_to = opt_str(args, "assigned_to");
    let limit = opt_i64(args, "limit").unwrap_or(100).max(1) as usize;

    let status = match status.as_deref() {
        Some(s) => Some(
            crate::domain::models::TaskStatus::from_str(s)
                .ok_or_else(|| DomainError::ValidationFailed(format!("unknown status: {s}")))?,
        ),
        None => None,
    };

    deps.coordinator
        .query(move |state: &SharedState| {
            let tasks: Vec<Value> = state
                .tasks
                .iter()
                .filter(|t| status.is_none_or(|s| t.status == s))
                .filter(|t| assigned_to.as_deref().is_none_or(|a| t.assigned_to == a))
                .rev()
                .take(limit)
                .map(task_json)
                .collect();
            json!({ "tasks": tasks })
        })
        .await
}

pub async fn get_context(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;

    deps.coordinator
        .query(move |state: &SharedState| {
            let counts = state.agent_counts(&agent);
            let my_tasks: Vec<Value> = state
                .tasks
                .iter()
                .filter(|t| t.assigned_to == agent && !t.status.is_terminal())
                .map(task_json)
                .collect();
            let recent_notes: Vec<&SessionNote> = state.notes.iter().rev().take(10).collect();
            json!({
                "agent": agent,
                "counts": counts,
                "my_tasks": my_tasks,
                "latest_plan": state.plans.last(),
                "recent_notes": recent_notes,
                "presence": state.presence.values().collect::<Vec<_>>(),
                "active_driver": state.active_driver,
            })
        })
        .await
}
