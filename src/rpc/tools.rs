//! Tool dispatch: the orchestration core of the RPC surface.
//!
//! Each tool call is one mutation or one query against the coordinator.
//! Responses carry the tool payload as MCP-style text content, with the
//! per-agent piggyback banner appended when the caller has anything
//! waiting.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentInstance, AgentRole, AgentStatus, RegisteredAgent, SharedState, Task, TaskStatus,
};
use crate::services::{Coordinator, PairUpdate};

use super::{collab, RpcDeps};

/// Which argument names the calling agent for a given tool, so the
/// session registry can bind the connection to an identity.
fn caller_identity(tool: &str, args: &Value) -> Option<String> {
    let key = match tool {
        "set_presence" | "claim_next" | "heartbeat" | "report_progress" | "read_messages"
        | "get_work_context" | "update_work_context" | "get_context" | "lock_file" => "agent",
        "send_message" | "request_review" | "handoff" => "from",
        "create_task" | "create_plan" => "created_by",
        "update_task" => "updated_by",
        "add_note" => "author",
        "cancel_agent" => "cancelled_by",
        _ => return None,
    };
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

/// Entry point for `tools/call`.
pub async fn handle_tools_call(
    deps: &Arc<RpcDeps>,
    session_id: Uuid,
    push_tx: &mpsc::Sender<PairUpdate>,
    params: Value,
) -> DomainResult<Value> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| DomainError::ValidationFailed("tools/call requires a name".into()))?
        .to_string();
    let args = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let caller = caller_identity(&name, &args);
    if let Some(agent) = &caller {
        deps.registry.register(session_id, agent, push_tx.clone());
    }

    let payload = dispatch(deps, &name, &args).await?;

    let mut text = serde_json::to_string_pretty(&payload)?;
    if let Some(agent) = &caller {
        if let Some(banner) = piggyback(deps, agent).await? {
            text.push_str("\n\n");
            text.push_str(&banner);
        }
    }

    Ok(json!({
        "content": [{ "type": "text", "text": text }]
    }))
}

/// Compute the caller's banner and acknowledge any STOP it carries: once
/// the banner is served, the cancelled tasks count as informed and leave
/// the instance's current set.
async fn piggyback(deps: &Arc<RpcDeps>, agent: &str) -> DomainResult<Option<String>> {
    let counts = deps.coordinator.counts_for(agent).await?;
    let banner = Coordinator::banner(counts);

    if counts.stop_required() {
        let agent = agent.to_string();
        deps.coordinator
            .run(move |state| {
                let held: Vec<i64> = state
                    .agents
                    .get(&agent)
                    .map(|a| a.current_tasks.clone())
                    .unwrap_or_default();
                for task_id in held {
                    let cancelled = state
                        .task(task_id)
                        .is_some_and(|t| t.status == TaskStatus::Cancelled);
                    if cancelled {
                        if let Some(task) = state.task_mut(task_id) {
                            task.cancel_seen = true;
                        }
                        state.release_task(task_id);
                    }
                }
                Ok(())
            })
            .await?;
    }

    Ok(banner)
}

async fn dispatch(deps: &Arc<RpcDeps>, name: &str, args: &Value) -> DomainResult<Value> {
    match name {
        "set_presence" => set_presence(deps, args).await,
        "create_task" => create_task(deps, args).await,
        "update_task" => update_task(deps, args).await,
        "claim_next" => claim_next(deps, args).await,
        "heartbeat" => heartbeat(deps, args).await,
        "report_progress" => report_progress(deps, args).await,
        "cancel_agent" => cancel_agent(deps, args).await,
        "register_agent" => register_agent(deps, args).await,
        "worker_status" => worker_status(deps, args).await,
        "restart_workers" => restart_workers(deps).await,
        "send_message" => collab::send_message(deps, args).await,
        "read_messages" => collab::read_messages(deps, args).await,
        "create_plan" => collab::create_plan(deps, args).await,
        "get_plan" => collab::get_plan(deps, args).await,
        "update_plan" => collab::update_plan(deps, args).await,
        "lock_file" => collab::lock_file(deps, args).await,
        "add_note" => collab::add_note(deps, args).await,
        "get_work_context" => collab::get_work_context(deps, args).await,
        "update_work_context" => collab::update_work_context(deps, args).await,
        "request_review" => collab::request_review(deps, args).await,
        "handoff" => collab::handoff(deps, args).await,
        "list_agents" => collab::list_agents(deps).await,
        "list_tasks" => collab::list_tasks(deps, args).await,
        "get_context" => collab::get_context(deps, args).await,
        other => Err(DomainError::ValidationFailed(format!(
            "Unknown tool: {other}"
        ))),
    }
}

// ---------------------------------------------------------------------
// Argument extraction helpers
// ---------------------------------------------------------------------

pub(crate) fn req_str(args: &Value, key: &str) -> DomainResult<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DomainError::ValidationFailed(format!("missing required field: {key}")))
}

pub(crate) fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

pub(crate) fn opt_i64(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

pub(crate) fn req_i64(args: &Value, key: &str) -> DomainResult<i64> {
    opt_i64(args, key)
        .ok_or_else(|| DomainError::ValidationFailed(format!("missing required field: {key}")))
}

pub(crate) fn opt_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

pub(crate) fn opt_str_vec(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn opt_i64_vec(args: &Value, key: &str) -> Vec<i64> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// The worker type an instance id belongs to: `claude-code-1` → `claude-code`.
pub(crate) fn agent_type_of(instance_id: &str) -> String {
    match instance_id.rfind('-') {
        Some(pos) if instance_id[pos + 1..].chars().all(|c| c.is_ascii_digit()) => {
            instance_id[..pos].to_string()
        }
        _ => instance_id.to_string(),
    }
}

pub(crate) fn task_json(task: &Task) -> Value {
    serde_json::to_value(task).unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------
// Core orchestration tools
// ---------------------------------------------------------------------

async fn set_presence(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;
    let status = req_str(args, "status")?;
    let workspace = opt_str(args, "workspace");
    let note = opt_str(args, "note");

    let out = deps
        .coordinator
        .run(move |state| {
            let entry = state
                .presence
                .entry(agent.clone())
                .or_insert_with(|| crate::domain::models::Presence::new(agent.clone(), ""));
            entry.status = status;
            entry.last_seen = Utc::now();
            if let Some(workspace) = workspace {
                entry.workspace = Some(workspace);
                // An agent that is not a managed worker instance and names
                // a workspace is the driver for this pair.
                let is_worker = state
                    .agents
                    .get(&agent)
                    .is_some_and(|a| a.role == AgentRole::Worker);
                if !is_worker {
                    state.active_driver = Some(agent.clone());
                }
            }
            if let Some(note) = note {
                entry.note = note;
            }
            Ok(json!({ "ok": true, "agent": agent }))
        })
        .await?;

    Ok(out)
}

async fn create_task(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let title = req_str(args, "title")?;
    let created_by = req_str(args, "created_by")?;
    let assigned_to = opt_str(args, "assigned_to").unwrap_or_default();
    let description = opt_str(args, "description").unwrap_or_default();
    let priority = opt_i64(args, "priority").unwrap_or(3);
    if !(1..=5).contains(&priority) {
        return Err(DomainError::ValidationFailed(format!(
            "priority {priority} outside 1..=5"
        )));
    }
    let expected_duration_sec = opt_i64(args, "expected_duration_sec");
    let dependencies = opt_i64_vec(args, "dependencies");
    let worker_type = opt_str(args, "worker_type");
    let capabilities = opt_str_vec(args, "capabilities");
    let relevant_files = opt_str_vec(args, "relevant_files");
    let background = opt_str(args, "background").unwrap_or_default();
    let constraints = opt_str_vec(args, "constraints");

    let task = deps
        .coordinator
        .run(move |state| {
            for dep in &dependencies {
                if state.task(*dep).is_none() {
                    return Err(DomainError::TaskNotFound(*dep));
                }
            }
            let id = state.alloc_task_id();
            let mut task = Task::new(id, title, created_by).with_assignee(assigned_to);
            task.description = description;
            task.priority = priority as u8;
            task.expected_duration_sec = expected_duration_sec;
            task.dependencies = dependencies;
            task.worker_type = worker_type;
            task.capabilities = capabilities;
            task.relevant_files = relevant_files;
            task.background = background;
            task.constraints = constraints;
            task.validate().map_err(DomainError::ValidationFailed)?;
            state.tasks.push(task.clone());
            Ok(task)
        })
        .await?;

    deps.scheduler.kick();
    Ok(task_json(&task))
}

async fn update_task(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let id = req_i64(args, "id")?;
    let updated_by = req_str(args, "updated_by")?;
    let status = opt_str(args, "status");
    let assigned_to = opt_str(args, "assigned_to");
    let blocked_by = opt_str(args, "blocked_by");
    let result_summary = opt_str(args, "result_summary");

    let task = deps
        .coordinator
        .run(move |state| {
            let new_status = match status.as_deref() {
                Some(s) => Some(TaskStatus::from_str(s).ok_or_else(|| {
                    DomainError::ValidationFailed(format!("unknown status: {s}"))
                })?),
                None => None,
            };

            let creator;
            let title;
            {
                let task = state
                    .task_mut(id)
                    .ok_or(DomainError::TaskNotFound(id))?;
                creator = task.created_by.clone();
                title = task.title.clone();

                if let Some(new_status) = new_status {
                    let was_in_progress = task.status == TaskStatus::InProgress;
                    task.transition_to(new_status).map_err(|_| {
                        DomainError::InvalidStateTransition {
                            from: task.status.as_str().to_string(),
                            to: new_status.as_str().to_string(),
                        }
                    })?;
                    if was_in_progress && new_status != TaskStatus::InProgress {
                        task.sla_over = false;
                    }
                }
                if let Some(assigned_to) = assigned_to {
                    task.assigned_to = assigned_to;
                }
                if let Some(reason) = blocked_by {
                    task.blocked_by = Some(reason);
                }
                if let Some(summary) = result_summary {
                    task.result_summary = summary;
                }
                task.updated_at = Utc::now();
            }

            // Terminal tasks leave whoever held them.
            let status_now = state.task(id).map(|t| t.status);
            if status_now.is_some_and(|s| s.is_terminal()) {
                state.release_task(id);
            }
            if status_now == Some(TaskStatus::Completed) && creator != updated_by {
                state.push_system_message(
                    creator,
                    format!("Task #{id} '{title}' was completed by {updated_by}."),
                );
            }

            state
                .task(id)
                .cloned()
                .ok_or(DomainError::TaskNotFound(id))
        })
        .await?;

    deps.scheduler.kick();
    Ok(task_json(&task))
}

async fn claim_next(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;
    let dry_run = opt_bool(args, "dry_run").unwrap_or(false);
    let agent_type = agent_type_of(&agent);

    let claimed = deps
        .coordinator
        .run(move |state| {
            let my_capabilities = state
                .agents
                .get(&agent)
                .map(|a| a.capabilities.clone())
                .unwrap_or_default();

            // Eligible: pending, dependencies met, not held by anyone,
            // addressed to this instance, its type, or anyone, and within
            // this instance's declared capabilities. Direct assignments
            // are exempt from the capability check.
            let mut candidates: Vec<(u8, i64, u8)> = state
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .filter(|t| state.dependencies_met(t))
                .filter(|t| state.holder_of(t.id).is_none())
                .filter_map(|t| {
                    let rank = if t.assigned_to == agent {
                        0
                    } else if t.assigned_to == agent_type {
                        1
                    } else if t.assigned_to == crate::domain::models::task::ASSIGNEE_ANY {
                        2
                    } else {
                        return None;
                    };
                    if rank > 0
                        && !t.capabilities.iter().all(|c| my_capabilities.contains(c))
                    {
                        return None;
                    }
                    Some((rank, t.id, t.priority))
                })
                .collect();
            candidates.sort_by_key(|(rank, id, priority)| (*rank, *priority, *id));

            let Some((_, task_id, _)) = candidates.first().copied() else {
                return Ok(None);
            };

            if dry_run {
                return Ok(state.task(task_id).cloned());
            }

            let instance = state
                .agents
                .entry(agent.clone())
                .or_insert_with(|| {
                    AgentInstance::new(agent.clone(), agent_type.clone(), AgentRole::Worker)
                });
            if !instance.has_capacity() {
                return Err(DomainError::Conflict(format!(
                    "{agent} is at capacity ({})",
                    instance.max_tasks
                )));
            }
            instance.current_tasks.push(task_id);
            instance.heartbeat(None, None, None);
            instance.status = AgentStatus::Busy;

            let task = state
                .task_mut(task_id)
                .ok_or(DomainError::TaskNotFound(task_id))?;
            task.transition_to(TaskStatus::InProgress)
                .map_err(DomainError::Conflict)?;
            task.assigned_to = agent.clone();
            Ok(Some(task.clone()))
        })
        .await?;

    match claimed {
        Some(task) => Ok(json!({ "claimed": !dry_run, "task": task_json(&task) })),
        None => Ok(json!({ "claimed": false, "task": Value::Null })),
    }
}

async fn heartbeat(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;
    let progress = opt_str(args, "progress");
    let step = opt_i64(args, "step").and_then(|v| u32::try_from(v).ok());
    let total_steps = opt_i64(args, "total_steps").and_then(|v| u32::try_from(v).ok());
    let agent_type = agent_type_of(&agent);

    deps.coordinator
        .run(move |state| {
            let instance = state
                .agents
                .entry(agent.clone())
                .or_insert_with(|| {
                    AgentInstance::new(agent.clone(), agent_type, AgentRole::Worker)
                });
            instance.heartbeat(progress, step, total_steps);
            Ok(json!({
                "ok": true,
                "agent": agent,
                "status": instance.status.as_str(),
            }))
        })
        .await
}

async fn report_progress(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;
    let task_id = req_i64(args, "task_id")?;
    let description = req_str(args, "description")?;
    let percent = opt_i64(args, "percent_complete");
    if let Some(p) = percent {
        if !(0..=100).contains(&p) {
            return Err(DomainError::ValidationFailed(format!(
                "percent_complete {p} outside 0..=100"
            )));
        }
    }
    let eta_seconds = opt_i64(args, "eta_seconds");
    let agent_type = agent_type_of(&agent);

    deps.coordinator
        .run(move |state| {
            {
                let task = state
                    .task_mut(task_id)
                    .ok_or(DomainError::TaskNotFound(task_id))?;
                if task.status.is_terminal() {
                    return Err(DomainError::Conflict(format!(
                        "task {task_id} is {}",
                        task.status.as_str()
                    )));
                }
                let now = Utc::now();
                task.progress_description = description;
                if let Some(p) = percent {
                    task.progress_percent = p as u8;
                }
                task.eta_seconds = eta_seconds;
                task.last_progress_at = Some(now);
                task.updated_at = now;
            }

            // Progress implies liveness.
            let instance = state
                .agents
                .entry(agent.clone())
                .or_insert_with(|| {
                    AgentInstance::new(agent.clone(), agent_type, AgentRole::Worker)
                });
            instance.heartbeat(None, None, None);

            state
                .task(task_id)
                .cloned()
                .map(|t| task_json(&t))
                .ok_or(DomainError::TaskNotFound(task_id))
        })
        .await
}

async fn cancel_agent(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let agent = req_str(args, "agent")?;
    let cancelled_by = req_str(args, "cancelled_by")?;
    let reason = req_str(args, "reason")?;

    let agent_for_state = agent.clone();
    let cancelled = deps
        .coordinator
        .run(move |state| {
            let held: Vec<i64> = state
                .agents
                .get(&agent_for_state)
                .map(|a| a.current_tasks.clone())
                .unwrap_or_default();
            if state.agents.get(&agent_for_state).is_none() {
                return Err(DomainError::AgentNotFound(agent_for_state.clone()));
            }

            let mut cancelled = Vec::new();
            for task_id in held {
                if let Some(task) = state.task_mut(task_id) {
                    if !task.status.is_terminal() {
                        task.status = TaskStatus::Cancelled;
                        task.result_summary =
                            format!("Cancelled by {cancelled_by}: {reason}");
                        task.cancel_seen = false;
                        task.updated_at = Utc::now();
                        cancelled.push(task_id);
                    }
                }
            }

            if let Some(instance) = state.agents.get_mut(&agent_for_state) {
                instance.status = AgentStatus::Cancelled;
            }

            state.push_system_message(
                agent_for_state.clone(),
                format!("STOP: {cancelled_by} cancelled your work: {reason}"),
            );
            Ok(cancelled)
        })
        .await?;

    let process_killed = deps.manager.cancel_instance(&agent).await;
    deps.scheduler.kick();

    Ok(json!({
        "agent": agent,
        "cancelled_tasks": cancelled,
        "process_killed": process_killed,
    }))
}

async fn register_agent(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let name = req_str(args, "name")?;
    let display_name = opt_str(args, "display_name").unwrap_or_default();
    let capabilities = opt_str_vec(args, "capabilities");

    deps.coordinator
        .run(move |state| {
            let mut reg = RegisteredAgent::new(name.clone());
            reg.display_name = display_name;
            reg.capabilities = capabilities;
            state.registered_agents.insert(name.clone(), reg.clone());
            Ok(serde_json::to_value(reg)?)
        })
        .await
}

async fn worker_status(deps: &Arc<RpcDeps>, args: &Value) -> DomainResult<Value> {
    let filter = opt_str(args, "agent");
    let processes = deps.manager.process_info().await;

    deps.coordinator
        .query(move |state: &SharedState| {
            let now = Utc::now();
            let workers: Vec<Value> = state
                .agents
                .values()
                .filter(|a| a.role == AgentRole::Worker)
                .filter(|a| filter.as_deref().is_none_or(|f| a.instance_id == f))
                .map(|a| {
                    let tasks: Vec<Value> = a
                        .current_tasks
                        .iter()
                        .filter_map(|id| state.task(*id))
                        .map(|t| {
                            json!({
                                "id": t.id,
                                "title": t.title,
                                "status": t.status.as_str(),
                                "progress_percent": t.progress_percent,
                                "progress": t.progress_description,
                                "sla_status": if t.sla_over { "over" } else { "ok" },
                            })
                        })
                        .collect();
                    json!({
                        "instance_id": a.instance_id,
                        "agent_type": a.agent_type,
                        "status": a.status.as_str(),
                        "heartbeat_age_sec": (now - a.last_heartbeat).num_seconds(),
                        "progress": a.progress,
                        "step": a.step,
                        "total_steps": a.total_steps,
                        "current_tasks": tasks,
                        "process": processes.get(&a.instance_id),
                    })
                })
                .collect();
            json!({ "workers": workers })
        })
        .await
}

async fn restart_workers(deps: &Arc<RpcDeps>) -> DomainResult<Value> {
    deps.manager.restart_workers().await;
    deps.scheduler.kick();
    Ok(json!({ "ok": true }))
}

/// Tool catalog for `tools/list`.
pub fn tool_listing() -> Value {
    json!({
        "tools": [
            {
                "name": "set_presence",
                "description": "Update your presence. A non-worker agent that names a workspace becomes the driver, and its workspace becomes the project root used for spawned workers.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "agent": { "type": "string" },
                        "status": { "type": "string" },
                        "workspace": { "type": "string" },
                        "note": { "type": "string" }
                    },
                    "required": ["agent", "status"]
                }
            },
            {
                "name": "create_task",
                "description": "Create a task. Use assigned_to='any' to let the scheduler route it to a worker type.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "assigned_to": { "type": "string" },
                        "created_by": { "type": "string" },
                        "priority": { "type": "integer", "minimum": 1, "maximum": 5 },
                        "expected_duration_sec": { "type": "integer" },
                        "dependencies": { "type": "array", "items": { "type": "integer" } },
                        "worker_type": { "type": "string" },
                        "capabilities": { "type": "array", "items": { "type": "string" } },
                        "relevant_files": { "type": "array", "items": { "type": "string" } },
                        "background": { "type": "string" },
                        "constraints": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["title", "created_by"]
                }
            },
            {
                "name": "update_task",
                "description": "Update a task's status, assignee, blocked reason, or result summary. Completing a task notifies its creator.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer" },
                        "status": { "type": "string", "enum": ["pending", "in_progress", "completed", "blocked", "cancelled"] },
                        "assigned_to": { "type": "string" },
                        "blocked_by": { "type": "string" },
                        "result_summary": { "type": "string" },
                        "updated_by": { "type": "string" }
                    },
                    "required": ["id", "updated_by"]
                }
            },
            {
                "name": "claim_next",
                "description": "Atomically claim the next eligible pending task for this agent. dry_run returns the candidate without claiming.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "agent": { "type": "string" },
                        "dry_run": { "type": "boolean" }
                    },
                    "required": ["agent"]
                }
            },
            {
                "name": "heartbeat",
                "description": "Report liveness, optionally with a progress line and step counters.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "agent": { "type": "string" },
                        "progress": { "type": "string" },
                        "step": { "type": "integer" },
                        "total_steps": { "type": "integer" }
                    },
                    "required": ["agent"]
                }
            },
            {
                "name": "report_progress",
                "description": "Update a task's progress fields. Implies a heartbeat.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "agent": { "type": "string" },
                        "task_id": { "type": "integer" },
                        "description": { "type": "string" },
                        "percent_complete": { "type": "integer", "minimum": 0, "maximum": 100 },
                        "eta_seconds": { "type": "integer" }
                    },
                    "required": ["agent", "task_id", "description"]
                }
            },
            {
                "name": "cancel_agent",
                "description": "Driver tool: cancel an agent's tasks, send it a STOP, and kill its process.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "agent": { "type": "string" },
                        "cancelled_by": { "type": "string" },
                        "reason": { "type": "string" }
                    },
                    "required": ["agent", "cancelled_by", "reason"]
                }
            },
            {
                "name": "register_agent",
                "description": "Register a custom agent type with optional capabilities.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "display_name": { "type": "string" },
                        "capabilities": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["name"]
                }
            },
            {
                "name": "worker_status",
                "description": "Liveness, progress, SLA state, and process counters for worker instances.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "agent": { "type": "string" } }
                }
            },
            {
                "name": "restart_workers",
                "description": "Kill all managed worker processes and reset retry budgets; the scheduler respawns as needed.",
                "inputSchema": { "type": "object", "properties": {} }
            },
            {
                "name": "send_message",
                "description": "Send a message to an agent or 'all'.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "from": { "type": "string" },
                        "to": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["from", "to", "content"]
                }
            },
            {
                "name": "read_messages",
                "description": "Read messages addressed to this agent. Unread messages are marked read.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "agent": { "type": "string" },
                        "include_read": { "type": "boolean" },
                        "limit": { "type": "integer" }
                    },
                    "required": ["agent"]
                }
            },
            {
                "name": "create_plan",
                "description": "Create a shared plan with optional initial items.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "created_by": { "type": "string" },
                        "items": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["title", "created_by"]
                }
            },
            {
                "name": "get_plan",
                "description": "Fetch a plan by id, or the most recent plan when no id is given.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "id": { "type": "integer" } }
                }
            },
            {
                "name": "update_plan",
                "description": "Replace a plan's items or update one item's status/assignee.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer" },
                        "updated_by": { "type": "string" },
                        "items": { "type": "array", "items": { "type": "string" } },
                        "item_index": { "type": "integer" },
                        "item_status": { "type": "string", "enum": ["todo", "doing", "done", "skipped"] },
                        "item_assignee": { "type": "string" }
                    },
                    "required": ["id", "updated_by"]
                }
            },
            {
                "name": "lock_file",
                "description": "Take or release an advisory lock on a workspace file. Stale locks are broken automatically.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "agent": { "type": "string" },
                        "path": { "type": "string" },
                        "purpose": { "type": "string" },
                        "release": { "type": "boolean" }
                    },
                    "required": ["agent", "path"]
                }
            },
            {
                "name": "add_note",
                "description": "Add a session note.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "author": { "type": "string" },
                        "content": { "type": "string" },
                        "tags": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["author", "content"]
                }
            },
            {
                "name": "get_work_context",
                "description": "Read an agent's shared work context.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "agent": { "type": "string" } },
                    "required": ["agent"]
                }
            },
            {
                "name": "update_work_context",
                "description": "Update your shared work context.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "agent": { "type": "string" },
                        "summary": { "type": "string" },
                        "current_focus": { "type": "string" },
                        "open_questions": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["agent"]
                }
            },
            {
                "name": "request_review",
                "description": "Ask the driver to review a task's work.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "from": { "type": "string" },
                        "task_id": { "type": "integer" },
                        "notes": { "type": "string" }
                    },
                    "required": ["from"]
                }
            },
            {
                "name": "handoff",
                "description": "Hand work to another agent with a summary message and a work-context update.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "from": { "type": "string" },
                        "to": { "type": "string" },
                        "summary": { "type": "string" },
                        "task_id": { "type": "integer" }
                    },
                    "required": ["from", "to", "summary"]
                }
            },
            {
                "name": "list_agents",
                "description": "All known agent instances, presence records, and registered types.",
                "inputSchema": { "type": "object", "properties": {} }
            },
            {
                "name": "list_tasks",
                "description": "List tasks, optionally filtered by status or assignee.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "status": { "type": "string" },
                        "assigned_to": { "type": "string" },
                        "limit": { "type": "integer" }
                    }
                }
            },
            {
                "name": "get_context",
                "description": "One-call overview: presence, latest plan, recent notes, and your counts.",
                "inputSchema": {
                    "type": "object",
                    "properties": { "agent": { "type": "string" } },
                    "required": ["agent"]
                }
            }
        ]
    })
}
