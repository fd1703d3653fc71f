use crate::auth::{self, Actor};
use crate::engine::{Ctx, RecordOutcome};
use crate::error::WorkflowError;
use crate::grading::Phase;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn db(code: &'static str, e: rusqlite::Error) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: None,
        }
    }

    fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<WorkflowError> for HandlerErr {
    fn from(e: WorkflowError) -> Self {
        Self {
            code: e.code(),
            details: e.details(),
            message: e.to_string(),
        }
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

fn finish(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            if e.code.starts_with("db_") {
                warn!(method = %req.method, code = e.code, "request failed: {}", e.message);
            } else {
                debug!(method = %req.method, code = e.code, "request rejected: {}", e.message);
            }
            e.response(&req.id)
        }
    }
}

/// Handlers fed by the directory sync; they act on behalf of the host.
pub fn run_with_conn(
    state: &mut AppState,
    req: &Request,
    handler: fn(&Connection, &Request) -> HandlerResult,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    finish(req, handler(conn, req))
}

/// Resolves `params.actorId` once and samples the request clock once.
pub fn run_with_actor(
    state: &mut AppState,
    req: &Request,
    handler: fn(&Ctx<'_>, &Request) -> HandlerResult,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match resolve_actor(conn, &req.params) {
        Ok(a) => a,
        Err(e) => return finish(req, Err(e)),
    };
    let ctx = Ctx {
        conn,
        actor: &actor,
        now: Utc::now(),
    };
    finish(req, handler(&ctx, req))
}

fn resolve_actor(conn: &Connection, params: &Value) -> Result<Actor, HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    Ok(auth::resolve_actor(conn, &actor_id)?)
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing/invalid {}", key)))
}

pub fn get_bool_or(params: &Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn get_required_ts(params: &Value, key: &str) -> Result<DateTime<Utc>, HandlerErr> {
    let raw = get_required_str(params, key)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| HandlerErr::bad_params(format!("{} must be an RFC 3339 timestamp", key)))
}

pub fn get_phase(params: &Value) -> Result<Phase, HandlerErr> {
    let raw = get_required_str(params, "phase")?;
    Phase::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params("phase must be one of: minor1, minor2, mid, end")
    })
}

/// `studentIds` is optional; when present it must be a non-empty string array.
pub fn get_student_ids(params: &Value) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(raw) = params.get("studentIds") else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(arr) = raw.as_array() else {
        return Err(HandlerErr::bad_params("studentIds must be an array"));
    };
    if arr.is_empty() {
        return Err(HandlerErr::bad_params("studentIds must not be empty"));
    }
    arr.iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("studentIds[{}] must be a string", i))
                })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Per-status counts alongside the full outcome list.
pub fn outcomes_result(outcomes: &[RecordOutcome]) -> Value {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for o in outcomes {
        *counts.entry(o.status).or_insert(0) += 1;
    }
    json!({
        "counts": counts,
        "outcomes": outcomes,
    })
}
