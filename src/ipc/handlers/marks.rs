use crate::engine::{self, Ctx, MarkEntry};
use crate::ipc::helpers::{
    get_phase, get_required_str, outcomes_result, run_with_actor, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

const MAX_ENTRIES_PER_REQUEST: usize = 5000;

fn parse_entries(params: &Value) -> Result<Vec<MarkEntry<'_>>, HandlerErr> {
    let Some(arr) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };
    if arr.len() > MAX_ENTRIES_PER_REQUEST {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("too many entries (max {})", MAX_ENTRIES_PER_REQUEST),
            details: Some(json!({ "count": arr.len() })),
        });
    }

    let mut entries = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let student_id = item
            .get("studentId")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| HandlerErr::bad_params(format!("entries[{}].studentId missing", i)))?;
        let value = item
            .get("value")
            .and_then(|v| v.as_f64())
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("entries[{}].value must be a number", i))
            })?;
        entries.push(MarkEntry {
            student_id: student_id.trim(),
            value,
        });
    }
    Ok(entries)
}

fn marks_get(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let sheet = engine::marks_sheet(ctx, &offering_id)?;
    Ok(json!(sheet))
}

fn marks_enter(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let phase = get_phase(&req.params)?;
    let entries = parse_entries(&req.params)?;
    let outcomes = engine::enter_marks(ctx, &offering_id, phase, &entries)?;
    Ok(outcomes_result(&outcomes))
}

fn marks_submit(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let outcomes = engine::submit_marks(ctx, &offering_id)?;
    Ok(outcomes_result(&outcomes))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Ctx<'_>, &Request) -> HandlerResult = match req.method.as_str() {
        "marks.get" => marks_get,
        "marks.enter" => marks_enter,
        "marks.submit" => marks_submit,
        _ => return None,
    };
    Some(run_with_actor(state, req, handler))
}
