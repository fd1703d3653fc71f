use crate::engine::{self, Ctx};
use crate::ipc::helpers::{get_optional_str, get_required_str, run_with_actor, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn audit_list(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let student_id = get_optional_str(&req.params, "studentId");
    let entries = engine::audit_trail(ctx, &offering_id, student_id.as_deref())?;
    Ok(json!({ "entries": entries }))
}

fn audit_verify(ctx: &Ctx<'_>, _req: &Request) -> HandlerResult {
    let report = engine::verify_audit(ctx)?;
    Ok(json!(report))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Ctx<'_>, &Request) -> HandlerResult = match req.method.as_str() {
        "audit.list" => audit_list,
        "audit.verify" => audit_verify,
        _ => return None,
    };
    Some(run_with_actor(state, req, handler))
}
