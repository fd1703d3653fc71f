use crate::engine::{self, Ctx};
use crate::grading::GradePolicy;
use crate::ipc::helpers::{run_with_actor, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

fn policy_get(ctx: &Ctx<'_>, _req: &Request) -> HandlerResult {
    let policy = store::load_policy(ctx.conn)?;
    Ok(json!({ "policy": policy }))
}

fn policy_update(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let Some(raw) = req.params.get("policy") else {
        return Err(HandlerErr::bad_params("missing policy"));
    };
    let policy: GradePolicy = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid policy: {}", e)))?;
    engine::update_policy(ctx, &policy)?;
    Ok(json!({ "policy": policy }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Ctx<'_>, &Request) -> HandlerResult = match req.method.as_str() {
        "policy.get" => policy_get,
        "policy.update" => policy_update,
        _ => return None,
    };
    Some(run_with_actor(state, req, handler))
}
