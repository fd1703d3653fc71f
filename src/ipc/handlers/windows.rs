use crate::engine::{self, Ctx};
use crate::ipc::helpers::{
    get_phase, get_required_str, get_required_ts, run_with_actor, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn windows_set(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let phase = get_phase(&req.params)?;
    let start_time = get_required_ts(&req.params, "startTime")?;
    let end_time = get_required_ts(&req.params, "endTime")?;
    let window = engine::set_window(ctx, &offering_id, phase, start_time, end_time)?;
    Ok(json!({ "window": window }))
}

fn windows_list(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let windows = engine::list_windows(ctx, &offering_id)?;
    Ok(json!({ "windows": windows }))
}

fn windows_close(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let window_id = get_required_str(&req.params, "windowId")?;
    let closed = engine::close_window(ctx, &window_id)?;
    Ok(json!({ "closed": closed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Ctx<'_>, &Request) -> HandlerResult = match req.method.as_str() {
        "windows.set" => windows_set,
        "windows.list" => windows_list,
        "windows.close" => windows_close,
        _ => return None,
    };
    Some(run_with_actor(state, req, handler))
}
