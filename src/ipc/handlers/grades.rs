use crate::engine::{self, Ctx, Term};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_student_ids, outcomes_result, run_with_actor,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn get_semester(params: &Value) -> Result<Option<i64>, HandlerErr> {
    match params.get("semester") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_i64() {
            Some(s) if (1..=2).contains(&s) => Ok(Some(s)),
            _ => Err(HandlerErr::bad_params("semester must be 1 or 2")),
        },
    }
}

/// `academicYear` and `semester` name a term together or not at all.
fn get_term(params: &Value) -> Result<Option<(String, i64)>, HandlerErr> {
    match (get_optional_str(params, "academicYear"), get_semester(params)?) {
        (Some(year), Some(semester)) => Ok(Some((year, semester))),
        (None, None) => Ok(None),
        _ => Err(HandlerErr::bad_params(
            "academicYear and semester must be given together",
        )),
    }
}

fn grades_compute(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let student_ids = get_student_ids(&req.params)?;
    let outcomes = engine::compute_grades(ctx, &offering_id, student_ids.as_deref())?;
    Ok(outcomes_result(&outcomes))
}

fn grades_list(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let records = engine::review_sheet(ctx, &offering_id)?;
    Ok(json!({ "records": records }))
}

fn grades_approve(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let student_ids = get_student_ids(&req.params)?;
    let outcomes = engine::approve_grades(ctx, &offering_id, student_ids.as_deref())?;
    Ok(outcomes_result(&outcomes))
}

fn grades_publish(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let student_ids = get_student_ids(&req.params)?;
    let outcomes = engine::publish_grades(ctx, &offering_id, student_ids.as_deref())?;
    Ok(outcomes_result(&outcomes))
}

fn grades_final(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let grades = engine::final_grades(ctx, &offering_id)?;
    Ok(json!({ "grades": grades }))
}

fn grades_student(ctx: &Ctx<'_>, req: &Request) -> HandlerResult {
    let student_id = get_optional_str(&req.params, "studentId")
        .unwrap_or_else(|| ctx.actor.user_id.clone());
    let term = get_term(&req.params)?;
    let report = engine::student_grades(
        ctx,
        &student_id,
        term.as_ref().map(|(academic_year, semester)| Term {
            academic_year: academic_year.as_str(),
            semester: *semester,
        }),
    )?;
    Ok(json!(report))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Ctx<'_>, &Request) -> HandlerResult = match req.method.as_str() {
        "grades.compute" => grades_compute,
        "grades.list" => grades_list,
        "grades.approve" => grades_approve,
        "grades.publish" => grades_publish,
        "grades.final" => grades_final,
        "grades.student" => grades_student,
        _ => return None,
    };
    Some(run_with_actor(state, req, handler))
}
