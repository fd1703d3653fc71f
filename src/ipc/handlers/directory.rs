//! Inbound facts owned by the accounts and academics modules: departments,
//! users, courses, offerings, faculty assignments and enrollments. Every
//! call is an idempotent upsert.

use crate::auth::Role;
use crate::ipc::helpers::{
    get_bool_or, get_optional_str, get_required_i64, get_required_str, run_with_conn,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn user_role(conn: &Connection, user_id: &str) -> Result<Role, HandlerErr> {
    let raw: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(raw) = raw else {
        return Err(HandlerErr {
            code: "not_found",
            message: "user not found".to_string(),
            details: Some(json!({ "userId": user_id })),
        });
    };
    Role::parse(&raw).ok_or_else(|| HandlerErr {
        code: "db_corrupt",
        message: format!("unknown role {}", raw),
        details: None,
    })
}

fn upsert_department(conn: &Connection, req: &Request) -> HandlerResult {
    let id = get_required_str(&req.params, "id")?;
    let name = get_required_str(&req.params, "name")?;
    conn.execute(
        "INSERT INTO departments(id, name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (&id, &name),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn upsert_user(conn: &Connection, req: &Request) -> HandlerResult {
    let id = get_required_str(&req.params, "id")?;
    let username = get_required_str(&req.params, "username")?;
    let role_raw = get_required_str(&req.params, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| HandlerErr::bad_params("role must be one of: STUDENT, FACULTY, ADMIN"))?;
    let department_id = get_optional_str(&req.params, "departmentId");
    let is_hod = get_bool_or(&req.params, "isHod", false)?;

    match role {
        Role::Faculty if is_hod && department_id.is_none() => {
            return Err(HandlerErr::bad_params("an HOD must belong to a department"));
        }
        Role::Student | Role::Admin if is_hod => {
            return Err(HandlerErr::bad_params("only faculty can hold the HOD capability"));
        }
        _ => {}
    }

    conn.execute(
        "INSERT INTO users(id, username, role, department_id, is_hod) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           username = excluded.username,
           role = excluded.role,
           department_id = excluded.department_id,
           is_hod = excluded.is_hod",
        (&id, &username, role.as_str(), &department_id, is_hod as i64),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn upsert_course(conn: &Connection, req: &Request) -> HandlerResult {
    let id = get_required_str(&req.params, "id")?;
    let code = get_required_str(&req.params, "code")?;
    let title = get_required_str(&req.params, "title")?;
    let credits = get_required_i64(&req.params, "credits")?;
    let department_id = get_required_str(&req.params, "departmentId")?;
    if !(0..=40).contains(&credits) {
        return Err(HandlerErr::bad_params("credits must be between 0 and 40"));
    }
    conn.execute(
        "INSERT INTO courses(id, code, title, credits, department_id) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           code = excluded.code,
           title = excluded.title,
           credits = excluded.credits,
           department_id = excluded.department_id",
        (&id, &code, &title, credits, &department_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn upsert_offering(conn: &Connection, req: &Request) -> HandlerResult {
    let id = get_required_str(&req.params, "id")?;
    let course_id = get_required_str(&req.params, "courseId")?;
    let academic_year = get_required_str(&req.params, "academicYear")?;
    let year = get_required_i64(&req.params, "year")?;
    let semester = get_required_i64(&req.params, "semester")?;
    let is_active = get_bool_or(&req.params, "isActive", true)?;
    if !(1..=4).contains(&year) {
        return Err(HandlerErr::bad_params("year must be between 1 and 4"));
    }
    if !(1..=2).contains(&semester) {
        return Err(HandlerErr::bad_params("semester must be 1 or 2"));
    }
    conn.execute(
        "INSERT INTO course_offerings(id, course_id, academic_year, year, semester, is_active)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           course_id = excluded.course_id,
           academic_year = excluded.academic_year,
           year = excluded.year,
           semester = excluded.semester,
           is_active = excluded.is_active",
        (&id, &course_id, &academic_year, year, semester, is_active as i64),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn assign_faculty(conn: &Connection, req: &Request) -> HandlerResult {
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let is_active = get_bool_or(&req.params, "isActive", true)?;
    if user_role(conn, &faculty_id)? != Role::Faculty {
        return Err(HandlerErr::bad_params("facultyId must reference a FACULTY user"));
    }
    conn.execute(
        "INSERT INTO faculty_assignments(faculty_id, offering_id, is_active) VALUES(?, ?, ?)
         ON CONFLICT(faculty_id, offering_id) DO UPDATE SET is_active = excluded.is_active",
        (&faculty_id, &offering_id, is_active as i64),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn enroll(conn: &Connection, req: &Request) -> HandlerResult {
    let student_id = get_required_str(&req.params, "studentId")?;
    let offering_id = get_required_str(&req.params, "offeringId")?;
    let is_active = get_bool_or(&req.params, "isActive", true)?;
    let is_repeat = get_bool_or(&req.params, "isRepeat", false)?;
    if user_role(conn, &student_id)? != Role::Student {
        return Err(HandlerErr::bad_params("studentId must reference a STUDENT user"));
    }
    conn.execute(
        "INSERT INTO enrollments(student_id, offering_id, is_active, is_repeat) VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, offering_id) DO UPDATE SET
           is_active = excluded.is_active,
           is_repeat = excluded.is_repeat",
        (&student_id, &offering_id, is_active as i64, is_repeat as i64),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &Request) -> HandlerResult = match req.method.as_str() {
        "directory.upsertDepartment" => upsert_department,
        "directory.upsertUser" => upsert_user,
        "directory.upsertCourse" => upsert_course,
        "directory.upsertOffering" => upsert_offering,
        "directory.assignFaculty" => assign_faculty,
        "directory.enroll" => enroll,
        _ => return None,
    };
    Some(run_with_conn(state, req, handler))
}
