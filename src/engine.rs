use crate::audit::{self, NewEntry};
use crate::auth::{Actor, Role};
use crate::db;
use crate::error::{WorkflowError, WorkflowResult};
use crate::gpa::{self, CreditedGrade};
use crate::grading::{GradePolicy, LetterGrade, Phase};
use crate::store::{self, EnrolledStudent, EntryWindow, Offering, PublishedGrade};
use crate::workflow::{self, Applied, GradeRecord, Transition};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One request's view of the world: who is acting, and the single `now`
/// every window check and timestamp in the request uses.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub actor: &'a Actor,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub student_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RecordOutcome {
    fn done(student_id: &str, status: &'static str) -> Self {
        Self {
            student_id: student_id.to_string(),
            status,
            code: None,
            message: None,
        }
    }

    fn rejected(student_id: &str, e: &WorkflowError) -> Self {
        Self {
            student_id: student_id.to_string(),
            status: "rejected",
            code: Some(e.code()),
            message: Some(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarkEntry<'a> {
    pub student_id: &'a str,
    pub value: f64,
}

fn require_assigned_faculty(ctx: &Ctx<'_>, offering: &Offering) -> WorkflowResult<()> {
    ctx.actor.require_faculty()?;
    if store::is_faculty_assigned(ctx.conn, &ctx.actor.user_id, &offering.id)? {
        Ok(())
    } else {
        Err(WorkflowError::Unauthorized(
            "not assigned to this offering".to_string(),
        ))
    }
}

/// Admin, HOD of the course's department, or faculty assigned to it.
fn require_offering_staff(ctx: &Ctx<'_>, offering: &Offering) -> WorkflowResult<()> {
    match ctx.actor.role {
        Role::Admin => Ok(()),
        Role::Faculty if ctx.actor.is_hod_of(&offering.department_id) => Ok(()),
        Role::Faculty => require_assigned_faculty(ctx, offering),
        Role::Student => Err(WorkflowError::Unauthorized(
            "staff access required".to_string(),
        )),
    }
}

fn require_grading_staff(ctx: &Ctx<'_>, offering: &Offering) -> WorkflowResult<()> {
    if ctx.actor.is_hod_of(&offering.department_id) {
        return Ok(());
    }
    require_assigned_faculty(ctx, offering)
}

/// Applies one transition to one pair, persists it with a stage
/// compare-and-set and appends the audit entry. Returns `None` when the
/// record was already at or past the target.
fn commit_step(
    ctx: &Ctx<'_>,
    current: Option<GradeRecord>,
    student_id: &str,
    offering_id: &str,
    transition: &Transition,
) -> WorkflowResult<Option<GradeRecord>> {
    let applied = workflow::apply(
        current.as_ref(),
        student_id,
        offering_id,
        transition,
        &ctx.actor.user_id,
        ctx.now,
    )?;
    let Applied::Changed(next) = applied else {
        return Ok(None);
    };

    match &current {
        None => store::insert_record(ctx.conn, &next)?,
        Some(prev) => {
            if !store::update_record_if_stage(ctx.conn, prev.stage.kind(), &next)? {
                return Err(WorkflowError::PreconditionNotMet(
                    "record changed concurrently".to_string(),
                ));
            }
        }
    }

    audit::append(
        ctx.conn,
        NewEntry {
            actor_id: &ctx.actor.user_id,
            action: transition.action(),
            offering_id: Some(offering_id),
            student_id: Some(student_id),
            before: current.as_ref().map(GradeRecord::snapshot),
            after: Some(next.snapshot()),
            at: ctx.now,
        },
    )?;

    info!(
        offering_id,
        student_id,
        actor_id = %ctx.actor.user_id,
        action = transition.action(),
        stage = next.stage.kind().as_str(),
        "grade record transition"
    );
    Ok(Some(next))
}

/// Runs `f` for one student; domain failures become a rejected outcome,
/// storage failures abort the whole request.
fn per_record(
    student_id: &str,
    f: impl FnOnce() -> WorkflowResult<RecordOutcome>,
) -> WorkflowResult<RecordOutcome> {
    match f() {
        Ok(o) => Ok(o),
        Err(e) if e.is_domain() => {
            debug!(student_id, code = e.code(), "record rejected: {}", e);
            Ok(RecordOutcome::rejected(student_id, &e))
        }
        Err(e) => Err(e),
    }
}

pub fn enter_marks(
    ctx: &Ctx<'_>,
    offering_id: &str,
    phase: Phase,
    entries: &[MarkEntry<'_>],
) -> WorkflowResult<Vec<RecordOutcome>> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    require_assigned_faculty(ctx, &offering)?;

    let tx = db::begin_immediate(ctx.conn).map_err(WorkflowError::Write)?;
    let open = store::active_window(&tx, offering_id, phase)?
        .map(|w| w.is_open_at(ctx.now))
        .unwrap_or(false);
    if !open {
        debug!(offering_id, phase = phase.as_str(), "marks entry outside window");
        return Err(WorkflowError::WindowClosed { phase });
    }
    let policy = store::load_policy(&tx)?;

    let mut outcomes = Vec::with_capacity(entries.len());
    for entry in entries {
        let outcome = per_record(entry.student_id, || {
            policy
                .check_score(phase, entry.value)
                .map_err(WorkflowError::InvalidInput)?;
            if !store::is_enrolled(&tx, entry.student_id, offering_id)? {
                return Err(WorkflowError::PreconditionNotMet(
                    "student not enrolled in offering".to_string(),
                ));
            }
            let current = store::load_record(&tx, entry.student_id, offering_id)?;
            commit_step(
                ctx,
                current,
                entry.student_id,
                offering_id,
                &Transition::RecordMark {
                    phase,
                    value: entry.value,
                },
            )?;
            Ok(RecordOutcome::done(entry.student_id, "recorded"))
        })?;
        outcomes.push(outcome);
    }
    tx.commit().map_err(WorkflowError::Write)?;
    Ok(outcomes)
}

pub fn submit_marks(ctx: &Ctx<'_>, offering_id: &str) -> WorkflowResult<Vec<RecordOutcome>> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    require_assigned_faculty(ctx, &offering)?;

    let tx = db::begin_immediate(ctx.conn).map_err(WorkflowError::Write)?;
    let mut outcomes = Vec::new();
    for record in store::list_records(&tx, offering_id)? {
        let student_id = record.student_id.clone();
        let outcome = per_record(&student_id, || {
            let step = commit_step(ctx, Some(record), &student_id, offering_id, &Transition::Lock)?;
            let status = match step {
                Some(_) => "locked",
                None => "already_locked",
            };
            Ok(RecordOutcome::done(&student_id, status))
        })?;
        outcomes.push(outcome);
    }
    tx.commit().map_err(WorkflowError::Write)?;
    Ok(outcomes)
}

/// Explicit ids as given; otherwise every actively enrolled student followed
/// by any remaining record holders, so ineligible students are reported
/// rather than skipped.
fn targets(
    conn: &Connection,
    offering_id: &str,
    student_ids: Option<&[String]>,
) -> WorkflowResult<Vec<(String, Option<GradeRecord>)>> {
    if let Some(ids) = student_ids {
        return ids
            .iter()
            .map(|id| Ok((id.clone(), store::load_record(conn, id, offering_id)?)))
            .collect();
    }
    let mut records: BTreeMap<String, GradeRecord> = store::list_records(conn, offering_id)?
        .into_iter()
        .map(|r| (r.student_id.clone(), r))
        .collect();
    let mut out = Vec::new();
    for student in store::enrolled_students(conn, offering_id)? {
        let record = records.remove(&student.id);
        out.push((student.id, record));
    }
    out.extend(records.into_iter().map(|(id, r)| (id, Some(r))));
    Ok(out)
}

pub fn compute_grades(
    ctx: &Ctx<'_>,
    offering_id: &str,
    student_ids: Option<&[String]>,
) -> WorkflowResult<Vec<RecordOutcome>> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    require_grading_staff(ctx, &offering)?;

    let tx = db::begin_immediate(ctx.conn).map_err(WorkflowError::Write)?;
    let policy = store::load_policy(&tx)?;
    let mut outcomes = Vec::new();
    for (student_id, current) in targets(&tx, offering_id, student_ids)? {
        let outcome = per_record(&student_id, || {
            let grade = current
                .as_ref()
                .map(|r| policy.compute(&r.marks))
                .unwrap_or(LetterGrade::X);
            let status = match commit_step(
                ctx,
                current,
                &student_id,
                offering_id,
                &Transition::Compute { grade },
            )? {
                Some(_) => "computed",
                None => "already_computed",
            };
            Ok(RecordOutcome::done(&student_id, status))
        })?;
        outcomes.push(outcome);
    }
    tx.commit().map_err(WorkflowError::Write)?;
    Ok(outcomes)
}

pub fn approve_grades(
    ctx: &Ctx<'_>,
    offering_id: &str,
    student_ids: Option<&[String]>,
) -> WorkflowResult<Vec<RecordOutcome>> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    ctx.actor.require_hod_of(&offering.department_id)?;

    let tx = db::begin_immediate(ctx.conn).map_err(WorkflowError::Write)?;
    let mut outcomes = Vec::new();
    for (student_id, current) in targets(&tx, offering_id, student_ids)? {
        let outcome = per_record(&student_id, || {
            let step = commit_step(ctx, current, &student_id, offering_id, &Transition::Approve)?;
            let status = match step {
                Some(_) => "approved",
                None => "already_approved",
            };
            Ok(RecordOutcome::done(&student_id, status))
        })?;
        outcomes.push(outcome);
    }
    tx.commit().map_err(WorkflowError::Write)?;
    Ok(outcomes)
}

/// All-or-nothing at the offering level: one frozen grade blocks the run.
/// Past that guard each approved student is frozen on their own.
pub fn publish_grades(
    ctx: &Ctx<'_>,
    offering_id: &str,
    student_ids: Option<&[String]>,
) -> WorkflowResult<Vec<RecordOutcome>> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    ctx.actor.require_hod_of(&offering.department_id)?;

    let tx = db::begin_immediate(ctx.conn).map_err(WorkflowError::Write)?;
    if store::any_published(&tx, offering_id)? {
        debug!(offering_id, "publish blocked: offering already published");
        return Err(WorkflowError::AlreadyPublished);
    }
    let mut outcomes = Vec::new();
    for (student_id, current) in targets(&tx, offering_id, student_ids)? {
        let outcome = per_record(&student_id, || {
            commit_step(ctx, current, &student_id, offering_id, &Transition::Publish)?;
            Ok(RecordOutcome::done(&student_id, "published"))
        })?;
        outcomes.push(outcome);
    }
    tx.commit().map_err(WorkflowError::Write)?;
    Ok(outcomes)
}

pub fn set_window(
    ctx: &Ctx<'_>,
    offering_id: &str,
    phase: Phase,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> WorkflowResult<EntryWindow> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    ctx.actor.require_admin_or_hod_of(&offering.department_id)?;
    if start_time >= end_time {
        return Err(WorkflowError::InvalidInput(
            "startTime must be before endTime".to_string(),
        ));
    }

    let tx = db::begin_immediate(ctx.conn).map_err(WorkflowError::Write)?;
    let (window, previous) = store::replace_active_window(
        &tx,
        offering_id,
        phase,
        start_time,
        end_time,
        &ctx.actor.user_id,
        ctx.now,
    )?;
    audit::append(
        &tx,
        NewEntry {
            actor_id: &ctx.actor.user_id,
            action: "window.set",
            offering_id: Some(offering_id),
            student_id: None,
            before: previous.map(|w| json!(w)),
            after: Some(json!(window)),
            at: ctx.now,
        },
    )?;
    tx.commit().map_err(WorkflowError::Write)?;
    info!(offering_id, phase = phase.as_str(), window_id = %window.id, "entry window set");
    Ok(window)
}

pub fn close_window(ctx: &Ctx<'_>, window_id: &str) -> WorkflowResult<bool> {
    let window = store::load_window(ctx.conn, window_id)?;
    let offering = store::load_offering(ctx.conn, &window.offering_id)?;
    ctx.actor.require_admin_or_hod_of(&offering.department_id)?;

    let tx = db::begin_immediate(ctx.conn).map_err(WorkflowError::Write)?;
    let closed = store::deactivate_window(&tx, window_id)?;
    if closed {
        audit::append(
            &tx,
            NewEntry {
                actor_id: &ctx.actor.user_id,
                action: "window.close",
                offering_id: Some(&window.offering_id),
                student_id: None,
                before: Some(json!(window)),
                after: None,
                at: ctx.now,
            },
        )?;
    }
    tx.commit().map_err(WorkflowError::Write)?;
    Ok(closed)
}

pub fn list_windows(ctx: &Ctx<'_>, offering_id: &str) -> WorkflowResult<Vec<EntryWindow>> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    require_offering_staff(ctx, &offering)?;
    store::list_windows(ctx.conn, offering_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub student_id: String,
    pub stage: &'static str,
    pub minor1: Option<f64>,
    pub minor2: Option<f64>,
    pub mid: Option<f64>,
    pub end: Option<f64>,
    pub submitted_by: String,
    pub is_locked: bool,
    pub computed_grade: Option<LetterGrade>,
    pub is_approved: bool,
    pub approved_by: Option<String>,
    pub is_frozen: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&GradeRecord> for RecordView {
    fn from(r: &GradeRecord) -> Self {
        Self {
            student_id: r.student_id.clone(),
            stage: r.stage.kind().as_str(),
            minor1: r.marks.minor1,
            minor2: r.marks.minor2,
            mid: r.marks.mid,
            end: r.marks.end,
            submitted_by: r.submitted_by.clone(),
            is_locked: r.is_locked(),
            computed_grade: r.stage.computed().map(|c| c.grade),
            is_approved: r.stage.approved().is_some(),
            approved_by: r.stage.approved().map(|s| s.by.clone()),
            is_frozen: r.is_frozen(),
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksSheet {
    pub offering: Offering,
    pub students: Vec<EnrolledStudent>,
    pub records: Vec<RecordView>,
    pub open_phases: Vec<Phase>,
    pub windows: Vec<EntryWindow>,
}

pub fn marks_sheet(ctx: &Ctx<'_>, offering_id: &str) -> WorkflowResult<MarksSheet> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    require_offering_staff(ctx, &offering)?;
    let windows = store::list_windows(ctx.conn, offering_id)?;
    let open_phases = windows
        .iter()
        .filter(|w| w.is_open_at(ctx.now))
        .map(|w| w.phase)
        .collect();
    Ok(MarksSheet {
        students: store::enrolled_students(ctx.conn, offering_id)?,
        records: store::list_records(ctx.conn, offering_id)?
            .iter()
            .map(RecordView::from)
            .collect(),
        open_phases,
        windows,
        offering,
    })
}

pub fn review_sheet(ctx: &Ctx<'_>, offering_id: &str) -> WorkflowResult<Vec<RecordView>> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    require_offering_staff(ctx, &offering)?;
    Ok(store::list_records(ctx.conn, offering_id)?
        .iter()
        .map(RecordView::from)
        .collect())
}

pub fn final_grades(ctx: &Ctx<'_>, offering_id: &str) -> WorkflowResult<Vec<PublishedGrade>> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    require_offering_staff(ctx, &offering)?;
    store::published_for_offering(ctx.conn, offering_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrades {
    pub student_id: String,
    pub grades: Vec<PublishedGrade>,
    pub sgpa: Option<f64>,
    pub cgpa: f64,
}

/// One term of study. Semester numbers repeat every academic year, so a
/// semester alone does not identify a term.
#[derive(Debug, Clone, Copy)]
pub struct Term<'a> {
    pub academic_year: &'a str,
    pub semester: i64,
}

impl Term<'_> {
    fn contains(&self, g: &PublishedGrade) -> bool {
        g.academic_year == self.academic_year && g.semester == self.semester
    }
}

pub fn student_grades(
    ctx: &Ctx<'_>,
    student_id: &str,
    term: Option<Term<'_>>,
) -> WorkflowResult<StudentGrades> {
    match ctx.actor.role {
        Role::Admin => {}
        Role::Student if ctx.actor.user_id == student_id => {}
        _ => {
            return Err(WorkflowError::Unauthorized(
                "students may only view their own grades".to_string(),
            ))
        }
    }

    let all = store::published_for_student(ctx.conn, student_id)?;
    let credited = |g: &PublishedGrade| CreditedGrade {
        grade: g.final_grade,
        credits: g.credits,
    };
    let cgpa = gpa::weighted_gpa(all.iter().map(credited));

    let (grades, sgpa) = match term {
        Some(term) => {
            let grades: Vec<PublishedGrade> =
                all.into_iter().filter(|g| term.contains(g)).collect();
            let sgpa = gpa::weighted_gpa(grades.iter().map(credited));
            (grades, Some(sgpa))
        }
        None => (all, None),
    };

    Ok(StudentGrades {
        student_id: student_id.to_string(),
        grades,
        sgpa,
        cgpa,
    })
}

pub fn audit_trail(
    ctx: &Ctx<'_>,
    offering_id: &str,
    student_id: Option<&str>,
) -> WorkflowResult<Vec<audit::AuditEntry>> {
    let offering = store::load_offering(ctx.conn, offering_id)?;
    ctx.actor.require_admin_or_hod_of(&offering.department_id)?;
    audit::list(ctx.conn, offering_id, student_id)
}

pub fn verify_audit(ctx: &Ctx<'_>) -> WorkflowResult<audit::ChainReport> {
    ctx.actor.require_admin()?;
    audit::verify_chain(ctx.conn)
}

pub fn update_policy(ctx: &Ctx<'_>, policy: &GradePolicy) -> WorkflowResult<()> {
    ctx.actor.require_admin()?;
    policy.validate().map_err(WorkflowError::InvalidInput)?;

    let tx = db::begin_immediate(ctx.conn).map_err(WorkflowError::Write)?;
    let before = store::load_policy(&tx)?;
    store::save_policy(&tx, policy)?;
    audit::append(
        &tx,
        NewEntry {
            actor_id: &ctx.actor.user_id,
            action: "policy.update",
            offering_id: None,
            student_id: None,
            before: Some(json!(before)),
            after: Some(json!(policy)),
            at: ctx.now,
        },
    )?;
    tx.commit().map_err(WorkflowError::Write)?;
    info!(actor_id = %ctx.actor.user_id, "grading policy updated");
    Ok(())
}
