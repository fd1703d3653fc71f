use crate::error::{WorkflowError, WorkflowResult};
use crate::grading::{ComponentMarks, GradePolicy, LetterGrade, Phase};
use crate::workflow::{Computation, GradeRecord, Stage, StageKind, Stamp};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

pub const POLICY_SETTINGS_KEY: &str = "policy.grading";

pub fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> WorkflowResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| WorkflowError::Corrupt(format!("timestamp {}: {}", raw, e)))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Offering {
    pub id: String,
    pub course_id: String,
    pub course_code: String,
    pub course_title: String,
    pub credits: u32,
    pub department_id: String,
    pub academic_year: String,
    pub year: i64,
    pub semester: i64,
}

pub fn load_offering(conn: &Connection, offering_id: &str) -> WorkflowResult<Offering> {
    conn.query_row(
        "SELECT o.id, c.id, c.code, c.title, c.credits, c.department_id,
                o.academic_year, o.year, o.semester
         FROM course_offerings o
         JOIN courses c ON c.id = o.course_id
         WHERE o.id = ?",
        [offering_id],
        |r| {
            Ok(Offering {
                id: r.get(0)?,
                course_id: r.get(1)?,
                course_code: r.get(2)?,
                course_title: r.get(3)?,
                credits: r.get(4)?,
                department_id: r.get(5)?,
                academic_year: r.get(6)?,
                year: r.get(7)?,
                semester: r.get(8)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| WorkflowError::NotFound(format!("offering {}", offering_id)))
}

pub fn is_faculty_assigned(
    conn: &Connection,
    faculty_id: &str,
    offering_id: &str,
) -> WorkflowResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM faculty_assignments
             WHERE faculty_id = ? AND offering_id = ? AND is_active = 1",
            [faculty_id, offering_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

pub fn is_enrolled(conn: &Connection, student_id: &str, offering_id: &str) -> WorkflowResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM enrollments
             WHERE student_id = ? AND offering_id = ? AND is_active = 1",
            [student_id, offering_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledStudent {
    pub id: String,
    pub username: String,
    pub is_repeat: bool,
}

pub fn enrolled_students(
    conn: &Connection,
    offering_id: &str,
) -> WorkflowResult<Vec<EnrolledStudent>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, e.is_repeat
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         WHERE e.offering_id = ? AND e.is_active = 1 AND u.role = 'STUDENT'
         ORDER BY u.username",
    )?;
    let rows = stmt
        .query_map([offering_id], |r| {
            Ok(EnrolledStudent {
                id: r.get(0)?,
                username: r.get(1)?,
                is_repeat: r.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

const RECORD_COLUMNS: &str = "student_id, offering_id, minor1, minor2, mid, end_sem,
    submitted_by, stage, locked_by, locked_at, computed_grade, computed_by,
    computed_at, approved_by, approved_at, published_by, published_at, updated_at";

struct RawRecord {
    student_id: String,
    offering_id: String,
    marks: ComponentMarks,
    submitted_by: String,
    stage: String,
    locked_by: Option<String>,
    locked_at: Option<String>,
    computed_grade: Option<String>,
    computed_by: Option<String>,
    computed_at: Option<String>,
    approved_by: Option<String>,
    approved_at: Option<String>,
    published_by: Option<String>,
    published_at: Option<String>,
    updated_at: String,
}

fn read_raw(r: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        student_id: r.get(0)?,
        offering_id: r.get(1)?,
        marks: ComponentMarks {
            minor1: r.get(2)?,
            minor2: r.get(3)?,
            mid: r.get(4)?,
            end: r.get(5)?,
        },
        submitted_by: r.get(6)?,
        stage: r.get(7)?,
        locked_by: r.get(8)?,
        locked_at: r.get(9)?,
        computed_grade: r.get(10)?,
        computed_by: r.get(11)?,
        computed_at: r.get(12)?,
        approved_by: r.get(13)?,
        approved_at: r.get(14)?,
        published_by: r.get(15)?,
        published_at: r.get(16)?,
        updated_at: r.get(17)?,
    })
}

fn stamp_from(by: Option<String>, at: Option<String>, what: &str) -> WorkflowResult<Stamp> {
    match (by, at) {
        (Some(by), Some(at)) => Ok(Stamp {
            by,
            at: parse_ts(&at)?,
        }),
        _ => Err(WorkflowError::Corrupt(format!("missing {} stamp", what))),
    }
}

impl RawRecord {
    fn into_record(self) -> WorkflowResult<GradeRecord> {
        let kind = StageKind::parse(&self.stage)
            .ok_or_else(|| WorkflowError::Corrupt(format!("stage {}", self.stage)))?;

        let locked = || stamp_from(self.locked_by.clone(), self.locked_at.clone(), "lock");
        let computed = || -> WorkflowResult<Computation> {
            let raw = self
                .computed_grade
                .as_deref()
                .ok_or_else(|| WorkflowError::Corrupt("missing computed grade".to_string()))?;
            let grade = LetterGrade::parse(raw)
                .ok_or_else(|| WorkflowError::Corrupt(format!("grade {}", raw)))?;
            Ok(Computation {
                grade,
                stamp: stamp_from(self.computed_by.clone(), self.computed_at.clone(), "compute")?,
            })
        };
        let approved =
            || stamp_from(self.approved_by.clone(), self.approved_at.clone(), "approval");
        let published =
            || stamp_from(self.published_by.clone(), self.published_at.clone(), "publication");

        let stage = match kind {
            StageKind::MarksOpen => Stage::MarksOpen,
            StageKind::MarksLocked => Stage::MarksLocked { locked: locked()? },
            StageKind::Computed => Stage::Computed {
                locked: locked()?,
                computed: computed()?,
            },
            StageKind::Approved => Stage::Approved {
                locked: locked()?,
                computed: computed()?,
                approved: approved()?,
            },
            StageKind::Published => Stage::Published {
                locked: locked()?,
                computed: computed()?,
                approved: approved()?,
                published: published()?,
            },
        };

        Ok(GradeRecord {
            updated_at: parse_ts(&self.updated_at)?,
            student_id: self.student_id,
            offering_id: self.offering_id,
            marks: self.marks,
            submitted_by: self.submitted_by,
            stage,
        })
    }
}

pub fn load_record(
    conn: &Connection,
    student_id: &str,
    offering_id: &str,
) -> WorkflowResult<Option<GradeRecord>> {
    let sql = format!(
        "SELECT {} FROM grade_records WHERE student_id = ? AND offering_id = ?",
        RECORD_COLUMNS
    );
    let raw = conn
        .query_row(&sql, [student_id, offering_id], read_raw)
        .optional()?;
    raw.map(RawRecord::into_record).transpose()
}

pub fn list_records(conn: &Connection, offering_id: &str) -> WorkflowResult<Vec<GradeRecord>> {
    let sql = format!(
        "SELECT {} FROM grade_records WHERE offering_id = ? ORDER BY student_id",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map([offering_id], read_raw)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawRecord::into_record).collect()
}

pub fn any_published(conn: &Connection, offering_id: &str) -> WorkflowResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM grade_records WHERE offering_id = ? AND stage = 'published' LIMIT 1",
            [offering_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

struct Columns {
    stage: &'static str,
    locked_by: Option<String>,
    locked_at: Option<String>,
    computed_grade: Option<&'static str>,
    computed_by: Option<String>,
    computed_at: Option<String>,
    approved_by: Option<String>,
    approved_at: Option<String>,
    grade_point: Option<u8>,
    published_by: Option<String>,
    published_at: Option<String>,
}

fn columns(stage: &Stage) -> Columns {
    let split = |s: Option<&Stamp>| match s {
        Some(s) => (Some(s.by.clone()), Some(format_ts(s.at))),
        None => (None, None),
    };
    let (locked_by, locked_at) = split(stage.locked());
    let (computed_by, computed_at) = split(stage.computed().map(|c| &c.stamp));
    let (approved_by, approved_at) = split(stage.approved());
    let (published_by, published_at) = split(stage.published());
    Columns {
        stage: stage.kind().as_str(),
        locked_by,
        locked_at,
        computed_grade: stage.computed().map(|c| c.grade.as_str()),
        computed_by,
        computed_at,
        approved_by,
        approved_at,
        grade_point: stage.published().and(stage.computed()).map(|c| c.grade.grade_point()),
        published_by,
        published_at,
    }
}

pub fn insert_record(conn: &Connection, record: &GradeRecord) -> WorkflowResult<()> {
    let c = columns(&record.stage);
    conn.execute(
        "INSERT INTO grade_records(
            student_id, offering_id, minor1, minor2, mid, end_sem, submitted_by,
            stage, locked_by, locked_at, computed_grade, computed_by, computed_at,
            approved_by, approved_at, grade_point, published_by, published_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            record.student_id,
            record.offering_id,
            record.marks.minor1,
            record.marks.minor2,
            record.marks.mid,
            record.marks.end,
            record.submitted_by,
            c.stage,
            c.locked_by,
            c.locked_at,
            c.computed_grade,
            c.computed_by,
            c.computed_at,
            c.approved_by,
            c.approved_at,
            c.grade_point,
            c.published_by,
            c.published_at,
            format_ts(record.updated_at),
        ],
    )
    .map_err(WorkflowError::Write)?;
    Ok(())
}

/// Compare-and-set: writes `next` only while the persisted stage is still
/// `expected`. Returns whether the row was written.
pub fn update_record_if_stage(
    conn: &Connection,
    expected: StageKind,
    next: &GradeRecord,
) -> WorkflowResult<bool> {
    let c = columns(&next.stage);
    let changed = conn.execute(
        "UPDATE grade_records SET
            minor1 = ?, minor2 = ?, mid = ?, end_sem = ?,
            stage = ?, locked_by = ?, locked_at = ?,
            computed_grade = ?, computed_by = ?, computed_at = ?,
            approved_by = ?, approved_at = ?, grade_point = ?,
            published_by = ?, published_at = ?, updated_at = ?
         WHERE student_id = ? AND offering_id = ? AND stage = ?",
        rusqlite::params![
            next.marks.minor1,
            next.marks.minor2,
            next.marks.mid,
            next.marks.end,
            c.stage,
            c.locked_by,
            c.locked_at,
            c.computed_grade,
            c.computed_by,
            c.computed_at,
            c.approved_by,
            c.approved_at,
            c.grade_point,
            c.published_by,
            c.published_at,
            format_ts(next.updated_at),
            next.student_id,
            next.offering_id,
            expected.as_str(),
        ],
    )
    .map_err(WorkflowError::Write)?;
    Ok(changed == 1)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryWindow {
    pub id: String,
    pub offering_id: String,
    pub phase: Phase,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_active: bool,
    pub created_by: String,
}

impl EntryWindow {
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_time <= now && now <= self.end_time
    }
}

type WindowRow = (String, String, String, String, String, i64, String);

fn window_from_row(r: &Row<'_>) -> rusqlite::Result<WindowRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn window_from_raw(
    raw: (String, String, String, String, String, i64, String),
) -> WorkflowResult<EntryWindow> {
    let (id, offering_id, phase, start, end, is_active, created_by) = raw;
    Ok(EntryWindow {
        id,
        offering_id,
        phase: Phase::parse(&phase)
            .ok_or_else(|| WorkflowError::Corrupt(format!("phase {}", phase)))?,
        start_time: parse_ts(&start)?,
        end_time: parse_ts(&end)?,
        is_active: is_active != 0,
        created_by,
    })
}

const WINDOW_COLUMNS: &str =
    "id, offering_id, phase, start_time, end_time, is_active, created_by";

pub fn list_windows(conn: &Connection, offering_id: &str) -> WorkflowResult<Vec<EntryWindow>> {
    let sql = format!(
        "SELECT {} FROM marks_entry_windows WHERE offering_id = ?
         ORDER BY phase, created_at",
        WINDOW_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map([offering_id], window_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(window_from_raw).collect()
}

pub fn active_window(
    conn: &Connection,
    offering_id: &str,
    phase: Phase,
) -> WorkflowResult<Option<EntryWindow>> {
    let sql = format!(
        "SELECT {} FROM marks_entry_windows
         WHERE offering_id = ? AND phase = ? AND is_active = 1",
        WINDOW_COLUMNS
    );
    let raw = conn
        .query_row(&sql, [offering_id, phase.as_str()], window_from_row)
        .optional()?;
    raw.map(window_from_raw).transpose()
}

pub fn load_window(conn: &Connection, window_id: &str) -> WorkflowResult<EntryWindow> {
    let sql = format!("SELECT {} FROM marks_entry_windows WHERE id = ?", WINDOW_COLUMNS);
    let raw = conn
        .query_row(&sql, [window_id], window_from_row)
        .optional()?
        .ok_or_else(|| WorkflowError::NotFound(format!("window {}", window_id)))?;
    window_from_raw(raw)
}

/// Deactivates any active window for the same (offering, phase), then
/// inserts the new one as active. Caller owns the transaction.
pub fn replace_active_window(
    conn: &Connection,
    offering_id: &str,
    phase: Phase,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    created_by: &str,
    now: DateTime<Utc>,
) -> WorkflowResult<(EntryWindow, Option<EntryWindow>)> {
    let previous = active_window(conn, offering_id, phase)?;
    conn.execute(
        "UPDATE marks_entry_windows SET is_active = 0
         WHERE offering_id = ? AND phase = ? AND is_active = 1",
        [offering_id, phase.as_str()],
    )
    .map_err(WorkflowError::Write)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marks_entry_windows(
            id, offering_id, phase, start_time, end_time, is_active, created_by, created_at
         ) VALUES(?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &id,
            offering_id,
            phase.as_str(),
            format_ts(start_time),
            format_ts(end_time),
            created_by,
            format_ts(now),
        ),
    )
    .map_err(WorkflowError::Write)?;
    Ok((
        EntryWindow {
            id,
            offering_id: offering_id.to_string(),
            phase,
            start_time,
            end_time,
            is_active: true,
            created_by: created_by.to_string(),
        },
        previous,
    ))
}

pub fn deactivate_window(conn: &Connection, window_id: &str) -> WorkflowResult<bool> {
    let changed = conn.execute(
        "UPDATE marks_entry_windows SET is_active = 0 WHERE id = ? AND is_active = 1",
        [window_id],
    )
    .map_err(WorkflowError::Write)?;
    Ok(changed == 1)
}

pub fn load_policy(conn: &Connection) -> WorkflowResult<GradePolicy> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [POLICY_SETTINGS_KEY],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| WorkflowError::Corrupt(format!("grading policy: {}", e))),
        None => Ok(GradePolicy::default()),
    }
}

pub fn save_policy(conn: &Connection, policy: &GradePolicy) -> WorkflowResult<()> {
    let raw = serde_json::to_string(policy)
        .map_err(|e| WorkflowError::InvalidInput(format!("grading policy: {}", e)))?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (POLICY_SETTINGS_KEY, raw),
    )
    .map_err(WorkflowError::Write)?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedGrade {
    pub student_id: String,
    pub offering_id: String,
    pub course_code: String,
    pub course_title: String,
    pub credits: u32,
    pub academic_year: String,
    pub year: i64,
    pub semester: i64,
    pub final_grade: LetterGrade,
    pub grade_point: u8,
    pub is_frozen: bool,
    pub published_at: DateTime<Utc>,
    pub published_by: String,
}

struct RawPublished {
    student_id: String,
    offering_id: String,
    course_code: String,
    course_title: String,
    credits: u32,
    academic_year: String,
    year: i64,
    semester: i64,
    grade: String,
    published_at: String,
    published_by: String,
}

fn published_from_row(r: &Row<'_>) -> rusqlite::Result<RawPublished> {
    Ok(RawPublished {
        student_id: r.get(0)?,
        offering_id: r.get(1)?,
        course_code: r.get(2)?,
        course_title: r.get(3)?,
        credits: r.get(4)?,
        academic_year: r.get(5)?,
        year: r.get(6)?,
        semester: r.get(7)?,
        grade: r.get(8)?,
        published_at: r.get(9)?,
        published_by: r.get(10)?,
    })
}

impl RawPublished {
    fn into_grade(self) -> WorkflowResult<PublishedGrade> {
        let final_grade = LetterGrade::parse(&self.grade)
            .ok_or_else(|| WorkflowError::Corrupt(format!("grade {}", self.grade)))?;
        Ok(PublishedGrade {
            student_id: self.student_id,
            offering_id: self.offering_id,
            course_code: self.course_code,
            course_title: self.course_title,
            credits: self.credits,
            academic_year: self.academic_year,
            year: self.year,
            semester: self.semester,
            grade_point: final_grade.grade_point(),
            final_grade,
            is_frozen: true,
            published_at: parse_ts(&self.published_at)?,
            published_by: self.published_by,
        })
    }
}

const PUBLISHED_SELECT: &str = "SELECT g.student_id, g.offering_id, c.code, c.title, c.credits,
        o.academic_year, o.year, o.semester, g.computed_grade, g.published_at, g.published_by
     FROM grade_records g
     JOIN course_offerings o ON o.id = g.offering_id
     JOIN courses c ON c.id = o.course_id
     WHERE g.stage = 'published'";

fn published_rows(
    conn: &Connection,
    filter_sql: &str,
    bind: &str,
) -> WorkflowResult<Vec<PublishedGrade>> {
    let sql = format!(
        "{} AND {} ORDER BY o.academic_year, o.semester, c.code, g.student_id",
        PUBLISHED_SELECT, filter_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map([bind], published_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawPublished::into_grade).collect()
}

pub fn published_for_offering(
    conn: &Connection,
    offering_id: &str,
) -> WorkflowResult<Vec<PublishedGrade>> {
    published_rows(conn, "g.offering_id = ?", offering_id)
}

pub fn published_for_student(
    conn: &Connection,
    student_id: &str,
) -> WorkflowResult<Vec<PublishedGrade>> {
    published_rows(conn, "g.student_id = ?", student_id)
}
