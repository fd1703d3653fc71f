use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "gradeflow.sqlite3";

pub fn open_db(workspace: &Path, busy_timeout_ms: u64) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL CHECK(role IN ('STUDENT', 'FACULTY', 'ADMIN')),
            department_id TEXT,
            is_hod INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            title TEXT NOT NULL,
            credits INTEGER NOT NULL,
            department_id TEXT NOT NULL,
            FOREIGN KEY(department_id) REFERENCES departments(id),
            UNIQUE(code, department_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_offerings(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            year INTEGER NOT NULL,
            semester INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, academic_year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_offerings_course ON course_offerings(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty_assignments(
            faculty_id TEXT NOT NULL,
            offering_id TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY(faculty_id, offering_id),
            FOREIGN KEY(faculty_id) REFERENCES users(id),
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            student_id TEXT NOT NULL,
            offering_id TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_repeat INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(student_id, offering_id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_offering ON enrollments(offering_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks_entry_windows(
            id TEXT PRIMARY KEY,
            offering_id TEXT NOT NULL,
            phase TEXT NOT NULL CHECK(phase IN ('minor1', 'minor2', 'mid', 'end')),
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id)
        )",
        [],
    )?;
    // At most one active window gates a phase.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_marks_entry_windows_active
         ON marks_entry_windows(offering_id, phase) WHERE is_active = 1",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            student_id TEXT NOT NULL,
            offering_id TEXT NOT NULL,
            minor1 REAL,
            minor2 REAL,
            mid REAL,
            end_sem REAL,
            submitted_by TEXT NOT NULL,
            stage TEXT NOT NULL CHECK(stage IN
                ('marks_open', 'marks_locked', 'computed', 'approved', 'published')),
            locked_by TEXT,
            locked_at TEXT,
            computed_grade TEXT,
            computed_by TEXT,
            computed_at TEXT,
            approved_by TEXT,
            approved_at TEXT,
            grade_point INTEGER,
            published_by TEXT,
            published_at TEXT,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(student_id, offering_id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_offering_stage
         ON grade_records(offering_id, stage)",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_grade_records_frozen_update
         BEFORE UPDATE ON grade_records
         WHEN OLD.stage = 'published'
         BEGIN
           SELECT RAISE(ABORT, 'grade record is frozen');
         END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_grade_records_frozen_delete
         BEFORE DELETE ON grade_records
         WHEN OLD.stage = 'published'
         BEGIN
           SELECT RAISE(ABORT, 'grade record is frozen');
         END",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_audit_log(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            at TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            action TEXT NOT NULL,
            offering_id TEXT,
            student_id TEXT,
            before_json TEXT,
            after_json TEXT,
            prev_hash TEXT NOT NULL,
            hash TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_audit_log_offering
         ON grade_audit_log(offering_id, student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_grade_audit_log_no_update
         BEFORE UPDATE ON grade_audit_log
         BEGIN
           SELECT RAISE(ABORT, 'audit log is append-only');
         END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_grade_audit_log_no_delete
         BEFORE DELETE ON grade_audit_log
         BEGIN
           SELECT RAISE(ABORT, 'audit log is append-only');
         END",
        [],
    )?;

    Ok(conn)
}

/// Takes SQLite's write lock up front so read-check-write sequences run
/// serialized against other connections to the same workspace.
pub fn begin_immediate(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}
