//! Append-only audit trail of state-changing actions.
//!
//! Each entry is chained to its predecessor by SHA-256 over a
//! length-prefixed encoding of its fields, so `verify_chain` detects rows
//! edited or removed behind the storage triggers' back.

use crate::error::{WorkflowError, WorkflowResult};
use crate::store::{format_ts, parse_ts};
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub actor_id: &'a str,
    pub action: &'a str,
    pub offering_id: Option<&'a str>,
    pub student_id: Option<&'a str>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub seq: i64,
    pub id: String,
    pub at: String,
    pub actor_id: String,
    pub action: String,
    pub offering_id: Option<String>,
    pub student_id: Option<String>,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub entries: i64,
    pub intact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_broken_seq: Option<i64>,
}

struct HashInput<'a> {
    prev_hash: &'a str,
    id: &'a str,
    at: &'a str,
    actor_id: &'a str,
    action: &'a str,
    offering_id: Option<&'a str>,
    student_id: Option<&'a str>,
    before_json: Option<&'a str>,
    after_json: Option<&'a str>,
}

fn entry_hash(input: &HashInput<'_>) -> String {
    let mut hasher = Sha256::new();
    let mut field = |v: Option<&str>| match v {
        Some(s) => {
            hasher.update([1u8]);
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        None => hasher.update([0u8]),
    };
    field(Some(input.prev_hash));
    field(Some(input.id));
    field(Some(input.at));
    field(Some(input.actor_id));
    field(Some(input.action));
    field(input.offering_id);
    field(input.student_id);
    field(input.before_json);
    field(input.after_json);
    format!("{:x}", hasher.finalize())
}

/// Must run inside the transaction that performs the audited change.
pub fn append(conn: &Connection, entry: NewEntry<'_>) -> WorkflowResult<String> {
    let prev_hash: String = conn
        .query_row(
            "SELECT hash FROM grade_audit_log ORDER BY seq DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?
        .unwrap_or_else(|| GENESIS_HASH.to_string());

    let id = Uuid::new_v4().to_string();
    let at = format_ts(entry.at);
    let before_json = entry.before.as_ref().map(|v| v.to_string());
    let after_json = entry.after.as_ref().map(|v| v.to_string());
    let hash = entry_hash(&HashInput {
        prev_hash: &prev_hash,
        id: &id,
        at: &at,
        actor_id: entry.actor_id,
        action: entry.action,
        offering_id: entry.offering_id,
        student_id: entry.student_id,
        before_json: before_json.as_deref(),
        after_json: after_json.as_deref(),
    });

    conn.execute(
        "INSERT INTO grade_audit_log(
            id, at, actor_id, action, offering_id, student_id,
            before_json, after_json, prev_hash, hash
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &at,
            entry.actor_id,
            entry.action,
            entry.offering_id,
            entry.student_id,
            &before_json,
            &after_json,
            &prev_hash,
            &hash,
        ),
    )
    .map_err(WorkflowError::Write)?;
    Ok(id)
}

fn parse_json_col(raw: Option<String>) -> WorkflowResult<Option<serde_json::Value>> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| WorkflowError::Corrupt(format!("audit json: {}", e)))
    })
    .transpose()
}

pub fn list(
    conn: &Connection,
    offering_id: &str,
    student_id: Option<&str>,
) -> WorkflowResult<Vec<AuditEntry>> {
    let mut sql = String::from(
        "SELECT seq, id, at, actor_id, action, offering_id, student_id,
                before_json, after_json, hash
         FROM grade_audit_log
         WHERE offering_id = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(offering_id.to_string())];
    if let Some(sid) = student_id {
        sql.push_str(" AND student_id = ?");
        binds.push(Value::Text(sid.to_string()));
    }
    sql.push_str(" ORDER BY seq");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
                r.get::<_, Option<String>>(7)?,
                r.get::<_, Option<String>>(8)?,
                r.get::<_, String>(9)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(seq, id, at, actor_id, action, offering_id, student_id, before, after, hash)| {
                Ok(AuditEntry {
                    seq,
                    id,
                    at,
                    actor_id,
                    action,
                    offering_id,
                    student_id,
                    before: parse_json_col(before)?,
                    after: parse_json_col(after)?,
                    hash,
                })
            },
        )
        .collect()
}

/// Walks the whole log in sequence order and recomputes every link.
pub fn verify_chain(conn: &Connection) -> WorkflowResult<ChainReport> {
    let mut stmt = conn.prepare(
        "SELECT seq, id, at, actor_id, action, offering_id, student_id,
                before_json, after_json, prev_hash, hash
         FROM grade_audit_log
         ORDER BY seq",
    )?;
    let mut rows = stmt.query([])?;

    let mut expected_prev = GENESIS_HASH.to_string();
    let mut entries: i64 = 0;
    let mut first_broken_seq: Option<i64> = None;

    while let Some(r) = rows.next()? {
        entries += 1;
        let seq: i64 = r.get(0)?;
        let id: String = r.get(1)?;
        let at: String = r.get(2)?;
        let actor_id: String = r.get(3)?;
        let action: String = r.get(4)?;
        let offering_id: Option<String> = r.get(5)?;
        let student_id: Option<String> = r.get(6)?;
        let before_json: Option<String> = r.get(7)?;
        let after_json: Option<String> = r.get(8)?;
        let prev_hash: String = r.get(9)?;
        let hash: String = r.get(10)?;

        if first_broken_seq.is_some() {
            continue;
        }
        let recomputed = entry_hash(&HashInput {
            prev_hash: &prev_hash,
            id: &id,
            at: &at,
            actor_id: &actor_id,
            action: &action,
            offering_id: offering_id.as_deref(),
            student_id: student_id.as_deref(),
            before_json: before_json.as_deref(),
            after_json: after_json.as_deref(),
        });
        if prev_hash != expected_prev || recomputed != hash {
            first_broken_seq = Some(seq);
        }
        expected_prev = hash;
    }

    Ok(ChainReport {
        entries,
        intact: first_broken_seq.is_none(),
        first_broken_seq,
    })
}

/// Timestamp of the newest entry, if any.
pub fn last_entry_at(conn: &Connection) -> WorkflowResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT at FROM grade_audit_log ORDER BY seq DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?;
    raw.map(|s| parse_ts(&s)).transpose()
}
