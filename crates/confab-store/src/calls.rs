//! Call log persistence.
//!
//! Only terminal call sessions are written here; the live lifecycle is owned
//! entirely by the call coordinator.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use confab_shared::{CallActor, CallId, CallState, CallType, UserId};

use crate::error::Result;
use crate::models::CallRecord;
use crate::tx::StoreCtx;

impl<'a> StoreCtx<'a> {
    pub fn insert_call_record(&self, record: &CallRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO calls (id, caller_id, receiver_id, call_type, outcome, ended_by,
                 duration_secs, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.caller_id.to_string(),
                record.receiver_id.to_string(),
                record.call_type.as_str(),
                record.outcome.as_str(),
                record.ended_by.map(|a| a.as_str()),
                record.duration_secs,
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Call history involving the user, most recent first.
    pub fn calls_for_user(&self, user: UserId) -> Result<Vec<CallRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, caller_id, receiver_id, call_type, outcome, ended_by,
                    duration_secs, started_at, ended_at
             FROM calls
             WHERE caller_id = ?1 OR receiver_id = ?1
             ORDER BY started_at DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], row_to_call_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn bad_column(idx: usize, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("invalid {what}").into(),
    )
}

fn row_to_call_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallRecord> {
    let id_str: String = row.get(0)?;
    let caller_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let type_str: String = row.get(3)?;
    let outcome_str: String = row.get(4)?;
    let ended_by_str: Option<String> = row.get(5)?;
    let duration_secs: u32 = row.get(6)?;
    let started_str: String = row.get(7)?;
    let ended_str: String = row.get(8)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let caller_id = Uuid::parse_str(&caller_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = Uuid::parse_str(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let call_type = CallType::parse(&type_str).ok_or_else(|| bad_column(3, "call type"))?;
    let outcome = CallState::parse(&outcome_str)
        .filter(CallState::is_terminal)
        .ok_or_else(|| bad_column(4, "call outcome"))?;
    let ended_by = match ended_by_str {
        Some(s) => Some(CallActor::parse(&s).ok_or_else(|| bad_column(5, "call actor"))?),
        None => None,
    };

    let started_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&started_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let ended_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ended_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CallRecord {
        id: CallId(id),
        caller_id: UserId(caller_id),
        receiver_id: UserId(receiver_id),
        call_type,
        outcome,
        ended_by,
        duration_secs,
        started_at,
        ended_at,
    })
}
