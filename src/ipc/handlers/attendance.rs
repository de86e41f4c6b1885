use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;

use crate::calc::{self, DateRange};
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{authed, optional_date, optional_id, required_id, required_str, Ctx};
use crate::ipc::types::{AppState, Request};

use super::students;

fn record_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, i64>(0)?,
        "studentId": r.get::<_, i64>(1)?,
        "date": r.get::<_, String>(2)?,
        "markedByUserId": r.get::<_, i64>(3)?,
        "createdAt": r.get::<_, String>(4)?,
    }))
}

/// Dates marked for a student inside `range` (inclusive), newest first.
pub fn dates_in_range(
    conn: &Connection,
    student_id: i64,
    range: &DateRange,
) -> Result<Vec<NaiveDate>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT date
             FROM attendance
             WHERE student_id = ? AND date >= ? AND date <= ?
             ORDER BY date DESC",
        )
        .map_err(HandlerErr::query)?;
    let raw = stmt
        .query_map(
            (
                student_id,
                calc::iso_date(range.start),
                calc::iso_date(range.end),
            ),
            |r| r.get::<_, String>(0),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    raw.iter()
        .map(|s| calc::parse_date(s).map_err(HandlerErr::from))
        .collect()
}

fn attendance_mark(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_id(params, "studentId")?;
    let date = calc::parse_date(&required_str(params, "date")?)?;
    let date_key = calc::iso_date(date);

    if !students::student_exists(ctx.conn, student_id)? {
        return Err(HandlerErr::not_found("Student not found"));
    }
    let existing = ctx
        .conn
        .query_row(
            "SELECT id FROM attendance WHERE student_id = ? AND date = ?",
            (student_id, &date_key),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if let Some(existing_id) = existing {
        return Err(HandlerErr::new(
            "already_marked",
            "Attendance already marked for this student on this date",
        )
        .with_details(json!({ "attendanceId": existing_id })));
    }

    ctx.conn
        .execute(
            "INSERT INTO attendance(student_id, date, marked_by_user_id, created_at)
             VALUES(?, ?, ?, ?)",
            (student_id, &date_key, ctx.user.id, db::now_rfc3339()),
        )
        .map_err(|e| HandlerErr::update("attendance", e))?;
    let id = ctx.conn.last_insert_rowid();
    tracing::debug!(student_id, date = %date_key, attendance_id = id, "attendance marked");

    ctx.conn
        .query_row(
            "SELECT id, student_id, date, marked_by_user_id, created_at FROM attendance WHERE id = ?",
            [id],
            record_json,
        )
        .map_err(HandlerErr::query)
}

fn attendance_list(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = optional_id(params, "studentId")?;
    let start = optional_date(params, "startDate")?;
    let end = optional_date(params, "endDate")?;
    if let (Some(s), Some(e)) = (start, end) {
        if e < s {
            return Err(HandlerErr::bad_params(calc::MSG_RANGE_REVERSED));
        }
    }

    let mut sql = String::from(
        "SELECT id, student_id, date, marked_by_user_id, created_at FROM attendance WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(id) = student_id {
        sql.push_str(" AND student_id = ?");
        binds.push(Value::Integer(id));
    }
    if let Some(s) = start {
        sql.push_str(" AND date >= ?");
        binds.push(Value::Text(calc::iso_date(s)));
    }
    if let Some(e) = end {
        sql.push_str(" AND date <= ?");
        binds.push(Value::Text(calc::iso_date(e)));
    }
    sql.push_str(" ORDER BY date DESC, id DESC");

    let mut stmt = ctx.conn.prepare(&sql).map_err(HandlerErr::query)?;
    let records = stmt
        .query_map(params_from_iter(binds), record_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "attendance": records }))
}

fn attendance_delete(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = required_id(params, "attendanceId")?;
    let removed = ctx
        .conn
        .execute("DELETE FROM attendance WHERE id = ?", [attendance_id])
        .map_err(|e| HandlerErr::update("attendance", e))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("Attendance record not found"));
    }
    Ok(json!({ "deleted": true, "attendanceId": attendance_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(authed(state, req, attendance_mark)),
        "attendance.list" => Some(authed(state, req, attendance_list)),
        "attendance.delete" => Some(authed(state, req, attendance_delete)),
        _ => None,
    }
}
