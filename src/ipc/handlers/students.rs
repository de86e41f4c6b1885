use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::calc;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{authed, required_id, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::roster::StudentRow;
use crate::security;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;
const MAX_AGE: i64 = 150;

#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub level: String,
    pub price_pence: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl StudentRecord {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "age": self.age,
            "level": self.level,
            "pricePerClass": calc::format_price(self.price_pence),
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

struct StoredStudent {
    id: i64,
    name: String,
    age_ciphertext: Vec<u8>,
    level: String,
    price_pence: i64,
    created_at: String,
    updated_at: Option<String>,
}

const SELECT_STUDENT: &str = "SELECT id, name, age_ciphertext, level, price_pence, created_at, updated_at
     FROM students";

fn read_stored(r: &rusqlite::Row<'_>) -> rusqlite::Result<StoredStudent> {
    Ok(StoredStudent {
        id: r.get(0)?,
        name: r.get(1)?,
        age_ciphertext: r.get(2)?,
        level: r.get(3)?,
        price_pence: r.get(4)?,
        created_at: r.get(5)?,
        updated_at: r.get(6)?,
    })
}

fn decrypt(key: &[u8; 32], s: StoredStudent) -> Result<StudentRecord, HandlerErr> {
    let age = security::decrypt_age(key, &s.age_ciphertext).map_err(|e| {
        HandlerErr::new("db_query_failed", format!("student {}: {}", s.id, e))
    })?;
    Ok(StudentRecord {
        id: s.id,
        name: s.name,
        age,
        level: s.level,
        price_pence: s.price_pence,
        created_at: s.created_at,
        updated_at: s.updated_at,
    })
}

pub fn load_student(
    conn: &Connection,
    key: &[u8; 32],
    student_id: i64,
) -> Result<Option<StudentRecord>, HandlerErr> {
    let stored = conn
        .query_row(
            &format!("{} WHERE id = ?", SELECT_STUDENT),
            [student_id],
            read_stored,
        )
        .optional()
        .map_err(HandlerErr::query)?;
    stored.map(|s| decrypt(key, s)).transpose()
}

pub fn student_exists(conn: &Connection, student_id: i64) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

/// All students in list order; rows whose age cannot be read show it blank.
pub fn roster_rows(conn: &Connection, key: &[u8; 32]) -> Result<Vec<StudentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY name, id", SELECT_STUDENT))
        .map_err(HandlerErr::query)?;
    let stored = stmt
        .query_map([], read_stored)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(stored
        .into_iter()
        .map(|s| StudentRow {
            id: s.id,
            age: security::decrypt_age(key, &s.age_ciphertext).ok(),
            name: s.name,
            level: s.level,
            price_pence: s.price_pence,
        })
        .collect())
}

/// Deletes the student and its attendance marks; false if there was no such student.
pub fn delete_student(conn: &Connection, student_id: i64) -> Result<bool, HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let marks = tx
        .execute("DELETE FROM attendance WHERE student_id = ?", [student_id])
        .map_err(|e| HandlerErr::update("attendance", e))?;
    let removed = tx
        .execute("DELETE FROM students WHERE id = ?", [student_id])
        .map_err(|e| HandlerErr::update("students", e))?;
    if removed == 0 {
        return Ok(false);
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(student_id, attendance_removed = marks, "student deleted");
    Ok(true)
}

fn parse_text(v: Option<&serde_json::Value>, key: &str) -> Result<String, HandlerErr> {
    let s = v
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key)))?
        .trim()
        .to_string();
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

fn parse_age(v: Option<&serde_json::Value>) -> Result<i64, HandlerErr> {
    let age = v
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("age must be an integer"))?;
    if !(0..=MAX_AGE).contains(&age) {
        return Err(HandlerErr::bad_params(format!(
            "age must be between 0 and {}",
            MAX_AGE
        )));
    }
    Ok(age)
}

fn parse_price(v: Option<&serde_json::Value>) -> Result<i64, HandlerErr> {
    let v = v.ok_or_else(|| HandlerErr::bad_params("missing pricePerClass"))?;
    Ok(calc::parse_price(v)?)
}

fn encrypt(ctx: &Ctx, age: i64) -> Result<Vec<u8>, HandlerErr> {
    security::encrypt_age(&ctx.settings.age_key, age)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))
}

fn students_list(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let skip = params.get("skip").and_then(|v| v.as_i64()).unwrap_or(0);
    let limit = params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_LIMIT);
    if skip < 0 || limit < 0 {
        return Err(HandlerErr::bad_params("skip and limit must be non-negative"));
    }
    let limit = limit.min(MAX_LIMIT);

    let mut stmt = ctx
        .conn
        .prepare(&format!(
            "{} ORDER BY name, id LIMIT ? OFFSET ?",
            SELECT_STUDENT
        ))
        .map_err(HandlerErr::query)?;
    let stored = stmt
        .query_map((limit, skip), read_stored)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let students = stored
        .into_iter()
        .map(|s| decrypt(&ctx.settings.age_key, s).map(|r| r.to_json()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_get(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_id(params, "studentId")?;
    load_student(ctx.conn, &ctx.settings.age_key, student_id)?
        .map(|s| s.to_json())
        .ok_or_else(|| HandlerErr::not_found("Student not found"))
}

fn students_create(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = parse_text(params.get("name"), "name")?;
    let level = parse_text(params.get("level"), "level")?;
    let age = parse_age(params.get("age"))?;
    let price_pence = parse_price(params.get("pricePerClass"))?;

    ctx.conn
        .execute(
            "INSERT INTO students(name, age_ciphertext, level, price_pence, created_at)
             VALUES(?, ?, ?, ?, ?)",
            (&name, encrypt(ctx, age)?, &level, price_pence, db::now_rfc3339()),
        )
        .map_err(|e| HandlerErr::update("students", e))?;
    let student_id = ctx.conn.last_insert_rowid();
    tracing::info!(student_id, by = %ctx.user.username, "student created");

    load_student(ctx.conn, &ctx.settings.age_key, student_id)?
        .map(|s| s.to_json())
        .ok_or_else(|| HandlerErr::not_found("Student not found"))
}

fn students_update(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_id(params, "studentId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let Some(mut student) = load_student(ctx.conn, &ctx.settings.age_key, student_id)? else {
        return Err(HandlerErr::not_found("Student not found"));
    };

    let present = |k: &str| patch.get(k).filter(|v| !v.is_null());
    if let Some(v) = present("name") {
        student.name = parse_text(Some(v), "name")?;
    }
    if let Some(v) = present("level") {
        student.level = parse_text(Some(v), "level")?;
    }
    if let Some(v) = present("pricePerClass") {
        student.price_pence = parse_price(Some(v))?;
    }
    let new_age = present("age").map(|v| parse_age(Some(v))).transpose()?;
    if let Some(age) = new_age {
        student.age = age;
    }

    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE students SET name = ?, level = ?, price_pence = ?, updated_at = ? WHERE id = ?",
        (
            &student.name,
            &student.level,
            student.price_pence,
            db::now_rfc3339(),
            student_id,
        ),
    )
    .map_err(|e| HandlerErr::update("students", e))?;
    if let Some(age) = new_age {
        tx.execute(
            "UPDATE students SET age_ciphertext = ? WHERE id = ?",
            (encrypt(ctx, age)?, student_id),
        )
        .map_err(|e| HandlerErr::update("students", e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    load_student(ctx.conn, &ctx.settings.age_key, student_id)?
        .map(|s| s.to_json())
        .ok_or_else(|| HandlerErr::not_found("Student not found"))
}

fn students_delete(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_id(params, "studentId")?;
    if !delete_student(ctx.conn, student_id)? {
        return Err(HandlerErr::not_found("Student not found"));
    }
    Ok(json!({ "deleted": true, "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(authed(state, req, students_list)),
        "students.get" => Some(authed(state, req, students_get)),
        "students.create" => Some(authed(state, req, students_create)),
        "students.update" => Some(authed(state, req, students_update)),
        "students.delete" => Some(authed(state, req, students_delete)),
        _ => None,
    }
}
