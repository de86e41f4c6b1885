use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

use crate::calc;
use crate::config::Settings;
use crate::db;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::security;

const BAD_CREDENTIALS: &str = "Could not validate credentials";

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Like `optional_str`, but a present non-string value is an error instead of absent.
pub fn optional_text(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            Ok((!t.is_empty()).then(|| t.to_string()))
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn optional_date(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<NaiveDate>, HandlerErr> {
    optional_text(params, key)?
        .map(|s| calc::parse_date(&s).map_err(HandlerErr::from))
        .transpose()
}

pub fn required_id(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => {
            Err(HandlerErr::bad_params(format!("missing {}", key)))
        }
        Some(v) => v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn optional_id(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(_) => required_id(params, key).map(Some),
    }
}

pub fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            tracing::debug!(method = %req.method, code = e.code, message = %e.message, "request failed");
            e.response(&req.id)
        }
    }
}

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub session_id: i64,
}

/// Everything an authenticated handler gets to work with.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub settings: &'a Settings,
    pub workspace: Option<&'a Path>,
    pub user: CurrentUser,
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn authenticate(
    conn: &Connection,
    settings: &Settings,
    token: Option<&str>,
) -> Result<CurrentUser, HandlerErr> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| HandlerErr::unauthorized(BAD_CREDENTIALS))?;
    let claims = security::decode_access_token(settings, token).map_err(|e| {
        tracing::debug!(error = %e, "token rejected");
        HandlerErr::unauthorized(BAD_CREDENTIALS)
    })?;
    let user = db::find_user_by_username(conn, &claims.sub)
        .map_err(HandlerErr::query)?
        .filter(|u| u.is_active)
        .ok_or_else(|| HandlerErr::unauthorized(BAD_CREDENTIALS))?;

    let session_id: i64 = conn
        .query_row(
            "SELECT id FROM sessions WHERE token_hash = ? AND user_id = ?",
            (security::token_fingerprint(token), user.id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::unauthorized(BAD_CREDENTIALS))?;

    conn.execute(
        "UPDATE sessions SET last_seen = ? WHERE id = ?",
        (db::now_rfc3339(), session_id),
    )
    .map_err(|e| HandlerErr::update("sessions", e))?;

    Ok(CurrentUser {
        id: user.id,
        username: user.username,
        email: user.email,
        is_active: user.is_active,
        session_id,
    })
}

/// Runs `f` for a request that needs an open workspace and a live session.
pub fn authed<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Ctx, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let result = db_conn(state).and_then(|conn| {
        let user = authenticate(conn, &state.settings, req.token.as_deref())?;
        let ctx = Ctx {
            conn,
            settings: &state.settings,
            workspace: state.workspace.as_deref(),
            user,
        };
        f(&ctx, &req.params)
    });
    respond(req, result)
}
