use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde_json::json;

use crate::config::Settings;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{self, authed, optional_str, required_str, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::security;

const BAD_LOGIN: &str = "Incorrect username or password";
const TOO_MANY_DEVICES: &str =
    "Maximum number of devices reached. Please logout from another device.";
const UNKNOWN_DEVICE: &str = "Unknown Device";

fn stale_cutoff(settings: &Settings) -> String {
    (Utc::now() - Duration::minutes(settings.session_cleanup_minutes))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn auth_login(
    conn: &Connection,
    settings: &Settings,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(params, "username")?;
    let password = required_str(params, "password")?;

    let user = db::find_user_by_username(conn, username.trim())
        .map_err(HandlerErr::query)?
        .filter(|u| security::verify_password(&password, &u.password_hash));
    let Some(user) = user else {
        tracing::info!(username = %username.trim(), "login rejected");
        return Err(HandlerErr::unauthorized(BAD_LOGIN));
    };
    if !user.is_active {
        return Err(HandlerErr::unauthorized("Inactive user"));
    }

    let cutoff = stale_cutoff(settings);
    let purged = conn
        .execute(
            "DELETE FROM sessions WHERE user_id = ? AND last_seen <= ?",
            (user.id, &cutoff),
        )
        .map_err(|e| HandlerErr::update("sessions", e))?;
    if purged > 0 {
        tracing::debug!(user = %user.username, purged, "stale sessions removed");
    }

    let active: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sessions WHERE user_id = ? AND last_seen > ?",
            (user.id, &cutoff),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    if active >= settings.max_devices_per_user {
        return Err(HandlerErr::new("too_many_devices", TOO_MANY_DEVICES).with_details(json!({
            "activeSessions": active,
            "maxDevices": settings.max_devices_per_user,
        })));
    }

    let issued = security::create_access_token(settings, &user.username)
        .map_err(|e| HandlerErr::new("unauthorized", e.to_string()))?;

    let user_agent = optional_str(params, "userAgent");
    let device_name = optional_str(params, "deviceName")
        .or_else(|| user_agent.clone())
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO sessions(user_id, device_name, token_hash, ip_address, user_agent, created_at, last_seen)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            user.id,
            &device_name,
            security::token_fingerprint(&issued.token),
            optional_str(params, "ipAddress"),
            &user_agent,
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::update("sessions", e))?;
    let session_id = conn.last_insert_rowid();

    tracing::info!(user = %user.username, session_id, device = %device_name, "login");
    Ok(json!({
        "accessToken": issued.token,
        "tokenType": "bearer",
        "expiresAt": issued.expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "sessionId": session_id,
    }))
}

fn handle_auth_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = helpers::db_conn(state)
        .and_then(|conn| auth_login(conn, &state.settings, &req.params));
    helpers::respond(req, result)
}

fn handle_auth_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = helpers::db_conn(state).and_then(|conn| {
        let Some(token) = req.token.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(json!({ "loggedOut": false }));
        };
        let removed = conn
            .execute(
                "DELETE FROM sessions WHERE token_hash = ?",
                [security::token_fingerprint(token.trim())],
            )
            .map_err(|e| HandlerErr::update("sessions", e))?;
        if removed > 0 {
            tracing::info!("logout");
        }
        Ok(json!({ "loggedOut": removed > 0 }))
    });
    helpers::respond(req, result)
}

fn auth_me(ctx: &Ctx, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "id": ctx.user.id,
        "username": ctx.user.username,
        "email": ctx.user.email,
        "isActive": ctx.user.is_active,
        "sessionId": ctx.user.session_id,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_auth_login(state, req)),
        "auth.logout" => Some(handle_auth_logout(state, req)),
        "auth.me" => Some(authed(state, req, auth_me)),
        _ => None,
    }
}
