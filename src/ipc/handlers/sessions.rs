use rusqlite::OptionalExtension;
use serde_json::json;

use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{authed, required_id, Ctx};
use crate::ipc::types::{AppState, Request};

fn sessions_list(ctx: &Ctx, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = ctx
        .conn
        .prepare(
            "SELECT id, device_name, ip_address, user_agent, created_at, last_seen
             FROM sessions
             WHERE user_id = ?
             ORDER BY last_seen DESC, id DESC",
        )
        .map_err(HandlerErr::query)?;
    let sessions = stmt
        .query_map([ctx.user.id], |r| {
            let id: i64 = r.get(0)?;
            Ok(json!({
                "id": id,
                "userId": ctx.user.id,
                "deviceName": r.get::<_, String>(1)?,
                "ipAddress": r.get::<_, Option<String>>(2)?,
                "userAgent": r.get::<_, Option<String>>(3)?,
                "createdAt": r.get::<_, String>(4)?,
                "lastSeen": r.get::<_, String>(5)?,
                "current": id == ctx.user.session_id,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "sessions": sessions }))
}

fn sessions_revoke(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = required_id(params, "sessionId")?;
    let owned = ctx
        .conn
        .query_row(
            "SELECT 1 FROM sessions WHERE id = ? AND user_id = ?",
            (session_id, ctx.user.id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .is_some();
    if !owned {
        return Err(HandlerErr::not_found("Session not found"));
    }
    ctx.conn
        .execute("DELETE FROM sessions WHERE id = ?", [session_id])
        .map_err(|e| HandlerErr::update("sessions", e))?;
    tracing::info!(user = %ctx.user.username, session_id, "session revoked");
    Ok(json!({ "revoked": true, "sessionId": session_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(authed(state, req, sessions_list)),
        "sessions.revoke" => Some(authed(state, req, sessions_revoke)),
        _ => None,
    }
}
