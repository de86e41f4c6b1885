use serde_json::json;

use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{self, authed, required_id, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, RosterView, SortDir, SortKey, SortState};

use super::students;

fn parse_sort(params: &serde_json::Value) -> Result<SortState, HandlerErr> {
    let mut sort = SortState::default();
    if let Some(raw) = params.get("sortKey").and_then(|v| v.as_str()) {
        sort.key = SortKey::parse(raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown sortKey: {}", raw)))?;
    }
    if let Some(raw) = params.get("sortDir").and_then(|v| v.as_str()) {
        sort.dir = SortDir::parse(raw)
            .ok_or_else(|| HandlerErr::bad_params("sortDir must be one of: asc, desc"))?;
    }
    Ok(sort)
}

fn load_view(ctx: &Ctx, sort: SortState) -> Result<RosterView, HandlerErr> {
    let rows = students::roster_rows(ctx.conn, &ctx.settings.age_key)?;
    Ok(RosterView::new(rows, sort))
}

fn view_json(view: &RosterView) -> serde_json::Value {
    json!({
        "sort": {
            "key": view.sort.key.as_str(),
            "dir": view.sort.dir.as_str(),
        },
        "indicators": view.indicators(),
        "count": view.len(),
        "rows": view.sorted(),
        "html": view.render(),
    })
}

fn roster_open(ctx: &Ctx, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let toggle = match params.get("toggleKey").and_then(|v| v.as_str()) {
        Some(raw) => Some(
            SortKey::parse(raw)
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown toggleKey: {}", raw)))?,
        ),
        None => None,
    };
    let mut view = load_view(ctx, parse_sort(params)?)?;
    if let Some(key) = toggle {
        view.click_header(key);
    }
    Ok(view_json(&view))
}

fn roster_delete_student(
    ctx: &Ctx,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_id(params, "studentId")?;
    let mut view = load_view(ctx, parse_sort(params)?)?;
    if !students::delete_student(ctx.conn, student_id)? {
        return Err(HandlerErr::not_found("Student not found"));
    }
    view.remove(student_id);
    let mut out = view_json(&view);
    out["deletedStudentId"] = json!(student_id);
    Ok(out)
}

fn handle_load_error(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let unauthorized = req
        .params
        .get("unauthorized")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    helpers::respond(
        req,
        Ok(json!({ "html": roster::render_load_error(unauthorized) })),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.open" => Some(authed(state, req, roster_open)),
        "roster.deleteStudent" => Some(authed(state, req, roster_delete_student)),
        "roster.loadError" => Some(handle_load_error(state, req)),
        _ => None,
    }
}
