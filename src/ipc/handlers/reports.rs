use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;

use crate::calc;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{authed, optional_text, required_id, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::report::AttendanceReport;

use super::{attendance, students};

const REPORTS_DIR: &str = "reports";

fn build_report(ctx: &Ctx, params: &serde_json::Value) -> Result<AttendanceReport, HandlerErr> {
    // Range problems are reported before touching the student.
    let range = calc::validate_range(
        params.get("startDate").and_then(|v| v.as_str()),
        params.get("endDate").and_then(|v| v.as_str()),
    )?;
    let student_id = required_id(params, "studentId")?;
    let student = students::load_student(ctx.conn, &ctx.settings.age_key, student_id)?
        .ok_or_else(|| HandlerErr::not_found("Student not found"))?;
    let dates = attendance::dates_in_range(ctx.conn, student_id, &range)?;
    Ok(AttendanceReport {
        student_id,
        student_name: student.name,
        range,
        price_pence: student.price_pence,
        dates,
    })
}

fn reports_default_range(
    _ctx: &Ctx,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let range = calc::default_range(Utc::now().date_naive());
    Ok(json!({
        "startDate": calc::iso_date(range.start),
        "endDate": calc::iso_date(range.end),
    }))
}

fn reports_student_attendance(
    ctx: &Ctx,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    Ok(build_report(ctx, params)?.to_json()?)
}

fn reports_student_attendance_pdf(
    ctx: &Ctx,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let report = build_report(ctx, params)?;
    let file_name = report.file_name(Utc::now().date_naive());
    let out_path = match optional_text(params, "outPath")? {
        Some(p) => PathBuf::from(p),
        None => {
            let workspace = ctx
                .workspace
                .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
            workspace.join(REPORTS_DIR).join(&file_name)
        }
    };

    let bytes = report.render_pdf().map_err(|e| {
        tracing::error!(student_id = report.student_id, error = ?e, "pdf render failed");
        HandlerErr::new("report_failed", format!("{e:#}"))
    })?;
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string())
                .with_details(json!({ "path": parent.to_string_lossy() }))
        })?;
    }
    std::fs::write(&out_path, &bytes).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": out_path.to_string_lossy() }))
    })?;

    let total = report.total_fees()?;
    tracing::info!(
        student_id = report.student_id,
        classes = report.classes_attended(),
        path = %out_path.display(),
        "attendance report written"
    );
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "fileName": file_name,
        "bytes": bytes.len(),
        "classesAttended": report.classes_attended(),
        "totalFees": calc::format_price(total),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.defaultRange" => Some(authed(state, req, reports_default_range)),
        "reports.studentAttendance" => Some(authed(state, req, reports_student_attendance)),
        "reports.studentAttendancePdf" => {
            Some(authed(state, req, reports_student_attendance_pdf))
        }
        _ => None,
    }
}
