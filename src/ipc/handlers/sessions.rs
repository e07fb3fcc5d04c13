use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_i64, require_str};
use crate::ipc::types::{AppState, Request};
use crate::model::parse_date;
use crate::{rules, sessions};
use serde_json::json;

fn handle_sessions_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let date_raw = match require_str(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(date) = parse_date(date_raw) else {
        return err(
            &req.id,
            "bad_params",
            format!("unparseable date: {}", date_raw),
            None,
        );
    };
    let cds_code = match require_str(req, "cdsCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let curriculum_code = match require_str(req, "curriculumCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let academic_year = match require_i64(req, "academicYear") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let rules = match rules::load(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    match sessions::resolve(conn, &rules, date, cds_code, curriculum_code, academic_year) {
        Ok(Some(m)) => ok(&req.id, json!({ "found": true, "session": m.to_json() })),
        Ok(None) => ok(&req.id, json!({ "found": false, "session": null })),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.resolve" => Some(handle_sessions_resolve(state, req)),
        _ => None,
    }
}
