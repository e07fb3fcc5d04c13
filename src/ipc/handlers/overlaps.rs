use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::{overlap, rules};

fn handle_overlaps_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let rules = match rules::load(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    match overlap::recompute_all(conn, &rules) {
        Ok(report) => ok(&req.id, report.to_json()),
        Err(e) => err(&req.id, "db_update_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "overlaps.recompute" => Some(handle_overlaps_recompute(state, req)),
        _ => None,
    }
}
