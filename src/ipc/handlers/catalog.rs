//! Master data fed in by the import collaborators: courses, offerings, teaching
//! assignments, rooms and session windows. Every bulk call reports per-row
//! diagnostics instead of dropping bad rows silently.

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_i64, row_error};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_date, MasterRef, Room, Semester, Session, SessionKind};
use crate::store::{self, OfferingInput};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

const CATALOG_MAX_ROWS: usize = 10_000;

struct RowErr {
    code: &'static str,
    message: String,
}

impl RowErr {
    fn bad(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found",
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for RowErr {
    fn from(e: anyhow::Error) -> Self {
        Self {
            code: "db_update_failed",
            message: format!("{e:#}"),
        }
    }
}

fn non_empty(v: &str, key: &str) -> Result<String, RowErr> {
    let t = v.trim();
    if t.is_empty() {
        return Err(RowErr::bad(format!("{} must not be empty", key)));
    }
    Ok(t.to_string())
}

fn course_id_for(conn: &Connection, code: &str) -> Result<String, RowErr> {
    store::find_course_by_code(conn, code.trim())?
        .map(|c| c.id)
        .ok_or_else(|| RowErr::not_found(format!("unknown course {}", code)))
}

/// Applies `apply` to every row of `params[key]` inside one transaction.
fn bulk_apply<T, F>(state: &mut AppState, req: &Request, key: &str, mut apply: F) -> serde_json::Value
where
    T: DeserializeOwned,
    F: FnMut(&Connection, T) -> Result<(), RowErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(rows) = req.params.get(key).and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", format!("missing {}[]", key), None);
    };
    if rows.len() > CATALOG_MAX_ROWS {
        return err(
            &req.id,
            "bad_params",
            format!("too many rows: {} > {}", rows.len(), CATALOG_MAX_ROWS),
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut upserted: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (i, raw) in rows.iter().enumerate() {
        let row: T = match serde_json::from_value(raw.clone()) {
            Ok(v) => v,
            Err(e) => {
                errors.push(row_error(i, "bad_params", e.to_string()));
                continue;
            }
        };
        match apply(&*tx, row) {
            Ok(()) => upserted += 1,
            Err(e) => errors.push(row_error(i, e.code, e.message)),
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    tracing::info!("{}: {} upserted, {} rejected", req.method, upserted, errors.len());

    ok(
        &req.id,
        json!({
            "ok": true,
            "upserted": upserted,
            "rejected": errors.len(),
            "errors": errors,
        }),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseRow {
    code: String,
    title: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferingRow {
    course_code: String,
    cds_code: String,
    curriculum_code: String,
    academic_year: i64,
    year_of_study: i64,
    semester: i64,
    master: Option<MasterRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentRow {
    course_code: String,
    teacher: String,
    academic_year: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomRow {
    code: String,
    name: Option<String>,
    capacity: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRow {
    cds_code: String,
    curriculum_code: String,
    academic_year: i64,
    kind: String,
    start_date: String,
    end_date: String,
}

fn handle_courses_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    bulk_apply(state, req, "courses", |conn, row: CourseRow| {
        let code = non_empty(&row.code, "code")?;
        let title = non_empty(&row.title, "title")?;
        store::upsert_course(conn, &code, &title)?;
        Ok(())
    })
}

fn handle_offerings_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    bulk_apply(state, req, "offerings", |conn, row: OfferingRow| {
        let course_id = course_id_for(conn, &row.course_code)?;
        let semester = Semester::from_i64(row.semester)
            .ok_or_else(|| RowErr::bad("semester must be 1, 2 or 3"))?;
        if row.year_of_study < 1 {
            return Err(RowErr::bad("yearOfStudy must be >= 1"));
        }
        let cds_code = non_empty(&row.cds_code, "cdsCode")?;
        let curriculum_code = non_empty(&row.curriculum_code, "curriculumCode")?;
        store::upsert_offering(
            conn,
            &OfferingInput {
                course_id: &course_id,
                cds_code: &cds_code,
                curriculum_code: &curriculum_code,
                academic_year: row.academic_year,
                year_of_study: row.year_of_study,
                semester,
                master: row.master.as_ref(),
            },
        )?;
        Ok(())
    })
}

fn handle_teaching_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    bulk_apply(state, req, "assignments", |conn, row: AssignmentRow| {
        let course_id = course_id_for(conn, &row.course_code)?;
        let teacher = non_empty(&row.teacher, "teacher")?;
        store::assign_teacher(conn, &course_id, &teacher, row.academic_year)?;
        Ok(())
    })
}

fn handle_rooms_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    bulk_apply(state, req, "rooms", |conn, row: RoomRow| {
        let code = non_empty(&row.code, "code")?;
        let capacity = row.capacity.unwrap_or(0);
        if capacity < 0 {
            return Err(RowErr::bad("capacity must be >= 0"));
        }
        store::upsert_room(
            conn,
            &Room {
                name: row.name.unwrap_or_else(|| code.clone()),
                code,
                capacity,
            },
        )?;
        Ok(())
    })
}

fn handle_sessions_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    bulk_apply(state, req, "sessions", |conn, row: SessionRow| {
        let kind = SessionKind::parse(&row.kind).ok_or_else(|| {
            RowErr::bad("kind must be one of: anticipata, estiva, autunnale, invernale")
        })?;
        let start = parse_date(&row.start_date)
            .ok_or_else(|| RowErr::bad(format!("unparseable startDate: {}", row.start_date)))?;
        let end = parse_date(&row.end_date)
            .ok_or_else(|| RowErr::bad(format!("unparseable endDate: {}", row.end_date)))?;
        if start > end {
            return Err(RowErr::bad("startDate must not be after endDate"));
        }
        store::upsert_session(
            conn,
            &Session {
                cds_code: non_empty(&row.cds_code, "cdsCode")?,
                curriculum_code: non_empty(&row.curriculum_code, "curriculumCode")?,
                academic_year: row.academic_year,
                kind,
                start,
                end,
            },
        )?;
        Ok(())
    })
}

fn handle_offerings_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "offerings": [] }));
    };
    match store::list_offerings(conn, param_i64(req, "academicYear")) {
        Ok(rows) => ok(
            &req.id,
            json!({ "offerings": rows.iter().map(|o| o.to_json()).collect::<Vec<_>>() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.courses.upsert" => Some(handle_courses_upsert(state, req)),
        "catalog.offerings.upsert" => Some(handle_offerings_upsert(state, req)),
        "catalog.offerings.list" => Some(handle_offerings_list(state, req)),
        "catalog.teaching.assign" => Some(handle_teaching_assign(state, req)),
        "catalog.rooms.upsert" => Some(handle_rooms_upsert(state, req)),
        "catalog.sessions.upsert" => Some(handle_sessions_upsert(state, req)),
        _ => None,
    }
}
