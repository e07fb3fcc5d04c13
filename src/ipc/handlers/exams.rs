use crate::error::ScheduleError;
use crate::insert::{self, BatchInsert};
use crate::ipc::error::{err, ok, schedule_err};
use crate::ipc::helpers::{param_i64, param_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{Submission, SubmissionInput};
use crate::rules::{self, SchedulingRules};
use crate::store;
use crate::validate::{self, Validation};
use rusqlite::{Connection, TransactionBehavior};
use serde_json::json;
use uuid::Uuid;

fn submission_input(req: &Request) -> Result<SubmissionInput, ScheduleError> {
    let Some(raw) = req.params.get("submission") else {
        return Err(ScheduleError::malformed("missing params.submission"));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| ScheduleError::malformed(format!("invalid submission: {}", e)))
}

fn run_pipeline(
    conn: &Connection,
    rules: &SchedulingRules,
    req: &Request,
    submission_id: &str,
) -> Result<(Submission, Validation), ScheduleError> {
    let input = submission_input(req)?;
    let submission = validate::parse_submission(rules, &input, submission_id)?;
    let outcome = if submission.bypass_validation {
        validate::accept_all(conn, rules, &submission)?
    } else {
        validate::validate(conn, rules, &submission)?
    };
    Ok((submission, outcome))
}

fn validation_json(v: &Validation) -> (Vec<serde_json::Value>, Vec<serde_json::Value>) {
    (
        v.accepted.iter().map(|c| c.to_json()).collect(),
        v.rejected.iter().map(|r| r.to_json()).collect(),
    )
}

fn overall_status(v: &Validation, batch: &BatchInsert) -> &'static str {
    let troubled = !v.rejected.is_empty() || !batch.failures.is_empty();
    match (batch.inserted.is_empty(), troubled) {
        (true, false) => "empty",
        (true, true) => "failed",
        (false, false) => "complete",
        (false, true) => "partial",
    }
}

/// Dry run: the pipeline verdict without touching the store.
fn handle_exams_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let rules = match rules::load(conn) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };
    match run_pipeline(conn, &rules, req, "dry-run") {
        Ok((_, outcome)) => {
            let (accepted, rejected) = validation_json(&outcome);
            ok(
                &req.id,
                json!({
                    "accepted": accepted,
                    "rejected": rejected,
                }),
            )
        }
        Err(e) => schedule_err(&req.id, &e),
    }
}

/// Validates and inserts under one IMMEDIATE transaction: the write lock is held
/// from the first read to the commit.
fn handle_exams_propose(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let rules = match rules::load(&tx) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
    };

    let submission_id = Uuid::new_v4().to_string();
    let (submission, outcome) = match run_pipeline(&tx, &rules, req, &submission_id) {
        Ok(v) => v,
        Err(e) => {
            tracing::info!("submission {} refused: {}", submission_id, e);
            return schedule_err(&req.id, &e);
        }
    };

    let batch = match insert::insert(tx, &rules, &submission.common, &outcome.accepted) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "db_commit_failed", format!("{e:#}"), None),
    };

    let (accepted, rejected) = validation_json(&outcome);
    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "status": overall_status(&outcome, &batch),
            "insertStatus": batch.status().as_str(),
            "bypassed": submission.bypass_validation,
            "accepted": accepted,
            "rejected": rejected,
            "insertedTitles": batch.titles(),
            "insertedExams": batch.inserted.iter().map(|i| i.to_json()).collect::<Vec<_>>(),
            "insertionErrors": batch.failures.iter().map(|f| f.to_json()).collect::<Vec<_>>(),
        }),
    )
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "exams": [] }));
    };
    match store::list_exams(
        conn,
        param_str(req, "courseCode"),
        param_i64(req, "academicYear"),
    ) {
        Ok(rows) => ok(
            &req.id,
            json!({ "exams": rows.iter().map(|e| e.to_json()).collect::<Vec<_>>() }),
        ),
        Err(e) => err(&req.id, "db_query_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.validate" => Some(handle_exams_validate(state, req)),
        "exams.propose" => Some(handle_exams_propose(state, req)),
        "exams.list" => Some(handle_exams_list(state, req)),
        _ => None,
    }
}
