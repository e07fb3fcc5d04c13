use crate::model::{fmt_date, fmt_time, CommonFields, ExamCandidate};
use crate::rules::SchedulingRules;
use crate::store;
use anyhow::{anyhow, Context};
use rusqlite::{params, Connection, Transaction};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct InsertedExam {
    pub exam_id: String,
    pub course_code: String,
    pub title: String,
}

impl InsertedExam {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "examId": self.exam_id,
            "courseCode": self.course_code,
            "title": self.title,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertFailure {
    pub candidate: ExamCandidate,
    pub message: String,
}

impl InsertFailure {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "courseCode": self.candidate.course_code,
            "date": fmt_date(self.candidate.date),
            "code": "persistence_failure",
            "message": self.message,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStatus {
    Empty,
    Complete,
    Partial,
    Failed,
}

impl InsertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InsertStatus::Empty => "empty",
            InsertStatus::Complete => "complete",
            InsertStatus::Partial => "partial",
            InsertStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchInsert {
    pub inserted: Vec<InsertedExam>,
    pub failures: Vec<InsertFailure>,
}

impl BatchInsert {
    pub fn status(&self) -> InsertStatus {
        match (self.inserted.is_empty(), self.failures.is_empty()) {
            (true, true) => InsertStatus::Empty,
            (false, true) => InsertStatus::Complete,
            (false, false) => InsertStatus::Partial,
            (true, false) => InsertStatus::Failed,
        }
    }

    pub fn titles(&self) -> Vec<String> {
        self.inserted.iter().map(|i| i.title.clone()).collect()
    }
}

fn insert_one(
    conn: &Connection,
    rules: &SchedulingRules,
    common: &CommonFields,
    c: &ExamCandidate,
) -> anyhow::Result<InsertedExam> {
    let course = store::find_course_by_code(conn, &c.course_code)?
        .ok_or_else(|| anyhow!("unknown course {}", c.course_code))?;
    let offering = store::offerings_for_course(conn, &course.id, common.academic_year)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            anyhow!(
                "{} has no offering in academic year {}",
                c.course_code,
                common.academic_year
            )
        })?;

    let booking_id = if rules.is_office(&c.room) {
        None
    } else {
        match store::find_booking(conn, c.date, &c.room, c.period)? {
            // Cross-listed courses of one submission share the room.
            Some(b) if b.submission_id == common.submission_id => Some(b.id),
            Some(_) => {
                return Err(anyhow!(
                    "room {} already booked on {} ({})",
                    c.room,
                    fmt_date(c.date),
                    c.period.as_str()
                ))
            }
            None => Some(store::insert_booking(
                conn,
                c.date,
                &c.room,
                c.period,
                &common.submission_id,
            )?),
        }
    };

    let exam_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(
           id, course_id, cds_code, curriculum_code, academic_year, exam_date, start_time,
           duration_minutes, room, period, visible, exam_type, teacher, session_kind, notes,
           booking_id, submission_id, created_at, registration_start, registration_end)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            exam_id,
            course.id,
            offering.cds_code,
            offering.curriculum_code,
            common.academic_year,
            fmt_date(c.date),
            fmt_time(c.start),
            c.duration_minutes,
            c.room,
            c.period.as_str(),
            c.visible as i64,
            common.exam_type,
            common.teacher,
            c.session_kind.map(|k| k.as_str()),
            common.notes,
            booking_id,
            common.submission_id,
            chrono::Utc::now().to_rfc3339(),
            c.registration_start.map(fmt_date),
            c.registration_end.map(fmt_date),
        ],
    )
    .context("failed to insert exam")?;

    Ok(InsertedExam {
        exam_id,
        course_code: course.code,
        title: format!("{} {}", course.title, fmt_date(c.date)),
    })
}

/// Persists each candidate in its own savepoint so one failure never blocks its
/// siblings. The transaction is committed only if at least one insert succeeded.
pub fn insert(
    mut tx: Transaction<'_>,
    rules: &SchedulingRules,
    common: &CommonFields,
    accepted: &[ExamCandidate],
) -> anyhow::Result<BatchInsert> {
    let mut out = BatchInsert::default();

    for candidate in accepted {
        let sp = tx.savepoint()?;
        match insert_one(&sp, rules, common, candidate) {
            Ok(done) => {
                sp.commit()?;
                out.inserted.push(done);
            }
            Err(e) => {
                // Dropping the savepoint rolls back this item only.
                drop(sp);
                tracing::warn!(
                    "insert failed for {} on {}: {e:#}",
                    candidate.course_code,
                    fmt_date(candidate.date)
                );
                out.failures.push(InsertFailure {
                    candidate: candidate.clone(),
                    message: format!("{e:#}"),
                });
            }
        }
    }

    if out.inserted.is_empty() {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }

    tracing::info!(
        "submission {}: {} inserted, {} failed ({})",
        common.submission_id,
        out.inserted.len(),
        out.failures.len(),
        out.status().as_str()
    );
    Ok(out)
}
