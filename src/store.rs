use crate::model::{
    fmt_date, parse_date, parse_time, Course, CourseOffering, ExamSlot, MasterRef, Period, Room,
    Semester, Session, SessionKind,
};
use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

fn conversion_err(idx: usize, what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("invalid {}: {:?}", what, raw).into(),
    )
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    parse_date(&raw).ok_or_else(|| conversion_err(idx, "date", &raw))
}

fn opt_date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(s) => parse_date(&s)
            .map(Some)
            .ok_or_else(|| conversion_err(idx, "date", &s)),
        None => Ok(None),
    }
}

// ---- courses ----

pub fn find_course_by_code(conn: &Connection, code: &str) -> anyhow::Result<Option<Course>> {
    let course = conn
        .query_row(
            "SELECT id, code, title FROM courses WHERE code = ?",
            [code],
            |r| {
                Ok(Course {
                    id: r.get(0)?,
                    code: r.get(1)?,
                    title: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(course)
}

pub fn upsert_course(conn: &Connection, code: &str, title: &str) -> anyhow::Result<String> {
    if let Some(existing) = find_course_by_code(conn, code)? {
        conn.execute(
            "UPDATE courses SET title = ? WHERE id = ?",
            (title, &existing.id),
        )?;
        return Ok(existing.id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, code, title) VALUES(?, ?, ?)",
        (&id, code, title),
    )?;
    Ok(id)
}

// ---- offerings ----

const OFFERING_SELECT: &str = "SELECT
       o.id, o.course_id, c.code, c.title, o.cds_code, o.curriculum_code,
       o.academic_year, o.year_of_study, o.semester,
       o.master_course_code, o.master_cds_code, o.master_curriculum_code,
       o.overlap_count
     FROM course_offerings o
     JOIN courses c ON c.id = o.course_id";

fn offering_from_row(r: &Row<'_>) -> rusqlite::Result<CourseOffering> {
    let semester_raw: i64 = r.get(8)?;
    let semester = Semester::from_i64(semester_raw)
        .ok_or_else(|| conversion_err(8, "semester", &semester_raw.to_string()))?;
    let master_course: Option<String> = r.get(9)?;
    let master_cds: Option<String> = r.get(10)?;
    let master_curriculum: Option<String> = r.get(11)?;
    let master = match (master_course, master_cds, master_curriculum) {
        (Some(course_code), Some(program_code), Some(curriculum_code)) => Some(MasterRef {
            course_code,
            program_code,
            curriculum_code,
        }),
        _ => None,
    };
    Ok(CourseOffering {
        id: r.get(0)?,
        course_id: r.get(1)?,
        course_code: r.get(2)?,
        course_title: r.get(3)?,
        cds_code: r.get(4)?,
        curriculum_code: r.get(5)?,
        academic_year: r.get(6)?,
        year_of_study: r.get(7)?,
        semester,
        master,
        overlap_count: r.get(12)?,
    })
}

pub fn offerings_for_course(
    conn: &Connection,
    course_id: &str,
    academic_year: i64,
) -> anyhow::Result<Vec<CourseOffering>> {
    let sql = format!(
        "{} WHERE o.course_id = ? AND o.academic_year = ?
         ORDER BY o.cds_code, o.curriculum_code",
        OFFERING_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![course_id, academic_year], offering_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn offerings_in_cds(
    conn: &Connection,
    cds_code: &str,
    academic_year: i64,
) -> anyhow::Result<Vec<CourseOffering>> {
    let sql = format!(
        "{} WHERE o.cds_code = ? AND o.academic_year = ?
         ORDER BY c.code, o.curriculum_code",
        OFFERING_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![cds_code, academic_year], offering_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_offerings(
    conn: &Connection,
    academic_year: Option<i64>,
) -> anyhow::Result<Vec<CourseOffering>> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR o.academic_year = ?1)
         ORDER BY o.academic_year, o.cds_code, c.code, o.curriculum_code",
        OFFERING_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![academic_year], offering_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct OfferingInput<'a> {
    pub course_id: &'a str,
    pub cds_code: &'a str,
    pub curriculum_code: &'a str,
    pub academic_year: i64,
    pub year_of_study: i64,
    pub semester: Semester,
    pub master: Option<&'a MasterRef>,
}

/// Inserts or updates an offering; the overlap counter is never touched here.
pub fn upsert_offering(conn: &Connection, o: &OfferingInput<'_>) -> anyhow::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM course_offerings
             WHERE course_id = ? AND cds_code = ? AND curriculum_code = ? AND academic_year = ?",
            params![o.course_id, o.cds_code, o.curriculum_code, o.academic_year],
            |r| r.get(0),
        )
        .optional()?;
    let master_course = o.master.map(|m| m.course_code.as_str());
    let master_cds = o.master.map(|m| m.program_code.as_str());
    let master_curriculum = o.master.map(|m| m.curriculum_code.as_str());
    if let Some(id) = existing {
        conn.execute(
            "UPDATE course_offerings SET
               year_of_study = ?, semester = ?,
               master_course_code = ?, master_cds_code = ?, master_curriculum_code = ?
             WHERE id = ?",
            params![
                o.year_of_study,
                o.semester.as_i64(),
                master_course,
                master_cds,
                master_curriculum,
                id
            ],
        )?;
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO course_offerings(
           id, course_id, cds_code, curriculum_code, academic_year, year_of_study, semester,
           master_course_code, master_cds_code, master_curriculum_code, overlap_count)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        params![
            id,
            o.course_id,
            o.cds_code,
            o.curriculum_code,
            o.academic_year,
            o.year_of_study,
            o.semester.as_i64(),
            master_course,
            master_cds,
            master_curriculum
        ],
    )?;
    Ok(id)
}

// ---- teachers ----

pub fn teachers_for_course(
    conn: &Connection,
    course_id: &str,
    academic_year: i64,
) -> anyhow::Result<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT teacher FROM teaching_assignments WHERE course_id = ? AND academic_year = ?",
    )?;
    let rows = stmt
        .query_map(params![course_id, academic_year], |r| r.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(rows)
}

pub fn assign_teacher(
    conn: &Connection,
    course_id: &str,
    teacher: &str,
    academic_year: i64,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO teaching_assignments(course_id, teacher, academic_year)
         VALUES(?, ?, ?)",
        params![course_id, teacher, academic_year],
    )?;
    Ok(())
}

// ---- rooms ----

pub fn find_room(conn: &Connection, code: &str) -> anyhow::Result<Option<Room>> {
    let room = conn
        .query_row(
            "SELECT code, name, capacity FROM rooms WHERE code = ?",
            [code],
            |r| {
                Ok(Room {
                    code: r.get(0)?,
                    name: r.get(1)?,
                    capacity: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(room)
}

pub fn upsert_room(conn: &Connection, room: &Room) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO rooms(code, name, capacity) VALUES(?, ?, ?)
         ON CONFLICT(code) DO UPDATE SET name = excluded.name, capacity = excluded.capacity",
        params![room.code, room.name, room.capacity],
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomBooking {
    pub id: String,
    pub submission_id: String,
}

pub fn find_booking(
    conn: &Connection,
    date: NaiveDate,
    room: &str,
    period: Period,
) -> anyhow::Result<Option<RoomBooking>> {
    let booking = conn
        .query_row(
            "SELECT id, submission_id FROM room_bookings
             WHERE exam_date = ? AND room = ? AND period = ?",
            params![fmt_date(date), room, period.as_str()],
            |r| {
                Ok(RoomBooking {
                    id: r.get(0)?,
                    submission_id: r.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(booking)
}

pub fn insert_booking(
    conn: &Connection,
    date: NaiveDate,
    room: &str,
    period: Period,
    submission_id: &str,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO room_bookings(id, exam_date, room, period, submission_id)
         VALUES(?, ?, ?, ?, ?)",
        params![id, fmt_date(date), room, period.as_str(), submission_id],
    )
    .with_context(|| format!("room {} already booked on {}", room, fmt_date(date)))?;
    Ok(id)
}

// ---- sessions ----

pub fn sessions_for(
    conn: &Connection,
    cds_code: &str,
    curriculum_code: &str,
    academic_year: i64,
) -> anyhow::Result<Vec<Session>> {
    let mut stmt = conn.prepare_cached(
        "SELECT cds_code, curriculum_code, academic_year, kind, start_date, end_date
         FROM sessions
         WHERE cds_code = ? AND curriculum_code = ? AND academic_year = ?",
    )?;
    let rows = stmt
        .query_map(params![cds_code, curriculum_code, academic_year], |r| {
            let kind_raw: String = r.get(3)?;
            let kind = SessionKind::parse(&kind_raw)
                .ok_or_else(|| conversion_err(3, "session kind", &kind_raw))?;
            Ok(Session {
                cds_code: r.get(0)?,
                curriculum_code: r.get(1)?,
                academic_year: r.get(2)?,
                kind,
                start: date_col(r, 4)?,
                end: date_col(r, 5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn upsert_session(conn: &Connection, s: &Session) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO sessions(cds_code, curriculum_code, academic_year, kind, start_date, end_date)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(cds_code, curriculum_code, academic_year, kind) DO UPDATE SET
           start_date = excluded.start_date,
           end_date = excluded.end_date",
        params![
            s.cds_code,
            s.curriculum_code,
            s.academic_year,
            s.kind.as_str(),
            fmt_date(s.start),
            fmt_date(s.end)
        ],
    )?;
    Ok(())
}

// ---- exams ----

const EXAM_SELECT: &str = "SELECT
       e.id, e.course_id, c.code, c.title, e.cds_code, e.curriculum_code, e.academic_year,
       e.exam_date, e.start_time, e.duration_minutes, e.room, e.period, e.visible,
       e.exam_type, e.teacher, e.registration_start, e.registration_end, e.session_kind
     FROM exams e
     JOIN courses c ON c.id = e.course_id";

fn exam_from_row(r: &Row<'_>) -> rusqlite::Result<ExamSlot> {
    let start_raw: String = r.get(8)?;
    let start = parse_time(&start_raw).ok_or_else(|| conversion_err(8, "time", &start_raw))?;
    let period_raw: String = r.get(11)?;
    let period = Period::parse(&period_raw).ok_or_else(|| conversion_err(11, "period", &period_raw))?;
    let session_kind: Option<String> = r.get(17)?;
    Ok(ExamSlot {
        id: r.get(0)?,
        course_id: r.get(1)?,
        course_code: r.get(2)?,
        course_title: r.get(3)?,
        cds_code: r.get(4)?,
        curriculum_code: r.get(5)?,
        academic_year: r.get(6)?,
        date: date_col(r, 7)?,
        start,
        duration_minutes: r.get(9)?,
        room: r.get(10)?,
        period,
        visible: r.get::<_, i64>(12)? != 0,
        exam_type: r.get(13)?,
        teacher: r.get(14)?,
        registration_start: opt_date_col(r, 15)?,
        registration_end: opt_date_col(r, 16)?,
        session_kind: session_kind.as_deref().and_then(SessionKind::parse),
    })
}

/// Visible sittings of a course across all academic years, oldest first.
pub fn visible_exams_for_course(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<ExamSlot>> {
    let sql = format!(
        "{} WHERE e.course_id = ? AND e.visible = 1 ORDER BY e.exam_date, e.start_time",
        EXAM_SELECT
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([course_id], exam_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Visible sittings of any course on one date, ordered for stable first-match reporting.
pub fn visible_exams_on(
    conn: &Connection,
    date: NaiveDate,
    academic_year: i64,
) -> anyhow::Result<Vec<ExamSlot>> {
    let sql = format!(
        "{} WHERE e.exam_date = ? AND e.academic_year = ? AND e.visible = 1
         ORDER BY e.start_time, c.code, e.id",
        EXAM_SELECT
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![fmt_date(date), academic_year], exam_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_exams(
    conn: &Connection,
    course_code: Option<&str>,
    academic_year: Option<i64>,
) -> anyhow::Result<Vec<ExamSlot>> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR c.code = ?1) AND (?2 IS NULL OR e.academic_year = ?2)
         ORDER BY e.exam_date, e.start_time, c.code",
        EXAM_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![course_code, academic_year], exam_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
