use crate::error::{RejectKind, ScheduleError};
use crate::model::{
    fmt_date, fmt_time, parse_date, parse_time, CommonFields, Course, CourseOffering,
    ExamCandidate, ExamSlot, OverlapMode, Period, Sitting, Submission, SubmissionInput,
};
use crate::rules::SchedulingRules;
use crate::sessions::{self, SessionMatch};
use crate::store;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rusqlite::Connection;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub candidate: ExamCandidate,
    pub kind: RejectKind,
    pub reason: String,
}

impl Rejection {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "courseCode": self.candidate.course_code,
            "date": fmt_date(self.candidate.date),
            "code": self.kind.code(),
            "reason": self.reason,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    pub accepted: Vec<ExamCandidate>,
    pub rejected: Vec<Rejection>,
}

fn required_str<'a>(v: Option<&'a str>, what: &str, sitting: usize) -> Result<&'a str, ScheduleError> {
    match v.map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(ScheduleError::malformed_at(
            format!("sitting {} is missing {}", sitting + 1, what),
            sitting,
        )),
    }
}

fn optional_date(raw: Option<&str>, what: &str) -> Result<Option<NaiveDate>, ScheduleError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_date(s)
            .map(Some)
            .ok_or_else(|| ScheduleError::malformed(format!("unparseable {}: {}", what, s))),
        None => Ok(None),
    }
}

/// Any readable Saturday or Sunday among the sittings, whatever else is wrong
/// with the batch.
fn first_weekend_sitting(input: &SubmissionInput) -> Option<ScheduleError> {
    input.sittings.iter().enumerate().find_map(|(index, raw)| {
        let date = raw.date.as_deref().and_then(parse_date)?;
        is_weekend(date).then(|| ScheduleError::WeekendRejected {
            date: fmt_date(date),
            sitting: index,
        })
    })
}

/// Turns raw caller input into a typed submission. A weekend date is reported
/// first; after that any missing or unparseable mandatory field aborts the
/// whole batch.
pub fn parse_submission(
    rules: &SchedulingRules,
    input: &SubmissionInput,
    submission_id: &str,
) -> Result<Submission, ScheduleError> {
    if !input.bypass_validation {
        if let Some(weekend) = first_weekend_sitting(input) {
            return Err(weekend);
        }
    }

    let teacher = match input.teacher.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => return Err(ScheduleError::malformed("missing teacher")),
    };
    let Some(academic_year) = input.academic_year else {
        return Err(ScheduleError::malformed("missing academicYear"));
    };

    let mut course_codes: Vec<String> = Vec::new();
    for raw in &input.course_codes {
        let code = raw.trim();
        if code.is_empty() {
            return Err(ScheduleError::malformed("course codes must not be empty"));
        }
        if !course_codes.iter().any(|c| c == code) {
            course_codes.push(code.to_string());
        }
    }
    if course_codes.is_empty() {
        return Err(ScheduleError::malformed("missing courseCodes"));
    }
    if input.sittings.is_empty() {
        return Err(ScheduleError::malformed("missing sittings"));
    }

    let mut sittings = Vec::with_capacity(input.sittings.len());
    for (index, raw) in input.sittings.iter().enumerate() {
        let date_raw = required_str(raw.date.as_deref(), "date", index)?;
        let time_raw = required_str(raw.start_time.as_deref(), "startTime", index)?;
        let room = required_str(raw.room.as_deref(), "room", index)?;
        let date = parse_date(date_raw).ok_or_else(|| {
            ScheduleError::malformed_at(format!("unparseable date: {}", date_raw), index)
        })?;
        let start = parse_time(time_raw).ok_or_else(|| {
            ScheduleError::malformed_at(format!("unparseable startTime: {}", time_raw), index)
        })?;
        sittings.push(Sitting {
            index,
            date,
            start,
            room: room.to_string(),
            duration_minutes: raw.duration_minutes,
            period: Period::for_start(start, rules.afternoon_starts_at),
        });
    }

    let registration_start =
        optional_date(input.registration_start.as_deref(), "registrationStart")?;
    let registration_end = optional_date(input.registration_end.as_deref(), "registrationEnd")?;
    if let (Some(s), Some(e)) = (registration_start, registration_end) {
        if s > e {
            return Err(ScheduleError::malformed(
                "registrationStart must not be after registrationEnd",
            ));
        }
    }

    Ok(Submission {
        common: CommonFields {
            submission_id: submission_id.to_string(),
            teacher,
            academic_year,
            exam_type: input
                .exam_type
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            visible: input.visible.unwrap_or(true),
            notes: input.notes.clone(),
            registration_start,
            registration_end,
        },
        course_codes,
        sittings,
        bypass_validation: input.bypass_validation,
        overlap_mode: input.overlap_mode,
    })
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Batch-fatal checks: weekend, unknown room, room already taken.
fn check_batch(
    conn: &Connection,
    rules: &SchedulingRules,
    submission: &Submission,
) -> Result<(), ScheduleError> {
    for s in &submission.sittings {
        if is_weekend(s.date) {
            return Err(ScheduleError::WeekendRejected {
                date: fmt_date(s.date),
                sitting: s.index,
            });
        }
    }

    let mut claimed: HashSet<(NaiveDate, String, Period)> = HashSet::new();
    for s in &submission.sittings {
        if rules.is_office(&s.room) {
            continue;
        }
        if store::find_room(conn, &s.room)?.is_none() {
            return Err(ScheduleError::MalformedInput {
                message: format!("unknown room: {}", s.room),
                details: Some(json!({ "sitting": s.index, "room": s.room })),
            });
        }
        let room_conflict = || ScheduleError::RoomConflict {
            date: fmt_date(s.date),
            room: s.room.clone(),
            period: s.period.as_str().to_string(),
        };
        if !claimed.insert((s.date, s.room.clone(), s.period)) {
            return Err(room_conflict());
        }
        if store::find_booking(conn, s.date, &s.room, s.period)?.is_some() {
            return Err(room_conflict());
        }
    }
    Ok(())
}

fn derive_registration(
    common: &CommonFields,
    rules: &SchedulingRules,
    date: NaiveDate,
    session: Option<&SessionMatch>,
) -> (NaiveDate, NaiveDate) {
    let anchor = session.map(|m| m.start).unwrap_or(date);
    let start = common
        .registration_start
        .unwrap_or(anchor - Duration::days(rules.registration_lead_days));
    let end = common.registration_end.unwrap_or(date - Duration::days(1));
    (start, end)
}

#[derive(Debug, Clone)]
struct CourseRecord {
    course: Course,
    offerings: Vec<CourseOffering>,
}

/// Per-submission evaluation state with read caches over the store.
struct Pipeline<'a> {
    conn: &'a Connection,
    rules: &'a SchedulingRules,
    submission: &'a Submission,
    courses: HashMap<String, Option<CourseRecord>>,
    cds_offerings: HashMap<String, Vec<CourseOffering>>,
    teachers: HashMap<String, BTreeSet<String>>,
    exams_on: HashMap<NaiveDate, Vec<ExamSlot>>,
    out: Validation,
}

impl<'a> Pipeline<'a> {
    fn new(conn: &'a Connection, rules: &'a SchedulingRules, submission: &'a Submission) -> Self {
        Self {
            conn,
            rules,
            submission,
            courses: HashMap::new(),
            cds_offerings: HashMap::new(),
            teachers: HashMap::new(),
            exams_on: HashMap::new(),
            out: Validation::default(),
        }
    }

    fn year(&self) -> i64 {
        self.submission.common.academic_year
    }

    fn course(&mut self, code: &str) -> anyhow::Result<Option<CourseRecord>> {
        if let Some(hit) = self.courses.get(code) {
            return Ok(hit.clone());
        }
        let record = match store::find_course_by_code(self.conn, code)? {
            Some(course) => {
                let offerings = store::offerings_for_course(self.conn, &course.id, self.year())?;
                Some(CourseRecord { course, offerings })
            }
            None => None,
        };
        self.courses.insert(code.to_string(), record.clone());
        Ok(record)
    }

    fn offerings_in_cds(&mut self, cds_code: &str) -> anyhow::Result<Vec<CourseOffering>> {
        if let Some(hit) = self.cds_offerings.get(cds_code) {
            return Ok(hit.clone());
        }
        let rows = store::offerings_in_cds(self.conn, cds_code, self.year())?;
        self.cds_offerings.insert(cds_code.to_string(), rows.clone());
        Ok(rows)
    }

    fn teachers(&mut self, course_id: &str) -> anyhow::Result<BTreeSet<String>> {
        if let Some(hit) = self.teachers.get(course_id) {
            return Ok(hit.clone());
        }
        let set = store::teachers_for_course(self.conn, course_id, self.year())?;
        self.teachers.insert(course_id.to_string(), set.clone());
        Ok(set)
    }

    fn exams_on(&mut self, date: NaiveDate) -> anyhow::Result<Vec<ExamSlot>> {
        if let Some(hit) = self.exams_on.get(&date) {
            return Ok(hit.clone());
        }
        let rows = store::visible_exams_on(self.conn, date, self.year())?;
        self.exams_on.insert(date, rows.clone());
        Ok(rows)
    }

    fn reject(&mut self, candidate: ExamCandidate, kind: RejectKind, reason: String) {
        tracing::debug!(
            "rejected {} on {}: {}",
            candidate.course_code,
            fmt_date(candidate.date),
            reason
        );
        self.out.rejected.push(Rejection {
            candidate,
            kind,
            reason,
        });
    }

    fn candidate(&self, course_code: &str, sitting: &Sitting, duration: i64) -> ExamCandidate {
        ExamCandidate {
            course_code: course_code.to_string(),
            sitting_index: sitting.index,
            date: sitting.date,
            start: sitting.start,
            duration_minutes: duration,
            room: sitting.room.clone(),
            period: sitting.period,
            visible: self.submission.common.visible,
            registration_start: None,
            registration_end: None,
            session_kind: None,
        }
    }

    fn resolve_session(
        &self,
        offerings: &[CourseOffering],
        date: NaiveDate,
    ) -> anyhow::Result<Option<SessionMatch>> {
        for o in offerings {
            if let Some(m) = sessions::resolve(
                self.conn,
                self.rules,
                date,
                &o.cds_code,
                &o.curriculum_code,
                o.academic_year,
            )? {
                return Ok(Some(m));
            }
        }
        Ok(None)
    }

    /// Dates of other visible sittings of the same course closer than the minimum spacing.
    fn spacing_conflicts(
        &self,
        record: &CourseRecord,
        candidate: &ExamCandidate,
    ) -> anyhow::Result<Vec<NaiveDate>> {
        let window = self.rules.min_spacing_days;
        let too_close = |other: NaiveDate| (candidate.date - other).num_days().abs() < window;

        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
        for e in store::visible_exams_for_course(self.conn, &record.course.id)? {
            if too_close(e.date) {
                dates.insert(e.date);
            }
        }
        for a in &self.out.accepted {
            if a.visible
                && a.course_code == candidate.course_code
                && a.sitting_index != candidate.sitting_index
                && too_close(a.date)
            {
                dates.insert(a.date);
            }
        }
        Ok(dates.into_iter().collect())
    }

    /// Courses sharing students with `record` whose sittings intersect the candidate's
    /// time range. In `First` mode the scan stops at the first hit.
    fn overlap_conflicts(
        &mut self,
        record: &CourseRecord,
        candidate: &ExamCandidate,
    ) -> anyhow::Result<Vec<String>> {
        let mode = self.submission.overlap_mode;
        let range = candidate.time_range();
        let own_teachers = self.teachers(&record.course.id)?;
        let exams_on_date = self.exams_on(candidate.date)?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut conflicts: Vec<String> = Vec::new();

        for own in &record.offerings {
            let peers = self.offerings_in_cds(&own.cds_code)?;
            for other in &peers {
                if other.course_id == record.course.id
                    || !own.shares_context(other, &self.rules.generic_curriculum)
                    || own.is_mutuation_pair(other)
                    || !seen.insert(other.course_id.clone())
                {
                    continue;
                }
                let other_teachers = self.teachers(&other.course_id)?;
                if !own_teachers.is_disjoint(&other_teachers) {
                    continue;
                }

                let persisted = exams_on_date
                    .iter()
                    .filter(|e| e.course_id == other.course_id)
                    .find(|e| e.time_range().overlaps(&range))
                    .map(|e| (fmt_time(e.start), e.duration_minutes));
                let pending = || {
                    self.out
                        .accepted
                        .iter()
                        .filter(|a| {
                            a.visible
                                && a.course_code == other.course_code
                                && a.sitting_index != candidate.sitting_index
                                && a.date == candidate.date
                        })
                        .find(|a| a.time_range().overlaps(&range))
                        .map(|a| (fmt_time(a.start), a.duration_minutes))
                };
                let hit = persisted.or_else(pending);

                if let Some((start, minutes)) = hit {
                    conflicts.push(format!(
                        "{} ({}, {} min)",
                        other.course_title, start, minutes
                    ));
                    if mode == OverlapMode::First {
                        return Ok(conflicts);
                    }
                }
            }
        }
        Ok(conflicts)
    }

    fn evaluate(&mut self, course_code: &str, sitting: &Sitting) -> anyhow::Result<()> {
        let duration = sitting
            .duration_minutes
            .unwrap_or(self.rules.default_duration_minutes);
        let mut candidate = self.candidate(course_code, sitting, duration);
        if !(1..=self.rules.max_duration_minutes).contains(&duration) {
            let reason = format!(
                "malformed sitting: duration {} minutes is outside 1..={}",
                duration, self.rules.max_duration_minutes
            );
            self.reject(candidate, RejectKind::MalformedSitting, reason);
            return Ok(());
        }

        let Some(record) = self.course(course_code)? else {
            let reason = format!("offering not found: unknown course {}", course_code);
            self.reject(candidate, RejectKind::OfferingNotFound, reason);
            return Ok(());
        };
        if record.offerings.is_empty() {
            let reason = format!(
                "offering not found: {} is not offered in academic year {}",
                course_code,
                self.year()
            );
            self.reject(candidate, RejectKind::OfferingNotFound, reason);
            return Ok(());
        }

        let session = self.resolve_session(&record.offerings, candidate.date)?;

        if candidate.visible {
            if session.is_none() {
                let reason = format!(
                    "date outside any exam session: {} for {}",
                    fmt_date(candidate.date),
                    course_code
                );
                self.reject(candidate, RejectKind::SessionNotFound, reason);
                return Ok(());
            }

            let close = self.spacing_conflicts(&record, &candidate)?;
            if !close.is_empty() {
                let listed = close
                    .iter()
                    .map(|d| fmt_date(*d))
                    .collect::<Vec<_>>()
                    .join(", ");
                let reason = format!(
                    "minimum spacing of {} days violated by sittings on {}",
                    self.rules.min_spacing_days, listed
                );
                self.reject(candidate, RejectKind::SpacingViolation, reason);
                return Ok(());
            }

            let overlaps = self.overlap_conflicts(&record, &candidate)?;
            if !overlaps.is_empty() {
                let reason = format!("overlaps with {}", overlaps.join(", "));
                self.reject(candidate, RejectKind::OverlapViolation, reason);
                return Ok(());
            }
        }

        let (reg_start, reg_end) = derive_registration(
            &self.submission.common,
            self.rules,
            candidate.date,
            session.as_ref(),
        );
        candidate.registration_start = Some(reg_start);
        candidate.registration_end = Some(reg_end);
        candidate.session_kind = session.map(|m| m.kind);
        self.out.accepted.push(candidate);
        Ok(())
    }
}

/// Runs the constraint pipeline over every (course, sitting) pair of the submission.
pub fn validate(
    conn: &Connection,
    rules: &SchedulingRules,
    submission: &Submission,
) -> Result<Validation, ScheduleError> {
    check_batch(conn, rules, submission)?;

    let mut pipeline = Pipeline::new(conn, rules, submission);
    for code in &submission.course_codes {
        for sitting in &submission.sittings {
            pipeline.evaluate(code, sitting)?;
        }
    }

    tracing::info!(
        "validated submission {}: {} accepted, {} rejected",
        submission.common.submission_id,
        pipeline.out.accepted.len(),
        pipeline.out.rejected.len()
    );
    Ok(pipeline.out)
}

/// Admin escape hatch: every candidate is accepted without evaluating any rule.
/// Registration windows are still derived from the session when one resolves.
pub fn accept_all(
    conn: &Connection,
    rules: &SchedulingRules,
    submission: &Submission,
) -> Result<Validation, ScheduleError> {
    let mut pipeline = Pipeline::new(conn, rules, submission);
    for code in &submission.course_codes {
        for sitting in &submission.sittings {
            let duration = sitting
                .duration_minutes
                .unwrap_or(rules.default_duration_minutes);
            let mut candidate = pipeline.candidate(code, sitting, duration);
            let session = match pipeline.course(code)? {
                Some(record) => pipeline.resolve_session(&record.offerings, sitting.date)?,
                None => None,
            };
            let (reg_start, reg_end) =
                derive_registration(&submission.common, rules, sitting.date, session.as_ref());
            candidate.registration_start = Some(reg_start);
            candidate.registration_end = Some(reg_end);
            candidate.session_kind = session.map(|m| m.kind);
            pipeline.out.accepted.push(candidate);
        }
    }
    tracing::warn!(
        "submission {} bypassed validation ({} candidates)",
        submission.common.submission_id,
        pipeline.out.accepted.len()
    );
    Ok(pipeline.out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;
    use crate::model::{MasterRef, Room, Semester, Session, SessionKind, SittingInput};
    use crate::store::OfferingInput;

    pub(crate) fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("init");
        for (code, title, teacher) in [
            ("ANA1", "Analisi I", "rossi"),
            ("FIS1", "Fisica I", "bianchi"),
            ("GEO1", "Geometria", "rossi"),
            ("CHI1", "Chimica", "verdi"),
        ] {
            let id = store::upsert_course(&conn, code, title).expect("course");
            store::upsert_offering(
                &conn,
                &OfferingInput {
                    course_id: &id,
                    cds_code: "L31",
                    curriculum_code: "GEN",
                    academic_year: 2024,
                    year_of_study: 1,
                    semester: if code == "CHI1" {
                        Semester::Second
                    } else {
                        Semester::First
                    },
                    master: None,
                },
            )
            .expect("offering");
            store::assign_teacher(&conn, &id, teacher, 2024).expect("teacher");
        }
        for code in ["AULA3", "AULA4", "AULA5"] {
            store::upsert_room(
                &conn,
                &Room {
                    code: code.into(),
                    name: code.into(),
                    capacity: 100,
                },
            )
            .expect("room");
        }
        store::upsert_session(
            &conn,
            &Session {
                cds_code: "L31".into(),
                curriculum_code: "GEN".into(),
                academic_year: 2024,
                kind: SessionKind::Estiva,
                start: parse_date("2025-05-26").expect("date"),
                end: parse_date("2025-07-31").expect("date"),
            },
        )
        .expect("session");
        conn
    }

    pub(crate) fn sitting(date: &str, time: &str, room: &str) -> SittingInput {
        SittingInput {
            date: Some(date.into()),
            start_time: Some(time.into()),
            room: Some(room.into()),
            duration_minutes: Some(120),
        }
    }

    pub(crate) fn input(codes: &[&str], sittings: Vec<SittingInput>) -> SubmissionInput {
        SubmissionInput {
            teacher: Some("rossi".into()),
            academic_year: Some(2024),
            course_codes: codes.iter().map(|c| c.to_string()).collect(),
            sittings,
            ..Default::default()
        }
    }

    fn run(conn: &Connection, input: &SubmissionInput) -> Result<Validation, ScheduleError> {
        let rules = SchedulingRules::default();
        let submission = parse_submission(&rules, input, "sub-test")?;
        validate(conn, &rules, &submission)
    }

    #[test]
    fn weekend_aborts_before_any_other_rule() {
        let conn = seeded();
        // 2025-06-14 is a Saturday; the unknown course and room would fail later checks.
        let inp = input(
            &["NOPE"],
            vec![
                sitting("2025-06-12", "10:00", "AULA3"),
                sitting("2025-06-14", "10:00", "NOWHERE"),
            ],
        );
        match run(&conn, &inp) {
            Err(ScheduleError::WeekendRejected { date, sitting }) => {
                assert_eq!(date, "2025-06-14");
                assert_eq!(sitting, 1);
            }
            other => panic!("expected weekend rejection, got {other:?}"),
        }
    }

    #[test]
    fn weekend_wins_over_missing_fields_in_other_sittings() {
        let conn = seeded();
        let mut thursday = sitting("2025-06-12", "10:00", "AULA3");
        thursday.room = None;
        let inp = input(
            &["ANA1"],
            vec![thursday, sitting("2025-06-14", "10:00", "AULA3")],
        );
        match run(&conn, &inp) {
            Err(ScheduleError::WeekendRejected { date, sitting }) => {
                assert_eq!(date, "2025-06-14");
                assert_eq!(sitting, 1);
            }
            other => panic!("expected weekend rejection, got {other:?}"),
        }
    }

    #[test]
    fn missing_room_is_batch_fatal() {
        let conn = seeded();
        let mut s = sitting("2025-06-12", "10:00", "AULA3");
        s.room = None;
        let err = run(&conn, &input(&["ANA1"], vec![s])).expect_err("fatal");
        assert_eq!(err.code(), "malformed_input");
    }

    #[test]
    fn duplicate_room_within_batch_is_room_conflict() {
        let conn = seeded();
        let inp = input(
            &["ANA1"],
            vec![
                sitting("2025-06-12", "09:00", "AULA3"),
                sitting("2025-06-12", "11:00", "AULA3"),
            ],
        );
        let err = run(&conn, &inp).expect_err("fatal");
        assert_eq!(err.code(), "room_conflict");
    }

    #[test]
    fn office_room_never_conflicts() {
        let conn = seeded();
        // Same date and period in the office: no room conflict, spacing still applies.
        let inp = input(
            &["ANA1", "GEO1"],
            vec![
                sitting("2025-06-12", "09:00", "STUDIO"),
                sitting("2025-06-12", "10:00", "studio"),
            ],
        );
        let v = run(&conn, &inp).expect("validate");
        assert_eq!(v.accepted.len(), 2, "{:?}", v.rejected);
        assert!(v.accepted.iter().all(|a| a.sitting_index == 0));
        assert!(v
            .rejected
            .iter()
            .all(|r| r.kind == RejectKind::SpacingViolation));
    }

    #[test]
    fn registration_window_is_derived_per_candidate() {
        let conn = seeded();
        let v = run(
            &conn,
            &input(&["ANA1"], vec![sitting("2025-06-12", "09:00", "AULA3")]),
        )
        .expect("validate");
        let a = &v.accepted[0];
        assert_eq!(a.registration_start, parse_date("2025-05-06"));
        assert_eq!(a.registration_end, parse_date("2025-06-11"));
        assert_eq!(a.session_kind, Some(SessionKind::Estiva));
    }

    #[test]
    fn spacing_applies_within_one_batch() {
        let conn = seeded();
        let v = run(
            &conn,
            &input(
                &["ANA1"],
                vec![
                    sitting("2025-06-02", "09:00", "AULA3"),
                    sitting("2025-06-11", "09:00", "AULA3"),
                    sitting("2025-06-20", "09:00", "AULA3"),
                ],
            ),
        )
        .expect("validate");
        let accepted: Vec<String> = v.accepted.iter().map(|a| fmt_date(a.date)).collect();
        assert_eq!(accepted, vec!["2025-06-02", "2025-06-20"]);
        assert_eq!(v.rejected.len(), 1);
        assert_eq!(v.rejected[0].kind, RejectKind::SpacingViolation);
        assert!(v.rejected[0].reason.contains("2025-06-02"));
    }

    #[test]
    fn outside_session_and_unknown_course_are_per_pair() {
        let conn = seeded();
        let v = run(
            &conn,
            &input(
                &["ANA1", "XYZ"],
                vec![
                    sitting("2025-09-10", "09:00", "AULA3"),
                    sitting("2025-06-10", "09:00", "AULA4"),
                ],
            ),
        )
        .expect("validate");
        let kinds: Vec<RejectKind> = v.rejected.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RejectKind::SessionNotFound,
                RejectKind::OfferingNotFound,
                RejectKind::OfferingNotFound
            ]
        );
        assert_eq!(v.accepted.len(), 1);
    }

    #[test]
    fn invisible_sittings_skip_session_and_spacing() {
        let conn = seeded();
        let mut inp = input(
            &["ANA1"],
            vec![
                sitting("2025-09-10", "09:00", "AULA3"),
                sitting("2025-09-12", "09:00", "AULA3"),
            ],
        );
        inp.visible = Some(false);
        let v = run(&conn, &inp).expect("validate");
        assert_eq!(v.accepted.len(), 2);
        assert_eq!(v.accepted[0].session_kind, None);
        assert_eq!(v.accepted[0].registration_start, parse_date("2025-08-21"));
    }

    #[test]
    fn bypass_accepts_everything_parsed() {
        let conn = seeded();
        let rules = SchedulingRules::default();
        let mut inp = input(&["XYZ"], vec![sitting("2025-09-10", "09:00", "AULA3")]);
        inp.bypass_validation = true;
        let submission = parse_submission(&rules, &inp, "sub-bypass").expect("parse");
        let v = accept_all(&conn, &rules, &submission).expect("accept");
        assert_eq!(v.accepted.len(), 1);
        assert!(v.rejected.is_empty());
    }

    /// Validates and stores a single visible sitting for `code`.
    fn persist(conn: &mut Connection, code: &str, date: &str, time: &str, room: &str) {
        let rules = SchedulingRules::default();
        let submission = parse_submission(
            &rules,
            &input(&[code], vec![sitting(date, time, room)]),
            &format!("seed-{code}-{date}"),
        )
        .expect("parse");
        let v = validate(conn, &rules, &submission).expect("validate");
        assert_eq!(v.accepted.len(), 1, "{:?}", v.rejected);
        let tx = conn.transaction().expect("tx");
        let done = crate::insert::insert(tx, &rules, &submission.common, &v.accepted)
            .expect("insert");
        assert!(done.failures.is_empty(), "{:?}", done.failures);
    }

    pub(crate) fn set_offering(
        conn: &Connection,
        code: &str,
        cds_code: &str,
        semester: Semester,
        master: Option<&MasterRef>,
    ) {
        let course = store::find_course_by_code(conn, code)
            .expect("lookup")
            .expect("course");
        store::upsert_offering(
            conn,
            &OfferingInput {
                course_id: &course.id,
                cds_code,
                curriculum_code: "GEN",
                academic_year: 2024,
                year_of_study: 1,
                semester,
                master,
            },
        )
        .expect("offering");
    }

    #[test]
    fn mutuated_offering_never_overlaps_its_master() {
        let mut conn = seeded();
        persist(&mut conn, "ANA1", "2025-06-16", "10:00", "AULA3");
        let attempt = input(&["FIS1"], vec![sitting("2025-06-16", "11:00", "AULA4")]);

        let before = run(&conn, &attempt).expect("validate");
        assert_eq!(before.rejected.len(), 1);
        assert_eq!(before.rejected[0].kind, RejectKind::OverlapViolation);

        let master = MasterRef {
            course_code: "ANA1".into(),
            program_code: "L31".into(),
            curriculum_code: "GEN".into(),
        };
        set_offering(&conn, "FIS1", "L31", Semester::First, Some(&master));
        let after = run(&conn, &attempt).expect("validate");
        assert!(after.rejected.is_empty(), "{:?}", after.rejected);
        assert_eq!(after.accepted.len(), 1);
    }

    #[test]
    fn annual_offering_overlaps_first_semester_courses() {
        let mut conn = seeded();
        persist(&mut conn, "ANA1", "2025-06-16", "10:00", "AULA3");
        let attempt = input(&["CHI1"], vec![sitting("2025-06-16", "11:00", "AULA4")]);

        // Second semester: no shared cohort.
        let second = run(&conn, &attempt).expect("validate");
        assert_eq!(second.accepted.len(), 1);

        set_offering(&conn, "CHI1", "L31", Semester::Annual, None);
        let annual = run(&conn, &attempt).expect("validate");
        assert_eq!(annual.rejected.len(), 1);
        assert_eq!(annual.rejected[0].kind, RejectKind::OverlapViolation);
        assert_eq!(
            annual.rejected[0].reason,
            "overlaps with Analisi I (10:00, 120 min)"
        );
    }

    #[test]
    fn revalidating_unchanged_input_gives_identical_outcome() {
        let mut conn = seeded();
        persist(&mut conn, "ANA1", "2025-06-16", "10:00", "AULA3");
        let rules = SchedulingRules::default();
        let inp = input(
            &["FIS1", "GEO1", "NOPE"],
            vec![
                sitting("2025-06-16", "11:00", "AULA4"),
                sitting("2025-09-10", "09:00", "AULA4"),
            ],
        );
        let submission = parse_submission(&rules, &inp, "sub-again").expect("parse");
        let first = validate(&conn, &rules, &submission).expect("first");
        let second = validate(&conn, &rules, &submission).expect("second");
        assert!(!first.accepted.is_empty());
        assert!(!first.rejected.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn unparseable_time_is_malformed() {
        let rules = SchedulingRules::default();
        let mut s = sitting("2025-06-12", "9 o'clock", "AULA3");
        s.duration_minutes = None;
        let err = parse_submission(&rules, &input(&["ANA1"], vec![s]), "x").expect_err("bad");
        assert_eq!(err.code(), "malformed_input");
    }
}
