use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::Deserialize;
use serde_json::json;

pub const DATE_FMT: &str = "%Y-%m-%d";
pub const TIME_FMT: &str = "%H:%M";

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FMT).ok()
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let t = s.trim();
    NaiveTime::parse_from_str(t, TIME_FMT)
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
        .ok()
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

pub fn fmt_time(t: NaiveTime) -> String {
    t.format(TIME_FMT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semester {
    First,
    Second,
    Annual,
}

impl Semester {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            3 => Some(Self::Annual),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::First => 1,
            Self::Second => 2,
            Self::Annual => 3,
        }
    }

    /// Annual courses run alongside both halves of the year.
    pub fn compatible_with(self, other: Semester) -> bool {
        self == Semester::Annual || other == Semester::Annual || self == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Anticipata,
    Estiva,
    Autunnale,
    Invernale,
}

impl SessionKind {
    /// Resolution priority.
    pub const ORDER: [SessionKind; 4] = [
        SessionKind::Anticipata,
        SessionKind::Estiva,
        SessionKind::Autunnale,
        SessionKind::Invernale,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anticipata" => Some(Self::Anticipata),
            "estiva" => Some(Self::Estiva),
            "autunnale" => Some(Self::Autunnale),
            "invernale" => Some(Self::Invernale),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anticipata => "anticipata",
            Self::Estiva => "estiva",
            Self::Autunnale => "autunnale",
            Self::Invernale => "invernale",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    Morning,
    Afternoon,
}

impl Period {
    pub fn for_start(start: NaiveTime, afternoon_starts_at: NaiveTime) -> Self {
        if start < afternoon_starts_at {
            Period::Morning
        } else {
            Period::Afternoon
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(Self::Morning),
            "afternoon" => Some(Self::Afternoon),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub id: String,
    pub code: String,
    pub title: String,
}

/// Resolved "mutuazione" reference: the offering shares the sittings of this master.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterRef {
    pub course_code: String,
    pub program_code: String,
    pub curriculum_code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseOffering {
    pub id: String,
    pub course_id: String,
    pub course_code: String,
    pub course_title: String,
    pub cds_code: String,
    pub curriculum_code: String,
    pub academic_year: i64,
    pub year_of_study: i64,
    pub semester: Semester,
    pub master: Option<MasterRef>,
    pub overlap_count: i64,
}

impl CourseOffering {
    /// Whether students of `self` and `other` can be in the same exam cohort.
    pub fn shares_context(&self, other: &CourseOffering, generic_curriculum: &str) -> bool {
        self.academic_year == other.academic_year
            && self.cds_code == other.cds_code
            && (self.curriculum_code == other.curriculum_code
                || self.curriculum_code == generic_curriculum
                || other.curriculum_code == generic_curriculum)
            && self.year_of_study == other.year_of_study
            && self.semester.compatible_with(other.semester)
    }

    fn is_master_of(&self, other: &CourseOffering) -> bool {
        other.master.as_ref().is_some_and(|m| {
            m.course_code == self.course_code
                && m.program_code == self.cds_code
                && m.curriculum_code == self.curriculum_code
        })
    }

    /// Cross-listed offerings sit the same exam and never conflict with each other.
    pub fn is_mutuation_pair(&self, other: &CourseOffering) -> bool {
        self.is_master_of(other) || other.is_master_of(self)
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "courseCode": self.course_code,
            "title": self.course_title,
            "cdsCode": self.cds_code,
            "curriculumCode": self.curriculum_code,
            "academicYear": self.academic_year,
            "yearOfStudy": self.year_of_study,
            "semester": self.semester.as_i64(),
            "master": self.master.as_ref().map(|m| json!({
                "courseCode": m.course_code,
                "programCode": m.program_code,
                "curriculumCode": m.curriculum_code,
            })),
            "overlapCount": self.overlap_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub cds_code: String,
    pub curriculum_code: String,
    pub academic_year: i64,
    pub kind: SessionKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Session {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub code: String,
    pub name: String,
    pub capacity: i64,
}

/// Half-open `[start, start + duration)` range in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: NaiveTime, duration_minutes: i64) -> Self {
        let start = i64::from(start.hour()) * 60 + i64::from(start.minute());
        Self {
            start,
            end: start + duration_minutes.max(0),
        }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A persisted exam sitting.
#[derive(Debug, Clone, PartialEq)]
pub struct ExamSlot {
    pub id: String,
    pub course_id: String,
    pub course_code: String,
    pub course_title: String,
    pub cds_code: String,
    pub curriculum_code: String,
    pub academic_year: i64,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub duration_minutes: i64,
    pub room: String,
    pub period: Period,
    pub visible: bool,
    pub exam_type: Option<String>,
    pub teacher: String,
    pub registration_start: Option<NaiveDate>,
    pub registration_end: Option<NaiveDate>,
    pub session_kind: Option<SessionKind>,
}

impl ExamSlot {
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start, self.duration_minutes)
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "courseCode": self.course_code,
            "title": self.course_title,
            "cdsCode": self.cds_code,
            "curriculumCode": self.curriculum_code,
            "academicYear": self.academic_year,
            "date": fmt_date(self.date),
            "startTime": fmt_time(self.start),
            "durationMinutes": self.duration_minutes,
            "room": self.room,
            "period": self.period.as_str(),
            "visible": self.visible,
            "examType": self.exam_type,
            "teacher": self.teacher,
            "registrationStart": self.registration_start.map(fmt_date),
            "registrationEnd": self.registration_end.map(fmt_date),
            "sessionKind": self.session_kind.map(|k| k.as_str()),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SittingInput {
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub room: Option<String>,
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapMode {
    #[default]
    First,
    All,
}

/// Submission as received from the caller, before any parsing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionInput {
    pub teacher: Option<String>,
    pub academic_year: Option<i64>,
    #[serde(default)]
    pub course_codes: Vec<String>,
    #[serde(default)]
    pub sittings: Vec<SittingInput>,
    pub registration_start: Option<String>,
    pub registration_end: Option<String>,
    pub exam_type: Option<String>,
    pub visible: Option<bool>,
    pub notes: Option<String>,
    #[serde(default)]
    pub bypass_validation: bool,
    #[serde(default)]
    pub overlap_mode: OverlapMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sitting {
    pub index: usize,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub room: String,
    pub duration_minutes: Option<i64>,
    pub period: Period,
}

/// Fields shared by every candidate of one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonFields {
    pub submission_id: String,
    pub teacher: String,
    pub academic_year: i64,
    pub exam_type: Option<String>,
    pub visible: bool,
    pub notes: Option<String>,
    pub registration_start: Option<NaiveDate>,
    pub registration_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub common: CommonFields,
    pub course_codes: Vec<String>,
    pub sittings: Vec<Sitting>,
    pub bypass_validation: bool,
    pub overlap_mode: OverlapMode,
}

/// One (course, sitting) pair under evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExamCandidate {
    pub course_code: String,
    pub sitting_index: usize,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub duration_minutes: i64,
    pub room: String,
    pub period: Period,
    pub visible: bool,
    pub registration_start: Option<NaiveDate>,
    pub registration_end: Option<NaiveDate>,
    pub session_kind: Option<SessionKind>,
}

impl ExamCandidate {
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start, self.duration_minutes)
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "courseCode": self.course_code,
            "date": fmt_date(self.date),
            "startTime": fmt_time(self.start),
            "durationMinutes": self.duration_minutes,
            "room": self.room,
            "period": self.period.as_str(),
            "visible": self.visible,
            "registrationStart": self.registration_start.map(fmt_date),
            "registrationEnd": self.registration_end.map(fmt_date),
            "sessionKind": self.session_kind.map(|k| k.as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offering(curriculum: &str, year_of_study: i64, semester: Semester) -> CourseOffering {
        CourseOffering {
            id: "o".into(),
            course_id: "c".into(),
            course_code: "C".into(),
            course_title: "Course".into(),
            cds_code: "L31".into(),
            curriculum_code: curriculum.into(),
            academic_year: 2024,
            year_of_study,
            semester,
            master: None,
            overlap_count: 0,
        }
    }

    #[test]
    fn annual_semester_is_compatible_with_both_halves() {
        assert!(Semester::Annual.compatible_with(Semester::First));
        assert!(Semester::Second.compatible_with(Semester::Annual));
        assert!(!Semester::First.compatible_with(Semester::Second));
    }

    #[test]
    fn generic_curriculum_matches_any_track() {
        let a = offering("GEN", 2, Semester::First);
        let b = offering("INF", 2, Semester::First);
        let c = offering("MAT", 2, Semester::First);
        assert!(a.shares_context(&b, "GEN"));
        assert!(!b.shares_context(&c, "GEN"));
        assert!(!b.shares_context(&offering("INF", 3, Semester::First), "GEN"));
    }

    #[test]
    fn time_ranges_are_half_open() {
        let ten = parse_time("10:00").expect("time");
        let twelve = parse_time("12:00").expect("time");
        let eleven = parse_time("11:00").expect("time");
        let a = TimeRange::new(ten, 120);
        assert!(a.overlaps(&TimeRange::new(eleven, 120)));
        assert!(!a.overlaps(&TimeRange::new(twelve, 60)));
    }

    #[test]
    fn period_splits_on_threshold() {
        let threshold = parse_time("14:00").expect("time");
        assert_eq!(
            Period::for_start(parse_time("13:59").expect("time"), threshold),
            Period::Morning
        );
        assert_eq!(Period::for_start(threshold, threshold), Period::Afternoon);
    }

    #[test]
    fn slots_order_by_date_then_morning_first() {
        let d = |s: &str| parse_date(s).expect("date");
        let slots: std::collections::BTreeSet<(NaiveDate, Period)> = [
            (d("2025-06-17"), Period::Morning),
            (d("2025-06-16"), Period::Afternoon),
            (d("2025-06-16"), Period::Morning),
        ]
        .into_iter()
        .collect();
        let ordered: Vec<_> = slots.into_iter().collect();
        assert_eq!(
            ordered,
            vec![
                (d("2025-06-16"), Period::Morning),
                (d("2025-06-16"), Period::Afternoon),
                (d("2025-06-17"), Period::Morning),
            ]
        );
    }
}
