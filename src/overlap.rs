//! Full-dataset recomputation of the per-offering overlap counter.
//!
//! For every (course, CdS, academic year) triple, each distinct date carrying a
//! visible sitting of the course in that CdS counts once when another course
//! taught by different teachers, whose offering shares students with it, has a
//! visible sitting in the same CdS on the same date and period. Exams are keyed
//! by the CdS they were stored under.

use crate::model::{fmt_date, CourseOffering, ExamSlot, Period};
use crate::rules::SchedulingRules;
use crate::store;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct OfferingOverlap {
    pub course_code: String,
    pub title: String,
    pub cds_code: String,
    pub academic_year: i64,
    pub overlap_count: i64,
    pub dates: Vec<NaiveDate>,
}

impl OfferingOverlap {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "courseCode": self.course_code,
            "title": self.title,
            "cdsCode": self.cds_code,
            "academicYear": self.academic_year,
            "overlapCount": self.overlap_count,
            "dates": self.dates.iter().map(|d| fmt_date(*d)).collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlapReport {
    pub processed: usize,
    pub with_overlap: usize,
    pub offerings: Vec<OfferingOverlap>,
    pub errors: Vec<String>,
}

impl OverlapReport {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "processed": self.processed,
            "withOverlap": self.with_overlap,
            "offerings": self.offerings.iter().map(|o| o.to_json()).collect::<Vec<_>>(),
            "errors": self.errors,
        })
    }
}

type Triple = (String, String, i64);
type SlotKey = (String, i64, NaiveDate, Period);

struct Sweep<'a> {
    conn: &'a Connection,
    rules: &'a SchedulingRules,
    offerings: Vec<CourseOffering>,
    by_slot: HashMap<SlotKey, Vec<ExamSlot>>,
    by_course: HashMap<Triple, BTreeSet<(NaiveDate, Period)>>,
    teachers: HashMap<(String, i64), BTreeSet<String>>,
}

impl<'a> Sweep<'a> {
    fn load(conn: &'a Connection, rules: &'a SchedulingRules) -> anyhow::Result<Self> {
        let offerings = store::list_offerings(conn, None)?;
        let mut by_slot: HashMap<SlotKey, Vec<ExamSlot>> = HashMap::new();
        let mut by_course: HashMap<Triple, BTreeSet<(NaiveDate, Period)>> = HashMap::new();
        for e in store::list_exams(conn, None, None)? {
            if !e.visible {
                continue;
            }
            by_course
                .entry((e.course_id.clone(), e.cds_code.clone(), e.academic_year))
                .or_default()
                .insert((e.date, e.period));
            by_slot
                .entry((e.cds_code.clone(), e.academic_year, e.date, e.period))
                .or_default()
                .push(e);
        }
        Ok(Self {
            conn,
            rules,
            offerings,
            by_slot,
            by_course,
            teachers: HashMap::new(),
        })
    }

    fn teachers(&mut self, course_id: &str, year: i64) -> anyhow::Result<BTreeSet<String>> {
        let key = (course_id.to_string(), year);
        if let Some(hit) = self.teachers.get(&key) {
            return Ok(hit.clone());
        }
        let set = store::teachers_for_course(self.conn, course_id, year)?;
        self.teachers.insert(key, set.clone());
        Ok(set)
    }

    fn triples(&self) -> BTreeMap<Triple, Vec<CourseOffering>> {
        let mut out: BTreeMap<Triple, Vec<CourseOffering>> = BTreeMap::new();
        for o in &self.offerings {
            out.entry((o.course_id.clone(), o.cds_code.clone(), o.academic_year))
                .or_default()
                .push(o.clone());
        }
        out
    }

    /// Courses whose students overlap with the triple's and that share no teacher with it.
    fn conflicting_courses(
        &mut self,
        course_id: &str,
        year: i64,
        own: &[CourseOffering],
    ) -> anyhow::Result<BTreeSet<String>> {
        let own_teachers = self.teachers(course_id, year)?;
        let peers: Vec<String> = self
            .offerings
            .iter()
            .filter(|other| {
                other.course_id != course_id
                    && own.iter().any(|o| {
                        o.shares_context(other, &self.rules.generic_curriculum)
                            && !o.is_mutuation_pair(other)
                    })
            })
            .map(|other| other.course_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut out = BTreeSet::new();
        for peer in peers {
            if self.teachers(&peer, year)?.is_disjoint(&own_teachers) {
                out.insert(peer);
            }
        }
        Ok(out)
    }

    fn count_triple(
        &mut self,
        (course_id, cds_code, year): &Triple,
        own: &[CourseOffering],
    ) -> anyhow::Result<OfferingOverlap> {
        let conflicting = self.conflicting_courses(course_id, *year, own)?;
        let slots = self
            .by_course
            .get(&(course_id.clone(), cds_code.clone(), *year))
            .cloned()
            .unwrap_or_default();

        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
        for (date, period) in slots {
            let clash = self
                .by_slot
                .get(&(cds_code.clone(), *year, date, period))
                .is_some_and(|others| others.iter().any(|e| conflicting.contains(&e.course_id)));
            if clash {
                dates.insert(date);
            }
        }

        let count = dates.len() as i64;
        self.conn.execute(
            "UPDATE course_offerings SET overlap_count = ?
             WHERE course_id = ? AND cds_code = ? AND academic_year = ?",
            params![count, course_id, cds_code, year],
        )?;

        let first = &own[0];
        Ok(OfferingOverlap {
            course_code: first.course_code.clone(),
            title: first.course_title.clone(),
            cds_code: cds_code.clone(),
            academic_year: *year,
            overlap_count: count,
            dates: dates.into_iter().collect(),
        })
    }
}

/// Resets and re-derives `overlap_count` for every offering in one transaction.
/// A failing triple is reported in `errors` without stopping the sweep.
pub fn recompute_all(conn: &mut Connection, rules: &SchedulingRules) -> anyhow::Result<OverlapReport> {
    let tx = conn.transaction()?;
    tx.execute("UPDATE course_offerings SET overlap_count = 0", [])?;

    let mut report = OverlapReport::default();
    {
        let mut sweep = Sweep::load(&tx, rules)?;
        for (triple, own) in sweep.triples() {
            report.processed += 1;
            match sweep.count_triple(&triple, &own) {
                Ok(detail) => {
                    if detail.overlap_count > 0 {
                        report.with_overlap += 1;
                    }
                    report.offerings.push(detail);
                }
                Err(e) => {
                    tracing::warn!("overlap recompute failed for {}/{}: {e:#}", triple.1, triple.2);
                    report.errors.push(format!(
                        "{} {} {}: {e:#}",
                        own[0].course_code, triple.1, triple.2
                    ));
                }
            }
        }
    }
    tx.commit()?;

    tracing::info!(
        "overlap recompute: {} processed, {} with overlap, {} errors",
        report.processed,
        report.with_overlap,
        report.errors.len()
    );
    Ok(report)
}
