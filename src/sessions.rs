use crate::model::{fmt_date, Session, SessionKind};
use crate::rules::SchedulingRules;
use crate::store;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMatch {
    pub kind: SessionKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub curriculum_code: String,
    /// Set when the window was taken from the previous year's winter session.
    pub borrowed_from_year: Option<i64>,
}

impl SessionMatch {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "kind": self.kind.as_str(),
            "startDate": fmt_date(self.start),
            "endDate": fmt_date(self.end),
            "curriculumCode": self.curriculum_code,
            "borrowedFromYear": self.borrowed_from_year,
        })
    }
}

/// Windows for the curriculum, or the generic curriculum's windows when it has none.
/// A curriculum with any stored window never sees the generic ones.
fn windows_with_fallback(
    conn: &Connection,
    rules: &SchedulingRules,
    cds_code: &str,
    curriculum_code: &str,
    academic_year: i64,
) -> anyhow::Result<Vec<Session>> {
    let own = store::sessions_for(conn, cds_code, curriculum_code, academic_year)?;
    if !own.is_empty() || curriculum_code == rules.generic_curriculum {
        return Ok(own);
    }
    store::sessions_for(conn, cds_code, &rules.generic_curriculum, academic_year)
}

/// Finds the exam session containing `date`, testing kinds in priority order.
pub fn resolve(
    conn: &Connection,
    rules: &SchedulingRules,
    date: NaiveDate,
    cds_code: &str,
    curriculum_code: &str,
    academic_year: i64,
) -> anyhow::Result<Option<SessionMatch>> {
    let windows = windows_with_fallback(conn, rules, cds_code, curriculum_code, academic_year)?;
    let has_anticipata = windows.iter().any(|s| s.kind == SessionKind::Anticipata);

    for kind in SessionKind::ORDER {
        if kind == SessionKind::Anticipata && !has_anticipata {
            let previous = windows_with_fallback(
                conn,
                rules,
                cds_code,
                curriculum_code,
                academic_year - 1,
            )?;
            let borrowed = previous
                .iter()
                .find(|s| s.kind == SessionKind::Invernale && s.contains(date));
            if let Some(s) = borrowed {
                return Ok(Some(SessionMatch {
                    kind: SessionKind::Anticipata,
                    start: s.start,
                    end: s.end,
                    curriculum_code: s.curriculum_code.clone(),
                    borrowed_from_year: Some(s.academic_year),
                }));
            }
            continue;
        }
        if let Some(s) = windows.iter().find(|s| s.kind == kind && s.contains(date)) {
            return Ok(Some(SessionMatch {
                kind,
                start: s.start,
                end: s.end,
                curriculum_code: s.curriculum_code.clone(),
                borrowed_from_year: None,
            }));
        }
    }

    tracing::debug!(
        "no session for {} in {}/{} year {}",
        fmt_date(date),
        cds_code,
        curriculum_code,
        academic_year
    );
    Ok(None)
}
