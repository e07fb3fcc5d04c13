use crate::db;
use crate::model::{fmt_time, parse_time};
use chrono::NaiveTime;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const SETTINGS_KEY: &str = "setup.scheduling";

/// Tunable constants of the constraint pipeline, stored per workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingRules {
    pub min_spacing_days: i64,
    pub registration_lead_days: i64,
    pub office_room: String,
    pub generic_curriculum: String,
    pub afternoon_starts_at: NaiveTime,
    pub default_duration_minutes: i64,
    pub max_duration_minutes: i64,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            min_spacing_days: 14,
            registration_lead_days: 20,
            office_room: "STUDIO".to_string(),
            generic_curriculum: "GEN".to_string(),
            afternoon_starts_at: NaiveTime::from_hms_opt(14, 0, 0).unwrap_or_default(),
            default_duration_minutes: 120,
            max_duration_minutes: 600,
        }
    }
}

impl SchedulingRules {
    pub fn is_office(&self, room: &str) -> bool {
        room.eq_ignore_ascii_case(&self.office_room)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "minSpacingDays": self.min_spacing_days,
            "registrationLeadDays": self.registration_lead_days,
            "officeRoom": self.office_room,
            "genericCurriculum": self.generic_curriculum,
            "afternoonStartsAt": fmt_time(self.afternoon_starts_at),
            "defaultDurationMinutes": self.default_duration_minutes,
            "maxDurationMinutes": self.max_duration_minutes,
        })
    }

    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        for (k, v) in patch {
            match k.as_str() {
                "minSpacingDays" => self.min_spacing_days = parse_i64_range(v, k, 1, 60)?,
                "registrationLeadDays" => {
                    self.registration_lead_days = parse_i64_range(v, k, 0, 90)?
                }
                "officeRoom" => self.office_room = parse_code(v, k)?,
                "genericCurriculum" => self.generic_curriculum = parse_code(v, k)?,
                "afternoonStartsAt" => {
                    let s = v.as_str().ok_or_else(|| format!("{} must be string", k))?;
                    self.afternoon_starts_at =
                        parse_time(s).ok_or_else(|| format!("{} must be HH:MM", k))?;
                }
                "defaultDurationMinutes" => {
                    self.default_duration_minutes = parse_i64_range(v, k, 1, 1440)?
                }
                "maxDurationMinutes" => {
                    self.max_duration_minutes = parse_i64_range(v, k, 1, 1440)?
                }
                _ => return Err(format!("unknown scheduling field: {}", k)),
            }
        }
        if self.default_duration_minutes > self.max_duration_minutes {
            return Err("defaultDurationMinutes must be <= maxDurationMinutes".into());
        }
        Ok(())
    }
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_code(v: &Value, key: &str) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() || s.len() > 32 {
        return Err(format!("{} must be 1..=32 characters", key));
    }
    Ok(s.to_string())
}

pub fn load(conn: &Connection) -> anyhow::Result<SchedulingRules> {
    let mut rules = SchedulingRules::default();
    if let Some(saved) = db::settings_get_json(conn, SETTINGS_KEY)? {
        if let Some(obj) = saved.as_object() {
            let mut candidate = rules.clone();
            match candidate.apply_patch(obj) {
                Ok(()) => rules = candidate,
                Err(msg) => tracing::warn!("ignoring stored scheduling rules: {msg}"),
            }
        }
    }
    Ok(rules)
}

pub fn save(conn: &Connection, rules: &SchedulingRules) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &rules.to_json())
}
