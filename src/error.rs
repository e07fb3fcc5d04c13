use serde_json::json;

/// Errors that abort a whole submission before any candidate is partitioned.
#[derive(Debug)]
pub enum ScheduleError {
    MalformedInput {
        message: String,
        details: Option<serde_json::Value>,
    },
    WeekendRejected {
        date: String,
        sitting: usize,
    },
    RoomConflict {
        date: String,
        room: String,
        period: String,
    },
    Store(anyhow::Error),
}

impl ScheduleError {
    pub fn malformed(message: impl Into<String>) -> Self {
        ScheduleError::MalformedInput {
            message: message.into(),
            details: None,
        }
    }

    pub fn malformed_at(message: impl Into<String>, sitting: usize) -> Self {
        ScheduleError::MalformedInput {
            message: message.into(),
            details: Some(json!({ "sitting": sitting })),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::MalformedInput { .. } => "malformed_input",
            ScheduleError::WeekendRejected { .. } => "weekend_rejected",
            ScheduleError::RoomConflict { .. } => "room_conflict",
            ScheduleError::Store(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ScheduleError::MalformedInput { details, .. } => details.clone(),
            ScheduleError::WeekendRejected { date, sitting } => {
                Some(json!({ "date": date, "sitting": sitting }))
            }
            ScheduleError::RoomConflict { date, room, period } => {
                Some(json!({ "date": date, "room": room, "period": period }))
            }
            ScheduleError::Store(_) => None,
        }
    }
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::MalformedInput { message, .. } => write!(f, "malformed input: {message}"),
            ScheduleError::WeekendRejected { date, .. } => {
                write!(f, "exams cannot be scheduled on a weekend ({date})")
            }
            ScheduleError::RoomConflict { date, room, period } => {
                write!(f, "room {room} is already booked on {date} ({period})")
            }
            ScheduleError::Store(e) => write!(f, "store error: {e:#}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

impl From<anyhow::Error> for ScheduleError {
    fn from(e: anyhow::Error) -> Self {
        ScheduleError::Store(e)
    }
}

impl From<rusqlite::Error> for ScheduleError {
    fn from(e: rusqlite::Error) -> Self {
        ScheduleError::Store(e.into())
    }
}

/// Why a single (course, date) pair was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    MalformedSitting,
    OfferingNotFound,
    SessionNotFound,
    SpacingViolation,
    OverlapViolation,
}

impl RejectKind {
    pub fn code(self) -> &'static str {
        match self {
            RejectKind::MalformedSitting => "malformed_sitting",
            RejectKind::OfferingNotFound => "offering_not_found",
            RejectKind::SessionNotFound => "session_not_found",
            RejectKind::SpacingViolation => "spacing_violation",
            RejectKind::OverlapViolation => "overlap_violation",
        }
    }
}
