//! Campus time handling.
//!
//! All civil dates and times in the catalog are wall-clock values in one
//! canonical campus timezone. This module is the only place they are turned
//! into UTC instants, and it refuses DST-ambiguous or non-existent local
//! times outright: a silent one-hour shift would flip Present/Late/Absent
//! classifications.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{ServiceError, ServiceResult};
use crate::tenant::TenantPolicy;
use db::models::session;

#[derive(Debug, Clone, Copy)]
pub struct CampusClock {
    tz: Tz,
}

impl CampusClock {
    pub fn new(zone: &str) -> ServiceResult<Self> {
        let tz = zone
            .parse::<Tz>()
            .map_err(|_| ServiceError::UnknownTimezone(zone.to_owned()))?;
        Ok(Self { tz })
    }

    /// Convert a civil (date, time) pair to a UTC instant.
    pub fn instant(&self, date: NaiveDate, time: NaiveTime) -> ServiceResult<DateTime<Utc>> {
        match self.tz.from_local_datetime(&date.and_time(time)) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(_, _) | LocalResult::None => {
                Err(ServiceError::AmbiguousLocalTime {
                    date,
                    time,
                    zone: self.tz.to_string(),
                })
            }
        }
    }

    /// The campus-local calendar date of a UTC instant.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }
}

/// A session's time boundaries resolved to UTC instants, validated once so
/// the reconciliation core can work with plain comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub session_id: i64,
    /// Earliest instant at which a punch counts.
    pub pointage_start: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `start + tolerance`; entries up to here are on time.
    pub late_threshold: DateTime<Utc>,
    /// `end + grace`; punches up to here are still attributed to the session.
    pub grace_end: DateTime<Utc>,
}

impl SessionWindow {
    pub fn resolve(
        session: &session::Model,
        clock: &CampusClock,
        policy: &TenantPolicy,
    ) -> ServiceResult<Self> {
        if session.tolerance_minutes < 0 {
            return Err(ServiceError::InvalidSessionWindow {
                session_id: session.id,
                reason: format!("negative tolerance {}", session.tolerance_minutes),
            });
        }

        let pointage_start = clock.instant(session.date, session.pointage_start_time)?;
        let start = clock.instant(session.date, session.start_time)?;
        let end = clock.instant(session.date, session.end_time)?;

        if pointage_start > start || start > end {
            return Err(ServiceError::InvalidSessionWindow {
                session_id: session.id,
                reason: format!(
                    "expected pointage_start <= start <= end, got {} / {} / {}",
                    session.pointage_start_time, session.start_time, session.end_time
                ),
            });
        }

        Ok(Self {
            session_id: session.id,
            pointage_start,
            start,
            end,
            late_threshold: start + Duration::minutes(i64::from(session.tolerance_minutes)),
            grace_end: end + Duration::minutes(policy.grace_minutes),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Upcoming,
    InProgress,
    /// Past `end` but punches are still attributed (late exits).
    GracePeriod,
    Closed,
}

/// The one shared phase function. `now` is always injected; nothing in the
/// engine reads the wall clock.
pub fn session_phase(window: &SessionWindow, now: DateTime<Utc>) -> SessionPhase {
    if now < window.start {
        SessionPhase::Upcoming
    } else if now < window.end {
        SessionPhase::InProgress
    } else if now < window.grace_end {
        SessionPhase::GracePeriod
    } else {
        SessionPhase::Closed
    }
}
