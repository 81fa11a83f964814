//! On-demand attendance tracking.
//!
//! Recomputes a student's status live over a date range, through the exact
//! same `reconcile` function the batch runs, so the live view and the
//! persisted ledger can never disagree on classification. Nothing here
//! writes.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use tracing::warn;

use crate::catalog::{self, SessionTypeFilter};
use crate::clock::{CampusClock, SessionWindow};
use crate::error::{ServiceError, ServiceResult};
use crate::punch::{self, FetchWindow, PunchEventSource};
use crate::qr;
use crate::reconcile::{self, AttendanceStatus, ReconcilePolicy};
use crate::tenant::TenantPolicy;
use db::models::session::SessionType;
use db::models::{absence, device, student};

#[derive(Debug, Clone)]
pub struct TrackQuery {
    pub matricule: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub status_filter: Option<AttendanceStatus>,
}

/// Richer per-session detail than the ledger keeps: which device saw the
/// entry, exact entry/exit instants, provisional classification.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedSession {
    pub session_id: i64,
    pub session_type: SessionType,
    pub title: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub provisional: Option<AttendanceStatus>,
    pub minutes_late: i64,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub device_name: Option<String>,
    pub left_early: bool,
}

pub async fn track(
    db: &DatabaseConnection,
    clock: &CampusClock,
    source: &dyn PunchEventSource,
    query: &TrackQuery,
    policy: &TenantPolicy,
    cutoff_hours: i64,
    now: DateTime<Utc>,
) -> ServiceResult<Vec<TrackedSession>> {
    let student = student::Entity::find()
        .filter(student::Column::Matricule.eq(query.matricule.as_str()))
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::UnknownMatricule(query.matricule.clone()))?;

    let sessions =
        catalog::sessions_in_range(db, query.from, query.to, SessionTypeFilter::Both).await?;
    let reconcile_policy = ReconcilePolicy::for_run(cutoff_hours, policy);

    let mut rows = Vec::new();
    for session in sessions {
        if !catalog::in_scope(&student, &session) {
            continue;
        }

        let window = match SessionWindow::resolve(&session, clock, policy) {
            Ok(w) => w,
            Err(err) => {
                warn!(session = session.id, error = %err, "skipping unresolvable session");
                continue;
            }
        };

        let devices = crate::device_directory::devices_for_session(db, session.id).await?;
        // Sessions without hardware readers are QR-only; nothing to ask the
        // vendor for.
        let fetched = if devices.is_empty() {
            Default::default()
        } else {
            source
                .fetch(
                    &devices,
                    FetchWindow {
                        from: window.pointage_start,
                        to: window.grace_end,
                    },
                )
                .await?
        };

        let mut events: Vec<_> = fetched
            .events
            .into_iter()
            .filter(|e| e.matricule == student.matricule)
            .collect();
        events.extend(
            qr::scans_as_punches(db, session.id)
                .await?
                .into_iter()
                .filter(|e| e.matricule == student.matricule),
        );
        let events = punch::dedup(events, policy.dedup_window_seconds);

        let Some(result) =
            reconcile::reconcile(&window, student.id, &events, now, &reconcile_policy)
        else {
            continue;
        };

        let record = absence::Entity::find()
            .filter(absence::Column::SessionId.eq(session.id))
            .filter(absence::Column::StudentId.eq(student.id))
            .one(db)
            .await?;
        let result = result.with_justification(record.as_ref());

        rows.push(to_row(&session, result, &devices));
    }

    if let Some(wanted) = query.status_filter {
        rows.retain(|r| r.status == wanted);
    }
    Ok(rows)
}

fn to_row(
    session: &db::models::session::Model,
    result: reconcile::ReconciliationResult,
    devices: &[device::Model],
) -> TrackedSession {
    let device_name = result
        .entry
        .as_ref()
        .and_then(|p| p.device_id)
        .and_then(|id| devices.iter().find(|d| d.id == id))
        .map(|d| d.name.clone());

    TrackedSession {
        session_id: session.id,
        session_type: session.session_type,
        title: session.title.clone(),
        date: session.date,
        status: result.status,
        provisional: result.provisional,
        minutes_late: result.minutes_late,
        entry_time: result.entry.as_ref().map(|p| p.at),
        exit_time: result.exit.as_ref().map(|p| p.at),
        device_name,
        left_early: result.left_early,
    }
}
