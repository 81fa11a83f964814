//! Attendance query surface: read-only routes consumed by the UI and
//! reporting layer. All recomputation goes through the same reconcile
//! function the batch uses; nothing here writes.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::response::ApiResponse;
use crate::state::AppState;
use db::models::{absence, student};
use services::error::ServiceError;
use services::punch::HttpPunchSource;
use services::reconcile::AttendanceStatus;
use services::tracker::{self, TrackQuery, TrackedSession};

#[derive(Debug, Deserialize)]
pub struct TrackParams {
    pub tenant: String,
    pub student: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub status: Option<String>,
    /// Cutoff used for Absent finalization in the live view; same default
    /// as the batch.
    pub hours: Option<i64>,
}

#[derive(Debug, Default, Serialize)]
pub struct TrackData {
    pub rows: Vec<TrackedSession>,
}

fn parse_status(raw: &str) -> Option<AttendanceStatus> {
    match raw {
        "present" => Some(AttendanceStatus::Present),
        "late" => Some(AttendanceStatus::Late),
        "absent" => Some(AttendanceStatus::Absent),
        "pending_exit" => Some(AttendanceStatus::PendingExit),
        "pending_entry" => Some(AttendanceStatus::PendingEntry),
        "excused" => Some(AttendanceStatus::Excused),
        _ => None,
    }
}

fn service_error_response<T: Serialize + Default>(
    err: ServiceError,
) -> (StatusCode, Json<ApiResponse<T>>) {
    let status = match &err {
        ServiceError::TenantUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::UnknownMatricule(_) | ServiceError::QrTokenNotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %err, "attendance query failed");
    (status, Json(ApiResponse::error(err.to_string())))
}

async fn run_track(
    state: &AppState,
    params: &TrackParams,
) -> Result<Vec<TrackedSession>, ServiceError> {
    let config = state.directory.get(&params.tenant).ok_or_else(|| {
        ServiceError::unavailable(&params.tenant, "not in tenant registry")
    })?;
    let db = state.directory.connect(&params.tenant).await?;
    let source = HttpPunchSource::new(config)?;

    let query = TrackQuery {
        matricule: params.student.clone(),
        from: params.from,
        to: params.to,
        status_filter: params.status.as_deref().and_then(parse_status),
    };
    tracker::track(
        &db,
        &state.clock,
        &source,
        &query,
        &config.policy,
        params.hours.unwrap_or(1),
        Utc::now(),
    )
    .await
}

/// GET `/api/attendance/track`
///
/// Live per-session detail for one student over a date range: status,
/// entry/exit instants, device name, minutes late. Recomputed on the fly,
/// never persisted.
pub async fn track(
    State(state): State<AppState>,
    Query(params): Query<TrackParams>,
) -> (StatusCode, Json<ApiResponse<TrackData>>) {
    if state.directory.get(&params.tenant).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Tenant not found")),
        );
    }
    match run_track(&state, &params).await {
        Ok(rows) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                TrackData { rows },
                "Attendance recomputed",
            )),
        ),
        Err(err) => service_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct AbsenceParams {
    pub tenant: String,
    pub student: String,
}

#[derive(Debug, Default, Serialize)]
pub struct AbsenceData {
    pub absences: Vec<absence::Model>,
}

/// GET `/api/attendance/absences`
///
/// The persisted ledger for one student: session type, date, status,
/// justification fields.
pub async fn absences(
    State(state): State<AppState>,
    Query(params): Query<AbsenceParams>,
) -> (StatusCode, Json<ApiResponse<AbsenceData>>) {
    if state.directory.get(&params.tenant).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Tenant not found")),
        );
    }
    let result: Result<Vec<absence::Model>, ServiceError> = async {
        let db = state.directory.connect(&params.tenant).await?;
        let student = student::Entity::find()
            .filter(student::Column::Matricule.eq(params.student.as_str()))
            .one(&db)
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::UnknownMatricule(params.student.clone()))?;
        let rows = absence::Entity::find()
            .filter(absence::Column::StudentId.eq(student.id))
            .order_by_desc(absence::Column::Date)
            .all(&db)
            .await
            .map_err(ServiceError::from)?;
        Ok(rows)
    }
    .await;

    match result {
        Ok(rows) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                AbsenceData { absences: rows },
                "Absence records retrieved",
            )),
        ),
        Err(err) => service_error_response(err),
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SummaryData {
    pub counts: BTreeMap<String, u32>,
    pub total_minutes_late: i64,
}

pub fn summarize(rows: &[TrackedSession]) -> SummaryData {
    let mut data = SummaryData::default();
    for row in rows {
        let key = serde_json::to_value(row.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| format!("{:?}", row.status));
        *data.counts.entry(key).or_insert(0) += 1;
        data.total_minutes_late += row.minutes_late;
    }
    data
}

/// GET `/api/attendance/summary`
///
/// Per-status aggregate counts over the same recomputation as `/track`.
pub async fn summary(
    State(state): State<AppState>,
    Query(params): Query<TrackParams>,
) -> (StatusCode, Json<ApiResponse<SummaryData>>) {
    if state.directory.get(&params.tenant).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Tenant not found")),
        );
    }
    match run_track(&state, &params).await {
        Ok(rows) => (
            StatusCode::OK,
            Json(ApiResponse::success(
                summarize(&rows),
                "Attendance summarized",
            )),
        ),
        Err(err) => service_error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_the_serialized_form() {
        assert_eq!(parse_status("late"), Some(AttendanceStatus::Late));
        assert_eq!(
            parse_status("pending_exit"),
            Some(AttendanceStatus::PendingExit)
        );
        assert_eq!(parse_status("n'importe quoi"), None);
    }

    #[test]
    fn summary_counts_by_status() {
        let row = |status, minutes| TrackedSession {
            session_id: 1,
            session_type: db::models::session::SessionType::Course,
            title: "Analyse 2".into(),
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            status,
            provisional: None,
            minutes_late: minutes,
            entry_time: None,
            exit_time: None,
            device_name: None,
            left_early: false,
        };
        let rows = vec![
            row(AttendanceStatus::Late, 5),
            row(AttendanceStatus::Late, 10),
            row(AttendanceStatus::Absent, 0),
        ];
        let data = summarize(&rows);
        assert_eq!(data.counts.get("late"), Some(&2));
        assert_eq!(data.counts.get("absent"), Some(&1));
        assert_eq!(data.total_minutes_late, 15);
    }
}
