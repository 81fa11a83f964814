//! QR presence channel.
//!
//! A lecturer opens a QR window for a session; students scan the token
//! before it expires. Accepted scans enter the same reconciliation pipeline
//! as hardware punches. The engine does not care which channel saw the
//! student, only when.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::info;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::punch::PunchEvent;
use db::models::{qr_scan, qr_session, student};
use db::models::qr_scan::QrScanStatus;

#[derive(Debug, Clone, serde::Serialize)]
pub struct IssuedQr {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn issue(
    db: &DatabaseConnection,
    session_id: i64,
    ttl_minutes: i64,
    now: DateTime<Utc>,
) -> ServiceResult<IssuedQr> {
    let token = Uuid::new_v4().to_string();
    let expires_at = now + Duration::minutes(ttl_minutes);
    qr_session::ActiveModel {
        session_id: Set(session_id),
        token: Set(token.clone()),
        expires_at: Set(expires_at),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(session = session_id, "QR window opened");
    Ok(IssuedQr { token, expires_at })
}

/// Record one scan attempt. Every attempt is persisted with its outcome;
/// only `Accepted` ones will ever reach the engine.
pub async fn record_scan(
    db: &DatabaseConnection,
    token: &str,
    matricule: &str,
    now: DateTime<Utc>,
) -> ServiceResult<QrScanStatus> {
    let qr = qr_session::Entity::find()
        .filter(qr_session::Column::Token.eq(token))
        .one(db)
        .await?
        .ok_or(ServiceError::QrTokenNotFound)?;

    let student = student::Entity::find()
        .filter(student::Column::Matricule.eq(matricule))
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::UnknownMatricule(matricule.to_owned()))?;

    let status = if now > qr.expires_at {
        QrScanStatus::Expired
    } else if has_accepted_scan(db, qr.id, student.id).await? {
        QrScanStatus::Duplicate
    } else {
        QrScanStatus::Accepted
    };

    qr_scan::ActiveModel {
        qr_session_id: Set(qr.id),
        student_id: Set(student.id),
        status: Set(status),
        scanned_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(status)
}

async fn has_accepted_scan(
    db: &DatabaseConnection,
    qr_session_id: i64,
    student_id: i64,
) -> ServiceResult<bool> {
    let existing = qr_scan::Entity::find()
        .filter(qr_scan::Column::QrSessionId.eq(qr_session_id))
        .filter(qr_scan::Column::StudentId.eq(student_id))
        .filter(qr_scan::Column::Status.eq(QrScanStatus::Accepted))
        .one(db)
        .await?;
    Ok(existing.is_some())
}

/// Accepted scans of all QR windows of a session, as channel punches. They
/// carry no hardware device and merge with vendor events on timestamp.
pub async fn scans_as_punches(
    db: &DatabaseConnection,
    session_id: i64,
) -> ServiceResult<Vec<PunchEvent>> {
    let windows = qr_session::Entity::find()
        .filter(qr_session::Column::SessionId.eq(session_id))
        .all(db)
        .await?;
    if windows.is_empty() {
        return Ok(Vec::new());
    }
    let window_ids: Vec<i64> = windows.iter().map(|w| w.id).collect();

    let scans = qr_scan::Entity::find()
        .filter(qr_scan::Column::QrSessionId.is_in(window_ids))
        .filter(qr_scan::Column::Status.eq(QrScanStatus::Accepted))
        .all(db)
        .await?;
    if scans.is_empty() {
        return Ok(Vec::new());
    }

    let student_ids: Vec<i64> = scans.iter().map(|s| s.student_id).collect();
    let students = student::Entity::find()
        .filter(student::Column::Id.is_in(student_ids))
        .all(db)
        .await?;
    let matricules: std::collections::HashMap<i64, String> = students
        .into_iter()
        .map(|s| (s.id, s.matricule))
        .collect();

    let mut punches: Vec<PunchEvent> = scans
        .into_iter()
        .filter_map(|scan| {
            matricules.get(&scan.student_id).map(|m| PunchEvent {
                matricule: m.clone(),
                device_id: None,
                at: scan.scanned_at,
            })
        })
        .collect();
    punches.sort_by(|a, b| a.at.cmp(&b.at));
    Ok(punches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use db::models::session::{self, ScopeLevel, SessionType};
    use db::test_utils::setup_test_db;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, h, m, 0).unwrap()
    }

    async fn seed_session(db: &DatabaseConnection) -> session::Model {
        session::ActiveModel {
            session_type: Set(SessionType::Course),
            title: Set("TD Algèbre".into()),
            date: Set(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()),
            start_time: Set(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
            end_time: Set(NaiveTime::from_hms_opt(11, 0, 0).unwrap()),
            pointage_start_time: Set(NaiveTime::from_hms_opt(8, 30, 0).unwrap()),
            tolerance_minutes: Set(15),
            academic_year: Set("2025/2026".into()),
            scope_level: Set(ScopeLevel::Tenant),
            scope_id: Set(None),
            created_at: Set(at(0, 0)),
            updated_at: Set(at(0, 0)),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    async fn seed_student(db: &DatabaseConnection, matricule: &str) -> student::Model {
        student::ActiveModel {
            matricule: Set(matricule.into()),
            first_name: Set("Amine".into()),
            last_name: Set("Khelifa".into()),
            group_id: Set(1),
            promotion_id: Set(1),
            option_id: Set(None),
            establishment_id: Set(1),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn scan_before_expiry_is_accepted_once() {
        let db = setup_test_db().await;
        let session = seed_session(&db).await;
        seed_student(&db, "S1").await;

        let qr = issue(&db, session.id, 10, at(9, 0)).await.unwrap();
        assert_eq!(qr.expires_at, at(9, 10));

        let first = record_scan(&db, &qr.token, "S1", at(9, 2)).await.unwrap();
        assert_eq!(first, QrScanStatus::Accepted);

        let second = record_scan(&db, &qr.token, "S1", at(9, 3)).await.unwrap();
        assert_eq!(second, QrScanStatus::Duplicate);
    }

    #[tokio::test]
    async fn scan_after_expiry_is_rejected_and_recorded() {
        let db = setup_test_db().await;
        let session = seed_session(&db).await;
        seed_student(&db, "S1").await;

        let qr = issue(&db, session.id, 10, at(9, 0)).await.unwrap();
        let status = record_scan(&db, &qr.token, "S1", at(9, 30)).await.unwrap();
        assert_eq!(status, QrScanStatus::Expired);

        // Expired attempt is persisted for audit, but never feeds the engine.
        let punches = scans_as_punches(&db, session.id).await.unwrap();
        assert!(punches.is_empty());
    }

    #[tokio::test]
    async fn unknown_token_and_matricule_are_explicit_errors() {
        let db = setup_test_db().await;
        let session = seed_session(&db).await;
        seed_student(&db, "S1").await;

        assert!(matches!(
            record_scan(&db, "pas-un-token", "S1", at(9, 0)).await,
            Err(ServiceError::QrTokenNotFound)
        ));

        let qr = issue(&db, session.id, 10, at(9, 0)).await.unwrap();
        assert!(matches!(
            record_scan(&db, &qr.token, "X9", at(9, 1)).await,
            Err(ServiceError::UnknownMatricule(_))
        ));
    }

    #[tokio::test]
    async fn accepted_scans_surface_as_channel_punches() {
        let db = setup_test_db().await;
        let session = seed_session(&db).await;
        seed_student(&db, "S1").await;
        seed_student(&db, "S2").await;

        let qr = issue(&db, session.id, 15, at(9, 0)).await.unwrap();
        record_scan(&db, &qr.token, "S2", at(9, 4)).await.unwrap();
        record_scan(&db, &qr.token, "S1", at(9, 2)).await.unwrap();
        record_scan(&db, &qr.token, "S1", at(9, 6)).await.unwrap(); // duplicate

        let punches = scans_as_punches(&db, session.id).await.unwrap();
        assert_eq!(punches.len(), 2);
        assert_eq!(punches[0].matricule, "S1");
        assert_eq!(punches[0].at, at(9, 2));
        assert_eq!(punches[0].device_id, None);
        assert_eq!(punches[1].matricule, "S2");
    }
}
