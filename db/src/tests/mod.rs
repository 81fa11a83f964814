//! Schema-level tests: the constraints the engine's idempotence leans on
//! must actually exist in the migrated database.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

use crate::models::absence::{self, AbsenceStatus};
use crate::models::session::{self, ScopeLevel, SessionType};
use crate::models::student;
use crate::test_utils::setup_test_db;

async fn seed_session(db: &DatabaseConnection, session_type: SessionType) -> session::Model {
    session::ActiveModel {
        session_type: Set(session_type),
        title: Set("Rattrapage Analyse".into()),
        date: Set(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()),
        start_time: Set(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
        end_time: Set(NaiveTime::from_hms_opt(11, 0, 0).unwrap()),
        pointage_start_time: Set(NaiveTime::from_hms_opt(8, 30, 0).unwrap()),
        tolerance_minutes: Set(15),
        academic_year: Set("2025/2026".into()),
        scope_level: Set(ScopeLevel::Tenant),
        scope_id: Set(None),
        created_at: Set(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()),
        updated_at: Set(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

async fn seed_student(db: &DatabaseConnection) -> student::Model {
    student::ActiveModel {
        matricule: Set("20260001".into()),
        first_name: Set("Lina".into()),
        last_name: Set("Cherif".into()),
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

fn absence_row(session: &session::Model, student_id: i64) -> absence::ActiveModel {
    absence::ActiveModel {
        session_type: Set(session.session_type),
        session_id: Set(session.id),
        student_id: Set(student_id),
        date: Set(session.date),
        status: Set(AbsenceStatus::Absent),
        minutes_late: Set(0),
        entry_time: Set(None),
        exit_time: Set(None),
        justified: Set(false),
        motif: Set(None),
        justificatif: Set(None),
        created_at: Set(Utc.with_ymd_and_hms(2026, 1, 15, 13, 0, 0).unwrap()),
        updated_at: Set(Utc.with_ymd_and_hms(2026, 1, 15, 13, 0, 0).unwrap()),
        ..Default::default()
    }
}

#[tokio::test]
async fn duplicate_ledger_row_is_rejected_by_the_unique_index() {
    let db = setup_test_db().await;
    let session = seed_session(&db, SessionType::Course).await;
    let student = seed_student(&db).await;

    absence_row(&session, student.id).insert(&db).await.unwrap();
    let duplicate = absence_row(&session, student.id).insert(&db).await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn session_type_enum_round_trips() {
    let db = setup_test_db().await;
    let session = seed_session(&db, SessionType::Makeup).await;

    let reloaded = session::Entity::find_by_id(session.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.session_type, SessionType::Makeup);
    assert_eq!(reloaded.scope_level, ScopeLevel::Tenant);
    assert_eq!(reloaded.start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
}
