//! Absence materialization.
//!
//! Takes finalized reconciliation results and lands them in the `absences`
//! ledger exactly once per (session, student). Idempotence comes from the
//! upsert key, not from locks: re-runs update derived fields in place and a
//! racing duplicate insert falls back to the update path through the unique
//! index.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use tracing::{debug, error};

use crate::reconcile::{AttendanceStatus, ReconciliationResult};
use crate::tenant::TenantPolicy;
use db::models::absence::{self, AbsenceStatus};
use db::models::session;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeOutcome {
    pub created: u32,
    pub updated: u32,
    pub errors: u32,
}

impl MaterializeOutcome {
    pub fn absorb(&mut self, other: MaterializeOutcome) {
        self.created += other.created;
        self.updated += other.updated;
        self.errors += other.errors;
    }
}

/// The ledger status a result would persist as, if any. Pending and Excused
/// results never persist; Present persists never (presence is the absence of
/// a record); Absent/Late are subject to the tenant's persist set.
pub fn persisted_status(
    result: &ReconciliationResult,
    policy: &TenantPolicy,
) -> Option<AbsenceStatus> {
    let status = match result.status {
        AttendanceStatus::Absent => AbsenceStatus::Absent,
        AttendanceStatus::Late => AbsenceStatus::Late,
        _ => return None,
    };
    policy.persist_statuses.contains(&status).then_some(status)
}

/// Upsert every persistable result for one session. A single student's
/// failure is logged and counted; the rest of the session proceeds.
pub async fn materialize(
    db: &DatabaseConnection,
    session: &session::Model,
    results: &[ReconciliationResult],
    policy: &TenantPolicy,
    now: DateTime<Utc>,
) -> MaterializeOutcome {
    let mut outcome = MaterializeOutcome::default();

    for result in results {
        let Some(status) = persisted_status(result, policy) else {
            continue;
        };
        match upsert(db, session, result, status, now).await {
            Ok(true) => outcome.created += 1,
            Ok(false) => outcome.updated += 1,
            Err(err) => {
                error!(
                    session = session.id,
                    student = result.student_id,
                    error = %err,
                    "absence upsert failed"
                );
                outcome.errors += 1;
            }
        }
    }

    debug!(
        session = session.id,
        created = outcome.created,
        updated = outcome.updated,
        errors = outcome.errors,
        "session materialized"
    );
    outcome
}

/// Returns Ok(true) when a row was created, Ok(false) when updated.
async fn upsert(
    db: &DatabaseConnection,
    session: &session::Model,
    result: &ReconciliationResult,
    status: AbsenceStatus,
    now: DateTime<Utc>,
) -> Result<bool, DbErr> {
    if let Some(existing) = find_existing(db, session.id, result.student_id).await? {
        update_derived(db, existing, result, status, now).await?;
        return Ok(false);
    }

    let row = absence::ActiveModel {
        session_type: Set(session.session_type),
        session_id: Set(session.id),
        student_id: Set(result.student_id),
        date: Set(session.date),
        status: Set(status),
        minutes_late: Set(result.minutes_late as i32),
        entry_time: Set(result.entry.as_ref().map(|p| p.at)),
        exit_time: Set(result.exit.as_ref().map(|p| p.at)),
        justified: Set(false),
        motif: Set(None),
        justificatif: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    match row.insert(db).await {
        Ok(_) => Ok(true),
        Err(insert_err) => {
            // Lost a race with a concurrent run: the unique index on
            // (session, student) rejected us, so the row now exists.
            if let Some(existing) = find_existing(db, session.id, result.student_id).await? {
                update_derived(db, existing, result, status, now).await?;
                Ok(false)
            } else {
                Err(insert_err)
            }
        }
    }
}

async fn find_existing(
    db: &DatabaseConnection,
    session_id: i64,
    student_id: i64,
) -> Result<Option<absence::Model>, DbErr> {
    absence::Entity::find()
        .filter(absence::Column::SessionId.eq(session_id))
        .filter(absence::Column::StudentId.eq(student_id))
        .one(db)
        .await
}

/// Update reconciliation-derived fields only. `justified`, `motif` and
/// `justificatif` belong to manual edits and are never touched here.
async fn update_derived(
    db: &DatabaseConnection,
    existing: absence::Model,
    result: &ReconciliationResult,
    status: AbsenceStatus,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    let mut active: absence::ActiveModel = existing.into();
    active.status = Set(status);
    active.minutes_late = Set(result.minutes_late as i32);
    active.entry_time = Set(result.entry.as_ref().map(|p| p.at));
    active.exit_time = Set(result.exit.as_ref().map(|p| p.at));
    active.updated_at = Set(now);
    active.update(db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punch::PunchEvent;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use db::models::session::{ScopeLevel, SessionType};
    use db::models::student;
    use db::test_utils::setup_test_db;
    use sea_orm::PaginatorTrait;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, h, m, 0).unwrap()
    }

    async fn seed_session(db: &DatabaseConnection) -> session::Model {
        session::ActiveModel {
            session_type: Set(SessionType::Course),
            title: Set("Analyse 2".into()),
            date: Set(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()),
            start_time: Set(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
            end_time: Set(NaiveTime::from_hms_opt(11, 0, 0).unwrap()),
            pointage_start_time: Set(NaiveTime::from_hms_opt(8, 30, 0).unwrap()),
            tolerance_minutes: Set(15),
            academic_year: Set("2025/2026".into()),
            scope_level: Set(ScopeLevel::Group),
            scope_id: Set(Some(3)),
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
            first_name: Set("Sara".into()),
            last_name: Set("Bensaïd".into()),
            group_id: Set(3),
            promotion_id: Set(1),
            option_id: Set(None),
            establishment_id: Set(1),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    fn absent(session_id: i64, student_id: i64) -> ReconciliationResult {
        ReconciliationResult {
            session_id,
            student_id,
            status: AttendanceStatus::Absent,
            provisional: None,
            entry: None,
            exit: None,
            minutes_late: 0,
            left_early: false,
        }
    }

    fn late(session_id: i64, student_id: i64, minutes: i64) -> ReconciliationResult {
        ReconciliationResult {
            session_id,
            student_id,
            status: AttendanceStatus::Late,
            provisional: None,
            entry: Some(PunchEvent {
                matricule: "S1".into(),
                device_id: Some(1),
                at: at(9, 20),
            }),
            exit: Some(PunchEvent {
                matricule: "S1".into(),
                device_id: Some(1),
                at: at(11, 0),
            }),
            minutes_late: minutes,
            left_early: false,
        }
    }

    async fn count(db: &DatabaseConnection) -> u64 {
        absence::Entity::find().count(db).await.unwrap()
    }

    #[tokio::test]
    async fn absent_is_created_exactly_once_across_reruns() {
        let db = setup_test_db().await;
        let session = seed_session(&db).await;
        let student = seed_student(&db, "S1").await;
        let results = vec![absent(session.id, student.id)];
        let policy = TenantPolicy::default();

        let first = materialize(&db, &session, &results, &policy, at(13, 0)).await;
        assert_eq!((first.created, first.updated, first.errors), (1, 0, 0));

        let second = materialize(&db, &session, &results, &policy, at(14, 0)).await;
        assert_eq!((second.created, second.updated, second.errors), (0, 1, 0));
        assert_eq!(count(&db).await, 1);
    }

    #[tokio::test]
    async fn rerun_with_new_punch_data_corrects_the_row_in_place() {
        let db = setup_test_db().await;
        let session = seed_session(&db).await;
        let student = seed_student(&db, "S1").await;
        let policy = TenantPolicy::default();

        materialize(&db, &session, &[absent(session.id, student.id)], &policy, at(13, 0)).await;
        // Late-arriving punch data turns the absence into a lateness.
        materialize(
            &db,
            &session,
            &[late(session.id, student.id, 5)],
            &policy,
            at(14, 0),
        )
        .await;

        let row = find_existing(&db, session.id, student.id).await.unwrap().unwrap();
        assert_eq!(row.status, AbsenceStatus::Late);
        assert_eq!(row.minutes_late, 5);
        assert_eq!(row.entry_time, Some(at(9, 20)));
        assert_eq!(count(&db).await, 1);
    }

    #[tokio::test]
    async fn justification_fields_survive_re_materialization() {
        let db = setup_test_db().await;
        let session = seed_session(&db).await;
        let student = seed_student(&db, "S1").await;
        let policy = TenantPolicy::default();

        materialize(&db, &session, &[absent(session.id, student.id)], &policy, at(13, 0)).await;

        // Staff justify the absence by hand.
        let row = find_existing(&db, session.id, student.id).await.unwrap().unwrap();
        let mut active: absence::ActiveModel = row.into();
        active.justified = Set(true);
        active.motif = Set(Some("certificat médical".into()));
        active.justificatif = Set(Some("scan-142.pdf".into()));
        active.update(&db).await.unwrap();

        materialize(
            &db,
            &session,
            &[late(session.id, student.id, 5)],
            &policy,
            at(15, 0),
        )
        .await;

        let row = find_existing(&db, session.id, student.id).await.unwrap().unwrap();
        assert!(row.justified);
        assert_eq!(row.motif.as_deref(), Some("certificat médical"));
        assert_eq!(row.justificatif.as_deref(), Some("scan-142.pdf"));
        // Derived fields did move.
        assert_eq!(row.status, AbsenceStatus::Late);
    }

    #[tokio::test]
    async fn persist_set_is_policy_driven() {
        let db = setup_test_db().await;
        let session = seed_session(&db).await;
        let student = seed_student(&db, "S1").await;
        let policy = TenantPolicy {
            persist_statuses: vec![AbsenceStatus::Absent],
            ..TenantPolicy::default()
        };

        let outcome = materialize(
            &db,
            &session,
            &[late(session.id, student.id, 5)],
            &policy,
            at(13, 0),
        )
        .await;
        assert_eq!(outcome, MaterializeOutcome::default());
        assert_eq!(count(&db).await, 0);
    }

    #[test]
    fn pending_and_present_never_persist() {
        let policy = TenantPolicy::default();
        for status in [
            AttendanceStatus::Present,
            AttendanceStatus::PendingExit,
            AttendanceStatus::PendingEntry,
            AttendanceStatus::Excused,
        ] {
            let mut r = absent(1, 1);
            r.status = status;
            assert_eq!(persisted_status(&r, &policy), None, "{status:?}");
        }
    }
}
