//! Batch reconciliation trigger.
//!
//! Drives fetch → reconcile → materialize over every tenant. Tenants are
//! independent units of work: they run concurrently, hold their own
//! connections, and one tenant's failure surfaces as a warning on the run
//! report while the others proceed. Safe to re-invoke from cron: all
//! persistence goes through the idempotent upsert.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{self, SessionTypeFilter};
use crate::clock::{CampusClock, SessionWindow};
use crate::device_directory;
use crate::error::{ServiceError, ServiceResult};
use crate::materializer::{self, MaterializeOutcome};
use crate::punch::{self, FetchWindow, PunchEvent, PunchEventSource};
use crate::qr;
use crate::reconcile::{self, ReconcilePolicy};
use crate::tenant::{TenantConfig, TenantDirectory};
use db::models::session;

/// Factory producing the punch source for one tenant. Production passes
/// `punch::http_source_factory`; tests inject in-memory sources.
pub type SourceFactory =
    dyn Fn(&TenantConfig) -> ServiceResult<Box<dyn PunchEventSource>> + Send + Sync;

#[derive(Debug, Clone)]
pub struct BatchParams {
    /// Sessions whose end is at least this many hours in the past are due.
    pub cutoff_hours: i64,
    /// Backfill mode: process every session of this date, cutoff ignored.
    pub date_override: Option<NaiveDate>,
    pub type_filter: SessionTypeFilter,
}

impl Default for BatchParams {
    fn default() -> Self {
        Self {
            cutoff_hours: 1,
            date_override: None,
            type_filter: SessionTypeFilter::Both,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TenantReport {
    pub tenant: String,
    pub created: u32,
    pub updated: u32,
    pub errors: u32,
    pub sessions_processed: u32,
    pub warnings: Vec<String>,
    /// False when the tenant could not be reached at all (config, storage or
    /// device API); its sessions were skipped this run.
    pub available: bool,
}

impl TenantReport {
    fn new(tenant: &str) -> Self {
        Self {
            tenant: tenant.to_owned(),
            available: true,
            ..Self::default()
        }
    }

    fn unavailable(mut self, reason: impl ToString) -> Self {
        self.available = false;
        self.warnings.push(reason.to_string());
        self
    }
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub total_created: u32,
    pub total_updated: u32,
    pub tenants: Vec<TenantReport>,
}

impl BatchOutcome {
    pub fn any_unavailable(&self) -> bool {
        self.tenants.iter().any(|t| !t.available)
    }

    pub fn all_unavailable(&self) -> bool {
        !self.tenants.is_empty() && self.tenants.iter().all(|t| !t.available)
    }
}

pub async fn run_batch(
    directory: &TenantDirectory,
    clock: &CampusClock,
    params: &BatchParams,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
    make_source: &SourceFactory,
) -> BatchOutcome {
    let reports = futures::future::join_all(
        directory
            .iter()
            .map(|config| process_tenant(config, clock, params, now, cancel, make_source)),
    )
    .await;

    let mut outcome = BatchOutcome::default();
    for report in reports {
        outcome.total_created += report.created;
        outcome.total_updated += report.updated;
        outcome.tenants.push(report);
    }
    info!(
        created = outcome.total_created,
        updated = outcome.total_updated,
        tenants = outcome.tenants.len(),
        "batch run finished"
    );
    outcome
}

async fn process_tenant(
    config: &TenantConfig,
    clock: &CampusClock,
    params: &BatchParams,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
    make_source: &SourceFactory,
) -> TenantReport {
    let report = TenantReport::new(&config.id);

    let db = match db::connect(&config.database_path).await {
        Ok(db) => db,
        Err(err) => {
            warn!(tenant = %config.id, error = %err, "tenant storage unreachable");
            return report.unavailable(format!("storage unreachable: {err}"));
        }
    };

    let source = match make_source(config) {
        Ok(source) => source,
        Err(err) => {
            warn!(tenant = %config.id, error = %err, "punch source unavailable");
            return report.unavailable(format!("punch source unavailable: {err}"));
        }
    };

    let sessions = match select_sessions(&db, clock, params, now).await {
        Ok(sessions) => sessions,
        Err(err) => {
            warn!(tenant = %config.id, error = %err, "session selection failed");
            return report.unavailable(format!("session selection failed: {err}"));
        }
    };

    let mut report = report;
    let policy = ReconcilePolicy::for_run(params.cutoff_hours, &config.policy);

    for session in &sessions {
        if cancel.is_cancelled() {
            report
                .warnings
                .push("cancelled before completing all sessions".to_owned());
            break;
        }

        match process_session(&db, clock, config, &policy, params, session, source.as_ref(), now)
            .await
        {
            Ok(None) => {}
            Ok(Some(run)) => {
                report.sessions_processed += 1;
                report.created += run.outcome.created;
                report.updated += run.outcome.updated;
                report.errors += run.outcome.errors;
                if run.malformed > 0 {
                    report.warnings.push(format!(
                        "session {}: {} malformed punch event(s) dropped",
                        session.id, run.malformed
                    ));
                }
            }
            Err(err @ ServiceError::TenantUnavailable { .. }) => {
                warn!(tenant = %config.id, error = %err, "tenant became unavailable mid-run");
                report.available = false;
                report.warnings.push(err.to_string());
                break;
            }
            Err(err) => {
                warn!(tenant = %config.id, session = session.id, error = %err, "session skipped");
                report.warnings.push(format!("session {}: {err}", session.id));
            }
        }
    }

    report
}

async fn select_sessions(
    db: &DatabaseConnection,
    clock: &CampusClock,
    params: &BatchParams,
    now: DateTime<Utc>,
) -> ServiceResult<Vec<session::Model>> {
    match params.date_override {
        Some(date) => catalog::sessions_on_date(db, date, params.type_filter).await,
        None => {
            catalog::sessions_on_or_before(db, clock.local_date(now), params.type_filter).await
        }
    }
}

struct SessionRun {
    outcome: MaterializeOutcome,
    malformed: u32,
}

#[allow(clippy::too_many_arguments)]
async fn process_session(
    db: &DatabaseConnection,
    clock: &CampusClock,
    config: &TenantConfig,
    policy: &ReconcilePolicy,
    params: &BatchParams,
    session: &session::Model,
    source: &dyn PunchEventSource,
    now: DateTime<Utc>,
) -> ServiceResult<Option<SessionRun>> {
    let window = SessionWindow::resolve(session, clock, &config.policy)?;

    // Cutoff gate, skipped entirely in backfill mode.
    if params.date_override.is_none()
        && now < window.end + Duration::hours(params.cutoff_hours)
    {
        return Ok(None);
    }

    let roster = catalog::roster(db, session).await?;
    if roster.is_empty() {
        info!(tenant = %config.id, session = session.id, "empty scope, session skipped");
        return Ok(None);
    }

    let devices = device_directory::devices_for_session(db, session.id).await?;
    // Sessions without hardware readers are QR-only.
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

    let mut events = fetched.events;
    events.extend(qr::scans_as_punches(db, session.id).await?);
    let events = punch::dedup(events, config.policy.dedup_window_seconds);

    let mut per_student: HashMap<&str, Vec<PunchEvent>> = HashMap::new();
    for event in &events {
        per_student
            .entry(event.matricule.as_str())
            .or_default()
            .push(event.clone());
    }

    let results: Vec<_> = roster
        .iter()
        .filter_map(|student| {
            let punches = per_student
                .get(student.matricule.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            reconcile::reconcile(&window, student.id, punches, now, policy)
        })
        .collect();

    let outcome = materializer::materialize(db, session, &results, &config.policy, now).await;
    Ok(Some(SessionRun {
        outcome,
        malformed: fetched.malformed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punch::MemoryPunchSource;
    use crate::tenant::{DeviceApiConfig, TenantPolicy};
    use chrono::{NaiveTime, TimeZone};
    use db::models::session::{ScopeLevel, SessionType};
    use db::models::{absence, device, room, session_room, student};
    use migration::Migrator;
    use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
    use sea_orm_migration::MigratorTrait;
    use tempfile::TempDir;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, d, h, m, 0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn config(id: &str, database_path: String) -> TenantConfig {
        TenantConfig {
            id: id.to_owned(),
            name: format!("Université de {id}"),
            database_path,
            device_api: DeviceApiConfig {
                base_url: "http://devices.invalid".into(),
                api_key: "k".into(),
                timeout_seconds: 1,
            },
            policy: TenantPolicy::default(),
        }
    }

    /// Create a migrated tenant database file and seed one room, one device,
    /// one student ("S1", group 3) and one session of the given type/date.
    async fn seed_tenant_db(dir: &TempDir, name: &str, session_type: SessionType, on: NaiveDate) -> String {
        let path = dir.path().join(format!("{name}.sqlite"));
        let path_str = path.display().to_string();
        let db = sea_orm::Database::connect(format!("sqlite://{path_str}?mode=rwc"))
            .await
            .unwrap();
        Migrator::up(&db, None).await.unwrap();

        let room = room::ActiveModel {
            name: Set("Amphi A".into()),
            establishment_id: Set(1),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        device::ActiveModel {
            vendor_device_id: Set("D-100".into()),
            name: Set("Lecteur Amphi A".into()),
            room_id: Set(room.id),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        student::ActiveModel {
            matricule: Set("S1".into()),
            first_name: Set("Sara".into()),
            last_name: Set("Bensaïd".into()),
            group_id: Set(3),
            promotion_id: Set(1),
            option_id: Set(None),
            establishment_id: Set(1),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let session = session::ActiveModel {
            session_type: Set(session_type),
            title: Set("Analyse 2".into()),
            date: Set(on),
            start_time: Set(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
            end_time: Set(NaiveTime::from_hms_opt(11, 0, 0).unwrap()),
            pointage_start_time: Set(NaiveTime::from_hms_opt(8, 30, 0).unwrap()),
            tolerance_minutes: Set(15),
            academic_year: Set("2025/2026".into()),
            scope_level: Set(ScopeLevel::Group),
            scope_id: Set(Some(3)),
            created_at: Set(at(1, 0, 0)),
            updated_at: Set(at(1, 0, 0)),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        session_room::ActiveModel {
            session_id: Set(session.id),
            room_id: Set(room.id),
        }
        .insert(&db)
        .await
        .unwrap();

        path_str
    }

    async fn absence_count(path: &str) -> u64 {
        let db = db::connect(path).await.unwrap();
        absence::Entity::find().count(&db).await.unwrap()
    }

    fn utc_clock() -> CampusClock {
        CampusClock::new("UTC").unwrap()
    }

    #[tokio::test]
    async fn one_tenant_failure_does_not_block_the_other() {
        let dir = TempDir::new().unwrap();
        let alger = seed_tenant_db(&dir, "alger", SessionType::Course, date(15)).await;
        let oran = seed_tenant_db(&dir, "oran", SessionType::Course, date(15)).await;
        let directory = TenantDirectory::from_configs(vec![
            config("alger", alger.clone()),
            config("oran", oran.clone()),
        ]);

        let make_source: &SourceFactory = &|cfg: &TenantConfig| {
            if cfg.id == "alger" {
                Ok(Box::new(MemoryPunchSource::failing("alger", "timeout")) as Box<dyn PunchEventSource>)
            } else {
                Ok(Box::new(MemoryPunchSource::new("oran")) as Box<dyn PunchEventSource>)
            }
        };

        let outcome = run_batch(
            &directory,
            &utc_clock(),
            &BatchParams::default(),
            at(15, 13, 0), // two hours past session end
            &CancellationToken::new(),
            make_source,
        )
        .await;

        // Oran's absence landed; Alger is a warning, not a failure.
        assert_eq!(outcome.total_created, 1);
        assert!(outcome.any_unavailable());
        assert!(!outcome.all_unavailable());
        let alger_report = outcome.tenants.iter().find(|t| t.tenant == "alger").unwrap();
        assert!(!alger_report.available);
        assert_eq!(absence_count(&oran).await, 1);
        assert_eq!(absence_count(&alger).await, 0);
    }

    #[tokio::test]
    async fn rerun_over_unchanged_data_creates_nothing_new() {
        let dir = TempDir::new().unwrap();
        let alger = seed_tenant_db(&dir, "alger", SessionType::Course, date(15)).await;
        let directory = TenantDirectory::from_configs(vec![config("alger", alger.clone())]);
        let make_source: &SourceFactory =
            &|_: &TenantConfig| Ok(Box::new(MemoryPunchSource::new("alger")) as Box<dyn PunchEventSource>);

        let params = BatchParams::default();
        let first = run_batch(
            &directory,
            &utc_clock(),
            &params,
            at(15, 13, 0),
            &CancellationToken::new(),
            make_source,
        )
        .await;
        assert_eq!((first.total_created, first.total_updated), (1, 0));

        let second = run_batch(
            &directory,
            &utc_clock(),
            &params,
            at(15, 14, 0),
            &CancellationToken::new(),
            make_source,
        )
        .await;
        assert_eq!((second.total_created, second.total_updated), (0, 1));
        assert_eq!(absence_count(&alger).await, 1);
    }

    #[tokio::test]
    async fn session_before_cutoff_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let alger = seed_tenant_db(&dir, "alger", SessionType::Course, date(15)).await;
        let directory = TenantDirectory::from_configs(vec![config("alger", alger.clone())]);
        let make_source: &SourceFactory =
            &|_: &TenantConfig| Ok(Box::new(MemoryPunchSource::new("alger")) as Box<dyn PunchEventSource>);

        // 11:30: session ended at 11:00 but the 1h cutoff has not passed.
        let outcome = run_batch(
            &directory,
            &utc_clock(),
            &BatchParams::default(),
            at(15, 11, 30),
            &CancellationToken::new(),
            make_source,
        )
        .await;
        assert_eq!(outcome.total_created, 0);
        assert_eq!(absence_count(&alger).await, 0);
    }

    #[tokio::test]
    async fn backfill_processes_only_the_named_date_and_type() {
        let dir = TempDir::new().unwrap();
        // Tenant has a course on the 15th (same db also gets an exam below).
        let alger = seed_tenant_db(&dir, "alger", SessionType::Course, date(15)).await;
        // Add an exam on the 15th and a course on the 16th to the same file.
        let db = db::connect(&alger).await.unwrap();
        for (stype, on) in [(SessionType::Exam, date(15)), (SessionType::Course, date(16))] {
            let s = session::ActiveModel {
                session_type: Set(stype),
                title: Set("Partiel".into()),
                date: Set(on),
                start_time: Set(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
                end_time: Set(NaiveTime::from_hms_opt(11, 0, 0).unwrap()),
                pointage_start_time: Set(NaiveTime::from_hms_opt(8, 30, 0).unwrap()),
                tolerance_minutes: Set(0),
                academic_year: Set("2025/2026".into()),
                scope_level: Set(ScopeLevel::Group),
                scope_id: Set(Some(3)),
                created_at: Set(at(1, 0, 0)),
                updated_at: Set(at(1, 0, 0)),
                ..Default::default()
            }
            .insert(&db)
            .await
            .unwrap();
            session_room::ActiveModel {
                session_id: Set(s.id),
                room_id: Set(1),
            }
            .insert(&db)
            .await
            .unwrap();
        }

        let directory = TenantDirectory::from_configs(vec![config("alger", alger.clone())]);
        let make_source: &SourceFactory =
            &|_: &TenantConfig| Ok(Box::new(MemoryPunchSource::new("alger")) as Box<dyn PunchEventSource>);

        let params = BatchParams {
            cutoff_hours: 1,
            date_override: Some(date(15)),
            type_filter: SessionTypeFilter::Exam,
        };
        let outcome = run_batch(
            &directory,
            &utc_clock(),
            &params,
            at(17, 9, 0), // well past everything
            &CancellationToken::new(),
            make_source,
        )
        .await;

        // Only the exam of the 15th was reconciled: one absence for S1.
        assert_eq!(outcome.total_created, 1);
        assert_eq!(outcome.tenants[0].sessions_processed, 1);
        assert_eq!(absence_count(&alger).await, 1);
    }

    #[tokio::test]
    async fn cancellation_stops_cleanly_and_leaves_rerunnable_state() {
        let dir = TempDir::new().unwrap();
        let alger = seed_tenant_db(&dir, "alger", SessionType::Course, date(15)).await;
        let directory = TenantDirectory::from_configs(vec![config("alger", alger.clone())]);
        let make_source: &SourceFactory =
            &|_: &TenantConfig| Ok(Box::new(MemoryPunchSource::new("alger")) as Box<dyn PunchEventSource>);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run_batch(
            &directory,
            &utc_clock(),
            &BatchParams::default(),
            at(15, 13, 0),
            &cancel,
            make_source,
        )
        .await;
        assert_eq!(outcome.total_created, 0);
        assert!(outcome.tenants[0].warnings.iter().any(|w| w.contains("cancelled")));

        // A later run picks the work straight back up.
        let outcome = run_batch(
            &directory,
            &utc_clock(),
            &BatchParams::default(),
            at(15, 13, 0),
            &CancellationToken::new(),
            make_source,
        )
        .await;
        assert_eq!(outcome.total_created, 1);
    }

    #[tokio::test]
    async fn unreachable_storage_is_a_warning_not_a_crash() {
        let directory = TenantDirectory::from_configs(vec![config(
            "fantome",
            "/nonexistent/fantome.sqlite".into(),
        )]);
        let make_source: &SourceFactory =
            &|_: &TenantConfig| Ok(Box::new(MemoryPunchSource::new("fantome")) as Box<dyn PunchEventSource>);

        let outcome = run_batch(
            &directory,
            &utc_clock(),
            &BatchParams::default(),
            at(15, 13, 0),
            &CancellationToken::new(),
            make_source,
        )
        .await;
        assert!(outcome.all_unavailable());
        assert_eq!(outcome.total_created, 0);
    }
}
