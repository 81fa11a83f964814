//! Session catalog access.
//!
//! Sessions and their audiences are authored by academic staff elsewhere;
//! this module only reads them. Every query takes the tenant's connection
//! explicitly; there is no ambient tenant filtering anywhere in the
//! engine.

use chrono::NaiveDate;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Select};
use tracing::warn;

use crate::error::ServiceResult;
use db::models::session::{self, ScopeLevel, SessionType};
use db::models::student;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionTypeFilter {
    Course,
    Exam,
    #[default]
    Both,
}

impl SessionTypeFilter {
    /// Make-up sessions follow course rules, so the course filter covers
    /// them too.
    fn apply(self, select: Select<session::Entity>) -> Select<session::Entity> {
        match self {
            SessionTypeFilter::Course => select.filter(
                session::Column::SessionType
                    .is_in([SessionType::Course, SessionType::Makeup]),
            ),
            SessionTypeFilter::Exam => {
                select.filter(session::Column::SessionType.eq(SessionType::Exam))
            }
            SessionTypeFilter::Both => select,
        }
    }
}

/// Candidate sessions for a cutoff run: anything dated up to `date`. The
/// caller still applies the precise end-time cutoff after resolving each
/// session's window.
pub async fn sessions_on_or_before(
    db: &DatabaseConnection,
    date: NaiveDate,
    filter: SessionTypeFilter,
) -> ServiceResult<Vec<session::Model>> {
    let select = filter.apply(
        session::Entity::find()
            .filter(session::Column::Date.lte(date))
            .order_by_asc(session::Column::Date)
            .order_by_asc(session::Column::StartTime),
    );
    Ok(select.all(db).await?)
}

/// Backfill selection: every session of exactly this date, cutoff ignored.
pub async fn sessions_on_date(
    db: &DatabaseConnection,
    date: NaiveDate,
    filter: SessionTypeFilter,
) -> ServiceResult<Vec<session::Model>> {
    let select = filter.apply(
        session::Entity::find()
            .filter(session::Column::Date.eq(date))
            .order_by_asc(session::Column::StartTime),
    );
    Ok(select.all(db).await?)
}

pub async fn sessions_in_range(
    db: &DatabaseConnection,
    from: NaiveDate,
    to: NaiveDate,
    filter: SessionTypeFilter,
) -> ServiceResult<Vec<session::Model>> {
    let select = filter.apply(
        session::Entity::find()
            .filter(session::Column::Date.gte(from))
            .filter(session::Column::Date.lte(to))
            .order_by_asc(session::Column::Date)
            .order_by_asc(session::Column::StartTime),
    );
    Ok(select.all(db).await?)
}

/// Does this student fall inside the session's audience scope?
pub fn in_scope(student: &student::Model, session: &session::Model) -> bool {
    match session.scope_level {
        ScopeLevel::Group => session.scope_id == Some(student.group_id),
        ScopeLevel::Promotion => session.scope_id == Some(student.promotion_id),
        ScopeLevel::Option => session.scope_id.is_some() && session.scope_id == student.option_id,
        ScopeLevel::Establishment => session.scope_id == Some(student.establishment_id),
        ScopeLevel::Tenant => true,
    }
}

/// Resolve the students a session applies to. An empty roster is a valid
/// skip condition for the caller, never an error.
pub async fn roster(
    db: &DatabaseConnection,
    session: &session::Model,
) -> ServiceResult<Vec<student::Model>> {
    let select = student::Entity::find().order_by_asc(student::Column::Matricule);
    let select = match (session.scope_level, session.scope_id) {
        (ScopeLevel::Tenant, _) => select,
        (ScopeLevel::Group, Some(id)) => select.filter(student::Column::GroupId.eq(id)),
        (ScopeLevel::Promotion, Some(id)) => select.filter(student::Column::PromotionId.eq(id)),
        (ScopeLevel::Option, Some(id)) => select.filter(student::Column::OptionId.eq(id)),
        (ScopeLevel::Establishment, Some(id)) => {
            select.filter(student::Column::EstablishmentId.eq(id))
        }
        (level, None) => {
            warn!(
                session = session.id,
                scope = %level,
                "session scope has no target id, roster is empty"
            );
            return Ok(Vec::new());
        }
    };
    Ok(select.all(db).await?)
}
