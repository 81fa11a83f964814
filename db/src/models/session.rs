use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sea_orm::EntityTrait;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// An academic session to reconcile attendance for: a regular course slot,
/// an exam sitting, or a scheduled make-up session. All three share the same
/// reconciliation rules; the type is carried through to the absence ledger.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_type: SessionType,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Earliest wall-clock time at which a punch counts for this session.
    pub pointage_start_time: NaiveTime,
    /// Minutes after start during which an entry is still on time.
    pub tolerance_minutes: i32,
    pub academic_year: String,
    pub scope_level: ScopeLevel,
    /// Target of the scope (group/promotion/option/establishment id).
    /// Null for tenant-wide sessions.
    pub scope_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "session_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SessionType {
    #[sea_orm(string_value = "course")]
    Course,

    #[sea_orm(string_value = "exam")]
    Exam,

    #[sea_orm(string_value = "makeup")]
    Makeup,
}

/// Which slice of the student body a session applies to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "scope_level")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ScopeLevel {
    #[sea_orm(string_value = "group")]
    Group,

    #[sea_orm(string_value = "promotion")]
    Promotion,

    #[sea_orm(string_value = "option")]
    Option,

    #[sea_orm(string_value = "establishment")]
    Establishment,

    #[sea_orm(string_value = "tenant")]
    Tenant,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::session_room::Entity")]
    Rooms,
    #[sea_orm(has_many = "super::absence::Entity")]
    Absences,
    #[sea_orm(has_many = "super::qr_session::Entity")]
    QrSessions,
}

impl Related<super::session_room::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rooms.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::absence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Absences.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::qr_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QrSessions.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}
