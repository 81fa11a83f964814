use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::EntityTrait;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::session::SessionType;

/// The persisted absence ledger. One row per (session, student), enforced by
/// a unique index; the materializer upserts against that key and never
/// locks. Reconciliation-derived fields (status, minutes_late, entry/exit)
/// are overwritten on re-runs; the justification fields are only ever
/// touched by manual edits.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "absences")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_type: SessionType,
    pub session_id: i64,
    pub student_id: i64,
    pub date: NaiveDate,
    pub status: AbsenceStatus,
    pub minutes_late: i32,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub justified: bool,
    pub motif: Option<String>,
    pub justificatif: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "absence_status")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AbsenceStatus {
    #[sea_orm(string_value = "absent")]
    Absent,

    #[sea_orm(string_value = "late")]
    Late,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::session::Entity",
        from = "Column::SessionId",
        to = "super::session::Column::Id"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}
