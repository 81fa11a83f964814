use chrono::{DateTime, Utc};
use sea_orm::EntityTrait;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Every scan attempt is kept for audit, including rejected ones. Only
/// `accepted` scans feed the reconciliation engine.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "qr_scans")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub qr_session_id: i64,
    pub student_id: i64,
    pub status: QrScanStatus,
    pub scanned_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Display, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "qr_scan_status")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QrScanStatus {
    #[sea_orm(string_value = "accepted")]
    Accepted,

    #[sea_orm(string_value = "duplicate")]
    Duplicate,

    #[sea_orm(string_value = "expired")]
    Expired,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::qr_session::Entity",
        from = "Column::QrSessionId",
        to = "super::qr_session::Column::Id"
    )]
    QrSession,
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,
}

impl Related<super::qr_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QrSession.def()
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
