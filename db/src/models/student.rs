use sea_orm::EntityTrait;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "students")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Registration number; the reference the device vendor reports punches
    /// under.
    #[sea_orm(unique)]
    pub matricule: String,
    pub first_name: String,
    pub last_name: String,
    pub group_id: i64,
    pub promotion_id: i64,
    pub option_id: Option<i64>,
    pub establishment_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::absence::Entity")]
    Absences,
}

impl Related<super::absence::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Absences.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}
