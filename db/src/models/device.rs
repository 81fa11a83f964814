use sea_orm::EntityTrait;
use sea_orm::entity::prelude::*;

/// A biometric reader installed in a room. Rooms with separate entry and
/// exit readers own several devices; the reconciliation engine does not
/// rely on any direction field, only on timestamps.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Identifier of the device on the vendor's API.
    #[sea_orm(unique)]
    pub vendor_device_id: String,
    pub name: String,
    pub room_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::room::Entity",
        from = "Column::RoomId",
        to = "super::room::Column::Id"
    )]
    Room,
}

impl Related<super::room::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Room.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}
