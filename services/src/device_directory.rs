//! Room → device resolution.
//!
//! A session is served by every device installed in any of its rooms; the
//! engine queries exactly that set and nothing else.

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::error::ServiceResult;
use db::models::{device, room, session_room};

pub async fn room_ids_for_session(
    db: &DatabaseConnection,
    session_id: i64,
) -> ServiceResult<Vec<i64>> {
    let links = session_room::Entity::find()
        .filter(session_room::Column::SessionId.eq(session_id))
        .all(db)
        .await?;
    Ok(links.into_iter().map(|l| l.room_id).collect())
}

pub async fn devices_for_rooms(
    db: &DatabaseConnection,
    room_ids: &[i64],
) -> ServiceResult<Vec<device::Model>> {
    if room_ids.is_empty() {
        return Ok(Vec::new());
    }
    let devices = device::Entity::find()
        .filter(device::Column::RoomId.is_in(room_ids.iter().copied()))
        .order_by_asc(device::Column::Id)
        .all(db)
        .await?;
    Ok(devices)
}

/// The device set to query for a session, across all of its rooms.
pub async fn devices_for_session(
    db: &DatabaseConnection,
    session_id: i64,
) -> ServiceResult<Vec<device::Model>> {
    let rooms = room_ids_for_session(db, session_id).await?;
    devices_for_rooms(db, &rooms).await
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceExportRow {
    pub device_id: String,
    pub device_name: String,
    pub room: Option<String>,
}

/// Flat listing of a tenant's devices for verification against the vendor
/// console.
pub async fn export_rows(db: &DatabaseConnection) -> ServiceResult<Vec<DeviceExportRow>> {
    let rows = device::Entity::find()
        .find_also_related(room::Entity)
        .order_by_asc(device::Column::VendorDeviceId)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(d, r)| DeviceExportRow {
            device_id: d.vendor_device_id,
            device_name: d.name,
            room: r.map(|r| r.name),
        })
        .collect())
}
