use chrono::{NaiveDate, NaiveTime};
use sea_orm::DbErr;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised by the attendance engine.
///
/// `TenantUnavailable` is the tenant-boundary error: whatever goes wrong
/// talking to one tenant (missing registry entry, unreachable database,
/// device API down) collapses into it, so the batch can skip that tenant
/// and keep going.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("tenant {tenant} unavailable: {reason}")]
    TenantUnavailable { tenant: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("tenant registry error: {0}")]
    Registry(String),

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("ambiguous or non-existent local time {date} {time} in {zone}")]
    AmbiguousLocalTime {
        date: NaiveDate,
        time: NaiveTime,
        zone: String,
    },

    #[error("invalid session window for session {session_id}: {reason}")]
    InvalidSessionWindow { session_id: i64, reason: String },

    #[error("QR token not found or expired session")]
    QrTokenNotFound,

    #[error("unknown matricule: {0}")]
    UnknownMatricule(String),
}

impl ServiceError {
    pub fn unavailable(tenant: impl Into<String>, reason: impl ToString) -> Self {
        ServiceError::TenantUnavailable {
            tenant: tenant.into(),
            reason: reason.to_string(),
        }
    }
}
