//! Tenant registry.
//!
//! A tenant is an isolated site (city) with its own database file and its
//! own device-vendor API credentials. The registry is a JSON document; a
//! lookup miss is an ordinary `None`, never a panic, and every failure to
//! actually reach a tenant's resources maps to `TenantUnavailable` so one
//! broken tenant cannot sink a batch run.

use std::collections::BTreeMap;
use std::fs;

use sea_orm::DatabaseConnection;
use serde::Deserialize;
use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use db::models::absence::AbsenceStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceApiConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Per-tenant reconciliation policy. Everything has a sensible default so a
/// registry entry only needs to override what differs.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantPolicy {
    /// Which final statuses get a persisted absence record.
    #[serde(default = "default_persist_statuses")]
    pub persist_statuses: Vec<AbsenceStatus>,
    /// Minutes after session end during which punches still count.
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: i64,
    /// Repeat taps on one device within this many seconds are one punch.
    #[serde(default = "default_dedup_window_seconds")]
    pub dedup_window_seconds: i64,
    /// An exit earlier than `end - early_exit_minutes` flags `left_early`.
    #[serde(default = "default_early_exit_minutes")]
    pub early_exit_minutes: i64,
    /// Device API attempts before the tenant is declared unavailable.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_timeout_seconds() -> u64 {
    10
}
fn default_persist_statuses() -> Vec<AbsenceStatus> {
    vec![AbsenceStatus::Absent, AbsenceStatus::Late]
}
fn default_grace_minutes() -> i64 {
    15
}
fn default_dedup_window_seconds() -> i64 {
    60
}
fn default_early_exit_minutes() -> i64 {
    30
}
fn default_retry_attempts() -> u32 {
    3
}

impl Default for TenantPolicy {
    fn default() -> Self {
        Self {
            persist_statuses: default_persist_statuses(),
            grace_minutes: default_grace_minutes(),
            dedup_window_seconds: default_dedup_window_seconds(),
            early_exit_minutes: default_early_exit_minutes(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    pub name: String,
    pub database_path: String,
    pub device_api: DeviceApiConfig,
    #[serde(default)]
    pub policy: TenantPolicy,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    tenants: Vec<TenantConfig>,
}

#[derive(Debug, Default)]
pub struct TenantDirectory {
    tenants: BTreeMap<String, TenantConfig>,
}

impl TenantDirectory {
    pub fn from_file(path: &str) -> ServiceResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ServiceError::Registry(format!("cannot read {path}: {e}")))?;
        let parsed: RegistryFile = serde_json::from_str(&raw)
            .map_err(|e| ServiceError::Registry(format!("cannot parse {path}: {e}")))?;
        let dir = Self::from_configs(parsed.tenants);
        info!(tenants = dir.tenants.len(), "tenant registry loaded");
        Ok(dir)
    }

    pub fn from_configs(configs: Vec<TenantConfig>) -> Self {
        let tenants = configs.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self { tenants }
    }

    /// Lookup. A missing tenant is a valid, non-fatal state; callers branch
    /// on the `Option` instead of catching anything.
    pub fn get(&self, tenant_id: &str) -> Option<&TenantConfig> {
        self.tenants.get(tenant_id)
    }

    /// Tenants in id order, so run reports are stable.
    pub fn iter(&self) -> impl Iterator<Item = &TenantConfig> {
        self.tenants.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Open a tenant's database. Missing config and unreachable storage both
    /// collapse into `TenantUnavailable`.
    pub async fn connect(&self, tenant_id: &str) -> ServiceResult<DatabaseConnection> {
        let config = self
            .get(tenant_id)
            .ok_or_else(|| ServiceError::unavailable(tenant_id, "not in tenant registry"))?;
        db::connect(&config.database_path)
            .await
            .map_err(|e| ServiceError::unavailable(tenant_id, e))
    }
}
