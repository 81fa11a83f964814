//! Punch event acquisition.
//!
//! The reconciliation engine never performs I/O itself: it consumes
//! `PunchEvent`s produced by a `PunchEventSource`. The production source
//! talks to the tenant's biometric vendor API over HTTP; tests and the QR
//! merge path use the in-memory source.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::tenant::TenantConfig;
use db::models::device;

/// One normalized tap: who, where, when. Vendors report no reliable
/// direction flag, so none is modeled; pairing is done purely on
/// timestamps by the engine.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PunchEvent {
    pub matricule: String,
    /// Our device id. `None` for channel punches that carry no hardware
    /// device (QR scans).
    pub device_id: Option<i64>,
    pub at: DateTime<Utc>,
}

/// Fetch result plus diagnostics: rows the vendor sent that could not be
/// normalized are dropped and counted, never fatal.
#[derive(Debug, Clone, Default)]
pub struct PunchBatch {
    pub events: Vec<PunchEvent>,
    pub malformed: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[async_trait]
pub trait PunchEventSource: Send + Sync {
    /// Events for the given devices inside the window, ordered by timestamp.
    async fn fetch(&self, devices: &[device::Model], window: FetchWindow)
    -> ServiceResult<PunchBatch>;
}

/// Coalesce repeat taps: within one (student, device) pair, taps closer than
/// `window_seconds` to the previously kept tap collapse into that tap.
/// Output is sorted by timestamp, matricule as tie-break.
pub fn dedup(mut events: Vec<PunchEvent>, window_seconds: i64) -> Vec<PunchEvent> {
    events.sort_by(|a, b| {
        (&a.matricule, a.device_id, a.at).cmp(&(&b.matricule, b.device_id, b.at))
    });

    let mut kept: Vec<PunchEvent> = Vec::with_capacity(events.len());
    for event in events {
        if let Some(prev) = kept.last() {
            if prev.matricule == event.matricule
                && prev.device_id == event.device_id
                && (event.at - prev.at).num_seconds() < window_seconds
            {
                continue;
            }
        }
        kept.push(event);
    }

    kept.sort_by(|a, b| (a.at, &a.matricule).cmp(&(b.at, &b.matricule)));
    kept
}

/// Raw row as the vendor serves it. Everything optional: normalization
/// decides what is usable.
#[derive(Debug, Deserialize)]
struct RawPunchRow {
    matricule: Option<String>,
    device: Option<String>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPunchResponse {
    events: Vec<RawPunchRow>,
}

/// Map vendor rows to `PunchEvent`s. Unparseable timestamps and blank
/// matricules drop the row and bump the malformed counter; rows for devices
/// outside the requested set are discarded silently (not ours).
fn normalize(rows: Vec<RawPunchRow>, devices: &[device::Model]) -> PunchBatch {
    let by_vendor_id: HashMap<&str, i64> = devices
        .iter()
        .map(|d| (d.vendor_device_id.as_str(), d.id))
        .collect();

    let mut batch = PunchBatch::default();
    for row in rows {
        let matricule = match row.matricule {
            Some(m) if !m.trim().is_empty() => m.trim().to_owned(),
            _ => {
                batch.malformed += 1;
                continue;
            }
        };
        let at = match row
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        {
            Some(t) => t.with_timezone(&Utc),
            None => {
                batch.malformed += 1;
                continue;
            }
        };
        let device_id = match row.device.as_deref().and_then(|v| by_vendor_id.get(v)) {
            Some(id) => Some(*id),
            None => {
                debug!(device = ?row.device, "punch for device outside requested set, dropped");
                continue;
            }
        };
        batch.events.push(PunchEvent {
            matricule,
            device_id,
            at,
        });
    }
    batch.events.sort_by(|a, b| a.at.cmp(&b.at));
    batch
}

fn event_query(devices: &[device::Model], window: FetchWindow) -> Vec<(String, String)> {
    let ids: Vec<&str> = devices.iter().map(|d| d.vendor_device_id.as_str()).collect();
    vec![
        ("devices".to_owned(), ids.join(",")),
        ("from".to_owned(), window.from.to_rfc3339()),
        ("to".to_owned(), window.to.to_rfc3339()),
    ]
}

/// Vendor REST source, one instance per tenant. Bounded retry with
/// exponential backoff; once attempts are exhausted the tenant is reported
/// unavailable rather than the error propagating as a crash.
pub struct HttpPunchSource {
    tenant: String,
    client: Client,
    base_url: String,
    api_key: String,
    retry_attempts: u32,
}

impl HttpPunchSource {
    pub fn new(config: &TenantConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.device_api.timeout_seconds))
            .build()
            .map_err(|e| ServiceError::unavailable(&config.id, e))?;

        Ok(Self {
            tenant: config.id.clone(),
            client,
            base_url: config.device_api.base_url.trim_end_matches('/').to_owned(),
            api_key: config.device_api.api_key.clone(),
            retry_attempts: config.policy.retry_attempts.max(1),
        })
    }

    async fn fetch_once(
        &self,
        devices: &[device::Model],
        window: FetchWindow,
    ) -> Result<PunchBatch, reqwest::Error> {
        let url = format!("{}/api/v1/events", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(&event_query(devices, window))
            .send()
            .await?
            .error_for_status()?;
        let raw: RawPunchResponse = response.json().await?;
        Ok(normalize(raw.events, devices))
    }
}

#[async_trait]
impl PunchEventSource for HttpPunchSource {
    async fn fetch(
        &self,
        devices: &[device::Model],
        window: FetchWindow,
    ) -> ServiceResult<PunchBatch> {
        let mut delay = Duration::from_millis(500);
        let mut attempt = 1;
        loop {
            match self.fetch_once(devices, window).await {
                Ok(batch) => return Ok(batch),
                Err(err) if attempt < self.retry_attempts => {
                    warn!(
                        tenant = %self.tenant,
                        attempt,
                        error = %err,
                        "device API call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(ServiceError::unavailable(&self.tenant, err));
                }
            }
        }
    }
}

/// Production source factory for the batch runner.
pub fn http_source_factory(config: &TenantConfig) -> ServiceResult<Box<dyn PunchEventSource>> {
    Ok(Box::new(HttpPunchSource::new(config)?))
}

/// Deterministic in-memory source: unit tests and fixtures.
#[derive(Debug, Default)]
pub struct MemoryPunchSource {
    tenant: String,
    events: Vec<PunchEvent>,
    malformed: u32,
    failure: Option<String>,
}

impl MemoryPunchSource {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            ..Self::default()
        }
    }

    /// A source that always reports its tenant unavailable.
    pub fn failing(tenant: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_events(mut self, events: Vec<PunchEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_malformed(mut self, malformed: u32) -> Self {
        self.malformed = malformed;
        self
    }
}

#[async_trait]
impl PunchEventSource for MemoryPunchSource {
    async fn fetch(
        &self,
        devices: &[device::Model],
        window: FetchWindow,
    ) -> ServiceResult<PunchBatch> {
        if let Some(reason) = &self.failure {
            return Err(ServiceError::unavailable(&self.tenant, reason));
        }
        let ids: HashSet<i64> = devices.iter().map(|d| d.id).collect();
        let mut events: Vec<PunchEvent> = self
            .events
            .iter()
            .filter(|e| e.at >= window.from && e.at <= window.to)
            .filter(|e| e.device_id.is_none_or(|id| ids.contains(&id)))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.at.cmp(&b.at));
        Ok(PunchBatch {
            events,
            malformed: self.malformed,
        })
    }
}
