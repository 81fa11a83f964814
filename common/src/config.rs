use once_cell::sync::OnceCell;
use std::env;

/// Process-wide configuration loaded from environment variables.
///
/// Tenant-specific settings (database paths, device-API credentials) live in
/// the tenants file, not here; see the tenant directory in `services`. This
/// struct only carries what is the same for every tenant.
#[derive(Debug)]
pub struct Config {
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub tenants_file: String,
    /// Canonical campus timezone, e.g. "Africa/Algiers". Every civil
    /// date/time in the system is interpreted in this zone.
    pub campus_timezone: String,
    pub host: String,
    pub port: u16,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn init() -> &'static Self {
        dotenvy::dotenv().ok();

        CONFIG.get_or_init(|| {
            let project_name = env::var("PROJECT_NAME").unwrap_or_else(|_| "pointage".into());
            let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
            let log_file = env::var("LOG_FILE").unwrap_or_else(|_| "logs/pointage.log".into());
            let tenants_file = env::var("TENANTS_FILE").expect("TENANTS_FILE must be set");
            let campus_timezone =
                env::var("CAMPUS_TIMEZONE").unwrap_or_else(|_| "Africa/Algiers".into());
            let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into());
            let port = env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000);

            Config {
                project_name,
                log_level,
                log_file,
                tenants_file,
                campus_timezone,
                host,
                port,
            }
        })
    }

    pub fn get() -> &'static Self {
        CONFIG.get().expect("Config not initialized")
    }
}
