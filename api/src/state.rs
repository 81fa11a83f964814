use std::sync::Arc;

use common::config::Config;
use services::clock::CampusClock;
use services::tenant::TenantDirectory;

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<TenantDirectory>,
    pub clock: CampusClock,
}

impl AppState {
    /// Build the shared state from the process configuration. Panics on a
    /// broken registry or timezone; the server cannot run without either.
    pub fn init(config: &Config) -> Self {
        let directory =
            TenantDirectory::from_file(&config.tenants_file).expect("tenant registry must load");
        let clock =
            CampusClock::new(&config.campus_timezone).expect("campus timezone must be valid");
        Self {
            directory: Arc::new(directory),
            clock,
        }
    }
}
