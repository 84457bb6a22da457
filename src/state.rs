use std::sync::Arc;

use crate::{
    auth::jwt::JwtService, config::AppConfig, quota::QuotaLedger, store::ItemStore,
    workflow::ConversionWorkflow,
};

/// Everything a request handler needs, constructed once at startup and
/// injected; no module-level service singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub store: Arc<dyn ItemStore>,
    pub workflow: Arc<ConversionWorkflow>,
    pub quota: Arc<QuotaLedger>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        jwt: JwtService,
        store: Arc<dyn ItemStore>,
        workflow: Arc<ConversionWorkflow>,
        quota: Arc<QuotaLedger>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            jwt,
            store,
            workflow,
            quota,
        }
    }
}
