//! Application state shared across handlers.

use std::sync::Arc;

use crate::audit::AuditSink;
use crate::config::{PricingConfig, ServerConfig};
use crate::services::csrf::CsrfService;
use crate::store::Store;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources: configuration, the store, the audit sink, and the
/// anti-forgery token service.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    store: Arc<dyn Store>,
    audit: AuditSink,
    csrf: CsrfService,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(config: ServerConfig, store: Arc<dyn Store>, audit: AuditSink) -> Self {
        let csrf = CsrfService::new(config.csrf_secret.clone());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                audit,
                csrf,
            }),
        }
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Pricing knobs for the order transaction processor.
    #[must_use]
    pub fn pricing(&self) -> &PricingConfig {
        &self.inner.config.pricing
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    /// Get a handle to the audit sink.
    #[must_use]
    pub fn audit(&self) -> &AuditSink {
        &self.inner.audit
    }

    /// Get a reference to the anti-forgery token service.
    #[must_use]
    pub fn csrf(&self) -> &CsrfService {
        &self.inner.csrf
    }
}
