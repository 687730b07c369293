//! Application state.

use std::collections::HashMap;
use std::sync::Arc;

use lumera_core::ProviderKind;
use lumera_provider::{ArtifactMigrator, HttpMigrator, HttpProvider, ProviderAdapter};
use lumera_reconciler::Reconciler;
use lumera_store::{RocksStore, Store};

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// The job lifecycle reconciler.
    pub reconciler: Arc<Reconciler>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Build the state from configuration: provider adapters for each
    /// configured kind, the artifact migrator, and the reconciler.
    #[must_use]
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Self {
        let providers = build_providers(&config);
        if providers.is_empty() {
            tracing::warn!("no generation providers configured - submissions will be rejected");
        }

        let migrator: Arc<dyn ArtifactMigrator> = Arc::new(HttpMigrator::new(
            config.storage_url.clone(),
            config.storage_public_url.clone(),
            config.storage_api_key.clone(),
        ));

        let reconciler = Arc::new(Reconciler::new(
            store.clone() as Arc<dyn Store>,
            providers,
            migrator,
            config.reconciler_config(),
        ));

        Self {
            store,
            reconciler,
            config,
        }
    }
}

fn build_providers(config: &ServiceConfig) -> HashMap<ProviderKind, Arc<dyn ProviderAdapter>> {
    let mut providers: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();

    let configured = [
        (
            ProviderKind::Image,
            &config.image_provider_url,
            &config.image_provider_key,
        ),
        (
            ProviderKind::Video,
            &config.video_provider_url,
            &config.video_provider_key,
        ),
        (
            ProviderKind::Training,
            &config.training_provider_url,
            &config.training_provider_key,
        ),
    ];

    for (kind, url, key) in configured {
        if let (Some(url), Some(key)) = (url, key) {
            tracing::info!(kind = %kind.as_str(), url = %url, "provider configured");
            providers.insert(kind, Arc::new(HttpProvider::new(url, key, kind)));
        } else {
            tracing::warn!(kind = %kind.as_str(), "provider not configured");
        }
    }

    providers
}
