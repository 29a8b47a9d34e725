//! Gateway shared state.

use std::sync::Arc;

use parley_core::config::Config;
use parley_media::ChannelTransport;
use parley_session::{Collaborators, RegistrySettings, SessionRegistry};

/// Shared gateway state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    /// Concrete transport, needed to hand room edges to audio sockets.
    pub transport: Arc<ChannelTransport>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        transport: Arc<ChannelTransport>,
    ) -> Self {
        Self {
            config,
            registry,
            transport,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Build the registry and every configured collaborator from config.
    pub fn from_config(config: Config) -> Self {
        let transport = Arc::new(ChannelTransport::new());
        let collaborators = Collaborators::from_config(&config, transport.clone());
        let registry = Arc::new(SessionRegistry::new(
            RegistrySettings::from_config(&config),
            collaborators,
        ));
        Self::new(Arc::new(config), registry, transport)
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
