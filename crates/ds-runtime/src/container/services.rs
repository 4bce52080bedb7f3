//! # Service Container
//!
//! Wires the signature engine, the timestamp gateway and the HSM
//! integration manager from one [`SigningConfig`].
//!
//! ```text
//! SigningConfig
//!   ├─ trust anchors ─────────────┐
//!   ├─ TSA failover ─► gateway ───┼─► SignatureEngine
//!   └─ providers.* ─► adapters ───┴─► HsmIntegrationManager
//! ```
//!
//! A provider whose `initialize` fails is still registered. It reports
//! itself unavailable and its calls fail with the initialization error, so
//! one unreachable custodian never stops the others from loading.

use crate::container::config::{ConfigError, SigningConfig};
use ds_01_signature_engine::{SignatureEngine, SignatureEngineApi, TimestampGateway, TsaTimestampGateway};
use ds_02_hsm_providers::{AwsKmsProvider, AzureKeyVaultProvider, GcpKmsProvider, HsmProvider, Pkcs11Provider};
use ds_03_hsm_integration::{HsmIntegrationApi, HsmIntegrationManager};
use ds_04_timestamp_authority::{TsaClient, TsaError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot create TSA client: {0}")]
    Timestamp(#[from] TsaError),
}

pub struct DocSealContainer {
    pub config: SigningConfig,
    pub engine: Arc<SignatureEngine>,
    pub manager: Arc<HsmIntegrationManager>,
}

impl DocSealContainer {
    /// Build everything the configuration names, with HTTP transports, and
    /// initialize each configured provider.
    #[instrument(name = "container_init", skip(config))]
    pub async fn build(config: SigningConfig) -> Result<Self, ContainerError> {
        let gateway = http_gateway(&config)?;
        let container = Self::with_gateway(config, gateway)?;
        container.register_configured_providers().await;
        Ok(container)
    }

    /// Engine and manager only. No providers are registered.
    pub fn with_gateway(
        config: SigningConfig,
        gateway: Option<Arc<dyn TimestampGateway>>,
    ) -> Result<Self, ContainerError> {
        let anchors = config.load_trust_anchors()?;
        info!(trust_anchors = anchors.len(), "Trust anchors loaded");

        let mut engine = SignatureEngine::new()
            .with_trust_anchors(anchors)
            .with_timestamp_hash(config.hash_algorithm);
        if let Some(gateway) = gateway {
            engine = engine.with_timestamp_gateway(gateway);
        }
        let engine = Arc::new(engine);
        let manager = Arc::new(HsmIntegrationManager::new(
            Arc::clone(&engine) as Arc<dyn SignatureEngineApi>
        ));

        Ok(Self { config, engine, manager })
    }

    /// Initialize `provider` and register it under its own tag.
    pub async fn register(&self, provider: Arc<dyn HsmProvider>) {
        let tag = provider.provider();
        match provider.initialize().await {
            Ok(()) => info!(provider = %tag, "HSM provider initialized"),
            Err(e) => warn!(provider = %tag, error = %e, "HSM provider failed to initialize"),
        }
        self.manager.register_provider(tag, provider);
    }

    /// Initialize and register one adapter per configured section.
    pub async fn register_configured_providers(&self) {
        for provider in self.configured_providers() {
            self.register(provider).await;
        }
        info!(
            providers = self.manager.registered_providers().len(),
            "HSM providers registered"
        );
    }

    /// One adapter per configured section, using the shared call timeout.
    fn configured_providers(&self) -> Vec<Arc<dyn HsmProvider>> {
        let settings = &self.config.providers;
        let timeout = self.config.timeout();
        let mut providers: Vec<Arc<dyn HsmProvider>> = Vec::new();

        if let Some(aws) = &settings.aws {
            let mut aws = aws.clone();
            aws.timeout = timeout;
            providers.push(Arc::new(AwsKmsProvider::new(aws)));
        }
        if let Some(gcp) = &settings.gcp {
            let mut gcp = gcp.clone();
            gcp.timeout = timeout;
            providers.push(Arc::new(GcpKmsProvider::new(gcp)));
        }
        if let Some(azure) = &settings.azure {
            let mut azure = azure.clone();
            azure.timeout = timeout;
            providers.push(Arc::new(AzureKeyVaultProvider::new(azure)));
        }
        if let Some(pkcs11) = &settings.pkcs11 {
            providers.push(Arc::new(Pkcs11Provider::new(pkcs11.clone())));
        }
        providers
    }
}

/// HTTP-backed timestamp gateway over the configured failover list, if any.
pub fn http_gateway(config: &SigningConfig) -> Result<Option<Arc<dyn TimestampGateway>>, ContainerError> {
    let Some(servers) = config.failover() else {
        return Ok(None);
    };
    info!(servers = servers.servers().count(), "Timestamp authority configured");
    let gateway = TsaTimestampGateway::new(TsaClient::http()?, servers).with_options(config.timestamp_options());
    Ok(Some(Arc::new(gateway) as Arc<dyn TimestampGateway>))
}
