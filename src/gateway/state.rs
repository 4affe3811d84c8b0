//! Shared state behind every HTTP handler

use super::auth::TokenSigner;
use super::billing::SaasTiers;
use super::hardware::HardwareManifest;
use crate::config::GatewayConfig;
use crate::dispatcher::Dispatcher;
use crate::error::GatewayResult;
use crate::transport::SharedTransport;
use std::path::Path;
use std::sync::Arc;

pub struct AppState {
    pub config: GatewayConfig,
    pub signer: TokenSigner,
    pub manifest: HardwareManifest,
    pub tiers: SaasTiers,
    pub dispatcher: Arc<Dispatcher>,
    /// Present when MQTT is enabled
    pub transport: Option<SharedTransport>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Resolve the signing secret, manifest and tier table from `config`
    pub fn from_config(config: GatewayConfig, dispatcher: Arc<Dispatcher>) -> GatewayResult<Self> {
        let signer = TokenSigner::from_config(&config)?;
        let manifest = HardwareManifest::load(Path::new(&config.hardware.manifest_path))?;
        let tiers = SaasTiers::from_env(&config.saas.tiers_env);
        Ok(Self::from_parts(config, signer, manifest, tiers, dispatcher))
    }

    pub fn from_parts(
        config: GatewayConfig,
        signer: TokenSigner,
        manifest: HardwareManifest,
        tiers: SaasTiers,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            signer,
            manifest,
            tiers,
            dispatcher,
            transport: None,
        }
    }

    pub fn with_transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.config.mqtt.enabled
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("signer", &self.signer)
            .field("initiatives", &self.manifest.initiatives.len())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}
