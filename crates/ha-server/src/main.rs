//! Home Assistant Rust Server
//!
//! Loads `configuration.yaml` from the config directory, sets up zones and the
//! config flows, then serves the WebSocket API until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use ha_api::{AppState, AuthState, CommandRegistry, User};
use ha_components::isy994::{HttpIsyConnector, IsyFlowHandler};
use ha_components::version::VersionFlowHandler;
use ha_components::zone::{self, YamlConfigSource, ZoneConfigSource, ZoneManager};
use ha_config::{load_yaml, CoreConfig, LocationConfig};
use ha_config_entries::{ConfigEntries, FlowManager};
use ha_event_bus::EventBus;
use ha_registries::{EntityRegistry, Storage};
use ha_service_registry::ServiceRegistry;
use ha_state_machine::StateMachine;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_DIR: &str = "config";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8123";

/// The central Home Assistant instance
pub struct HomeAssistant {
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// State machine for entity states
    pub states: Arc<StateMachine>,
    /// Service registry for service calls
    pub services: Arc<ServiceRegistry>,
    pub commands: Arc<CommandRegistry>,
    pub auth: Arc<AuthState>,
    pub location: Arc<LocationConfig>,
    pub storage: Arc<Storage>,
    pub entity_registry: Arc<EntityRegistry>,
    pub config_entries: Arc<ConfigEntries>,
    pub flows: Arc<FlowManager>,
}

impl HomeAssistant {
    /// Create an instance rooted at a config directory
    pub fn new(config_dir: &Path, core: CoreConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        let auth = Arc::new(AuthState::new());

        let services = Arc::new(ServiceRegistry::new());
        let lookup = auth.clone();
        services.set_admin_lookup(move |user_id| lookup.is_admin(user_id));

        let storage = Arc::new(Storage::new(config_dir));
        let entity_registry = Arc::new(EntityRegistry::new(storage.clone()));
        let config_entries = Arc::new(ConfigEntries::new(storage.clone()));
        let flows = Arc::new(FlowManager::new(config_entries.clone()));

        Self {
            location: Arc::new(LocationConfig::new(core, bus.clone())),
            bus,
            states,
            services,
            commands: Arc::new(CommandRegistry::new()),
            auth,
            storage,
            entity_registry,
            config_entries,
            flows,
        }
    }

    /// Load persisted registries
    async fn load_registries(&self) -> Result<()> {
        self.storage
            .ensure_dir()
            .await
            .context("creating storage directory")?;
        self.entity_registry
            .load()
            .await
            .context("loading entity registry")?;
        self.config_entries
            .load()
            .await
            .context("loading config entries")?;
        Ok(())
    }

    fn setup_config_flows(&self) {
        self.flows.register(Arc::new(VersionFlowHandler));
        self.flows
            .register(Arc::new(IsyFlowHandler::new(Arc::new(HttpIsyConnector::new()))));
        ha_api::config_flow::register_commands(&self.commands, self.flows.clone());
    }

    async fn setup_zones(
        &self,
        config_dir: &Path,
        config_root: &ha_config::Value,
    ) -> Result<Arc<ZoneManager>> {
        let zones = Arc::new(ZoneManager::new(
            self.states.clone(),
            self.bus.clone(),
            self.entity_registry.clone(),
            self.location.clone(),
            zone::zone_store(self.storage.clone()),
        ));
        zones
            .setup(config_root, Some(&self.config_entries))
            .await
            .context("setting up zones")?;

        let source: Arc<dyn ZoneConfigSource> = Arc::new(YamlConfigSource::new(config_dir));
        zone::register_services(&self.services, zones.clone(), source);
        zone::websocket::register_commands(&self.commands, zones.clone());
        Ok(zones)
    }

    /// Create the owner with the configured token, or a fresh one
    ///
    /// Returns the token only when it was generated here.
    fn setup_owner(&self, name: &str, configured: Option<String>) -> Option<String> {
        let owner = User::owner(name);
        let owner_id = owner.id.clone();
        self.auth.add_user(owner);

        match configured.filter(|token| !token.is_empty()) {
            Some(token) => {
                self.auth.add_token(token, &owner_id);
                None
            }
            None => self.auth.create_long_lived_token(&owner_id),
        }
    }
}

fn config_dir() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HA_CONFIG_DIR").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Home Assistant (Rust)");

    let config_dir = config_dir();
    let config_root = load_yaml(&config_dir, "configuration.yaml")
        .with_context(|| format!("loading {}", config_dir.display()))?;
    let core = CoreConfig::from_yaml(&config_root).context("parsing homeassistant section")?;
    info!("Location {} at {}, {}", core.name, core.latitude, core.longitude);

    let hass = HomeAssistant::new(&config_dir, core.clone());
    hass.load_registries().await?;
    hass.setup_config_flows();
    let zones = hass.setup_zones(&config_dir, &config_root).await?;
    if let Some(token) = hass.setup_owner(&core.name, std::env::var("HA_ACCESS_TOKEN").ok()) {
        warn!("HA_ACCESS_TOKEN not set, generated an owner access token");
        eprintln!("Owner access token: {}", token);
    }

    info!("Home Assistant initialized with {} zones", zones.len());

    let state = AppState {
        commands: hass.commands.clone(),
        auth: hass.auth.clone(),
    };
    let addr = std::env::var("HA_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let server = tokio::spawn(async move { ha_api::start_server(state, &addr).await });

    info!("Home Assistant is running");

    tokio::select! {
        result = server => {
            result.context("server task failed")?.context("server error")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
        }
    }

    zones.shutdown();
    Ok(())
}
