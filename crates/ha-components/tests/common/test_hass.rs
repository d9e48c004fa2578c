//! Test instance
//!
//! Wires an event bus, state machine, service and command registries,
//! entity registry and config entries around a temporary config directory.

use std::collections::HashMap;
use std::sync::Arc;

use ha_api::{ActiveConnection, CommandRegistry, ResultMessage};
use ha_components::zone::{self, ZoneManager, ZoneConfigSource, YamlConfigSource};
use ha_config::{CoreConfig, LocationConfig, Value};
use ha_config_entries::ConfigEntries;
use ha_core::{Context, EntityId, State};
use ha_event_bus::EventBus;
use ha_registries::{EntityRegistry, Storage};
use ha_service_registry::ServiceRegistry;
use ha_state_machine::StateMachine;
use serde_json::json;
use tempfile::TempDir;

use super::MemoryStore;

pub const ADMIN_USER: &str = "admin-user";
pub const REGULAR_USER: &str = "regular-user";

/// An isolated instance with a zone manager backed by a [`MemoryStore`]
pub struct TestHomeAssistant {
    pub config_dir: TempDir,
    pub bus: Arc<EventBus>,
    pub states: Arc<StateMachine>,
    pub services: Arc<ServiceRegistry>,
    pub commands: Arc<CommandRegistry>,
    pub location: Arc<LocationConfig>,
    pub storage: Arc<Storage>,
    pub entity_registry: Arc<EntityRegistry>,
    pub config_entries: Arc<ConfigEntries>,
    pub store: Arc<MemoryStore>,
    pub zones: Arc<ZoneManager>,
}

impl TestHomeAssistant {
    /// Create an instance located at 32.87336, -117.22743 with a 250 m
    /// home radius
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let config_dir = TempDir::new().unwrap();
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        let services = Arc::new(ServiceRegistry::new());
        services.set_admin_lookup(|user_id| user_id == ADMIN_USER);
        let commands = Arc::new(CommandRegistry::new());

        let core = CoreConfig {
            name: "Test Home".to_string(),
            latitude: 32.87336,
            longitude: -117.22743,
            radius: 250.0,
            ..CoreConfig::default()
        };
        let location = Arc::new(LocationConfig::new(core, bus.clone()));
        let storage = Arc::new(Storage::new(config_dir.path()));
        let entity_registry = Arc::new(EntityRegistry::new(storage.clone()));
        let config_entries = Arc::new(ConfigEntries::new(storage.clone()));
        let store = Arc::new(store);

        let zones = Arc::new(ZoneManager::new(
            states.clone(),
            bus.clone(),
            entity_registry.clone(),
            location.clone(),
            store.clone(),
        ));

        zone::websocket::register_commands(&commands, zones.clone());
        let source: Arc<dyn ZoneConfigSource> =
            Arc::new(YamlConfigSource::new(config_dir.path()));
        zone::register_services(&services, zones.clone(), source);

        Self {
            config_dir,
            bus,
            states,
            services,
            commands,
            location,
            storage,
            entity_registry,
            config_entries,
            store,
            zones,
        }
    }

    /// Set up the zone manager from a YAML configuration root
    pub async fn setup_zones(&self, config: &str) {
        let root = yaml(config);
        self.zones
            .setup(&root, Some(&self.config_entries))
            .await
            .unwrap();
    }

    /// Write `configuration.yaml` into the config directory
    pub fn write_configuration(&self, content: &str) {
        std::fs::write(self.config_dir.path().join("configuration.yaml"), content).unwrap();
    }

    /// Set the state of an entity
    pub fn set_state(&self, entity_id: &str, state: &str) -> State {
        let entity_id: EntityId = entity_id.parse().expect("Invalid entity_id");
        self.states
            .set(entity_id, state, HashMap::new(), Context::new())
    }

    /// Remove an entity's state
    pub fn remove_state(&self, entity_id: &str) {
        let entity_id: EntityId = entity_id.parse().expect("Invalid entity_id");
        self.states.remove(&entity_id, Context::new());
    }

    pub fn get_state(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id)
    }

    /// Assert that an entity is in a specific state
    pub fn assert_state(&self, entity_id: &str, expected: &str) {
        let state = self.states.get_state(entity_id);
        assert_eq!(
            state.as_deref(),
            Some(expected),
            "Expected entity {} to be in state '{}', but was {:?}",
            entity_id,
            expected,
            state
        );
    }

    pub fn assert_missing(&self, entity_id: &str) {
        let state = self.states.get_state(entity_id);
        assert!(state.is_none(), "Expected {} to be missing, was {:?}", entity_id, state);
    }

    /// Connection authenticated as an administrator
    pub fn admin_connection(&self) -> ActiveConnection {
        ActiveConnection::new(Some(ADMIN_USER.to_string()), true)
    }

    /// Connection authenticated as a regular user
    pub fn user_connection(&self) -> ActiveConnection {
        ActiveConnection::new(Some(REGULAR_USER.to_string()), false)
    }

    /// Send one websocket command
    pub async fn send(
        &self,
        conn: &ActiveConnection,
        id: u64,
        command: &str,
        payload: serde_json::Value,
    ) -> ResultMessage {
        let mut message = json!({"id": id, "type": command});
        if let (Some(message), serde_json::Value::Object(payload)) =
            (message.as_object_mut(), payload)
        {
            message.extend(payload);
        }
        self.commands.dispatch(conn, &message.to_string()).await
    }
}

impl Default for TestHomeAssistant {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a YAML configuration root
pub fn yaml(content: &str) -> Value {
    serde_yaml::from_str(content).unwrap()
}
