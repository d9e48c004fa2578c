//! Zone registry
//!
//! [`ZoneManager`] owns the live zone set: the home zone, the zones from
//! `configuration.yaml` and the user-editable zones from the `zone` store. It
//! publishes one `zone.<id>` state per zone whose value is the number of
//! tracked entities inside, and keeps those counts current by listening to
//! `state_changed` events.
//!
//! Mutations write the prospective item list to the store first and only
//! commit in memory once the write succeeded, so a failed write leaves both
//! the zone set and the published states untouched.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use ha_config::{LocationConfig, Value};
use ha_config_entries::ConfigEntries;
use ha_core::events::{CoreConfigUpdatedData, StateChangedData};
use ha_core::{Context, EntityId, State};
use ha_event_bus::{EventBus, ListenerId};
use ha_registries::{CollectionStore, EntityRegistry, Storage, Store};
use ha_state_machine::StateMachine;
use indexmap::IndexMap;
use tracing::{debug, info, instrument, trace, warn};

use super::config::parse_zone_section;
use super::location::resolve_active_with_accuracy;
use super::model::{
    validate_item, Point, Zone, ZoneConfig, ZoneCreate, ZoneItem, ZoneSource, ZoneUpdate,
    HOME_OVERRIDE_NAME,
};
use super::occupancy::OccupancyTracker;
use super::{ZoneError, ZoneResult, DOMAIN, HOME_ZONE};

/// Storage key of the user-editable zones
pub const STORAGE_KEY: &str = "zone";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// File-backed store for zone items under `.storage/zone`
pub fn zone_store(storage: Arc<Storage>) -> Arc<dyn CollectionStore<ZoneItem>> {
    Arc::new(Store::<ZoneItem>::new(
        storage,
        STORAGE_KEY,
        STORAGE_VERSION,
        STORAGE_MINOR_VERSION,
    ))
}

/// Owner of the live zone set
pub struct ZoneManager {
    states: Arc<StateMachine>,
    bus: Arc<EventBus>,
    entity_registry: Arc<EntityRegistry>,
    location: Arc<LocationConfig>,
    store: Arc<dyn CollectionStore<ZoneItem>>,
    /// Live zones by id, in registration order
    zones: RwLock<IndexMap<String, Zone>>,
    occupancy: Mutex<OccupancyTracker>,
    /// Serializes create/update/delete/reload across await points
    mutation: tokio::sync::Mutex<()>,
    listeners: Mutex<Vec<ListenerId>>,
}

impl ZoneManager {
    pub fn new(
        states: Arc<StateMachine>,
        bus: Arc<EventBus>,
        entity_registry: Arc<EntityRegistry>,
        location: Arc<LocationConfig>,
        store: Arc<dyn CollectionStore<ZoneItem>>,
    ) -> Self {
        Self {
            states,
            bus,
            entity_registry,
            location,
            store,
            zones: RwLock::new(IndexMap::new()),
            occupancy: Mutex::new(OccupancyTracker::default()),
            mutation: tokio::sync::Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Count entities of these domains instead of `person`
    pub fn with_tracked_domains(mut self, domains: Vec<String>) -> Self {
        self.occupancy = Mutex::new(OccupancyTracker::new(domains));
        self
    }

    // ==================== Lifecycle ====================

    /// Build the zone set, publish it and start tracking occupancy
    ///
    /// Zone config entries found in `config_entries` are imported into the
    /// store and removed afterwards.
    #[instrument(skip_all)]
    pub async fn setup(
        self: &Arc<Self>,
        config_root: &Value,
        config_entries: Option<&ConfigEntries>,
    ) -> ZoneResult<()> {
        let configs = parse_zone_section(config_root)?;
        let stored = self.store.load().await?.unwrap_or_default();

        {
            let _guard = self.mutation.lock().await;
            let zones = self.build_zone_set(&configs, &stored)?;
            self.replace_zones(zones, Context::new());
            self.register_storage_entities().await;
        }

        self.attach_listeners();

        if let Some(entries) = config_entries {
            self.import_config_entries(entries).await;
        }

        info!(
            "Set up {} zones ({} from configuration, {} editable)",
            self.len(),
            configs.len(),
            self.storage_items().len()
        );
        Ok(())
    }

    /// Re-read the `zone:` section and the store and swap the zone set
    ///
    /// Any parse or load failure aborts before anything is replaced.
    #[instrument(skip_all)]
    pub async fn reload(&self, config_root: &Value, context: Context) -> ZoneResult<()> {
        let _guard = self.mutation.lock().await;

        let configs = parse_zone_section(config_root)?;
        let stored = self.store.load().await?.unwrap_or_default();
        let zones = self.build_zone_set(&configs, &stored)?;

        self.replace_zones(zones, context);
        self.register_storage_entities().await;

        info!("Reloaded {} zones", self.len());
        Ok(())
    }

    /// Stop listening and remove every published zone state
    pub fn shutdown(&self) {
        let listeners: Vec<ListenerId> = self
            .listeners
            .lock()
            .map(|mut listeners| listeners.drain(..).collect())
            .unwrap_or_default();
        for id in listeners {
            self.bus.unlisten(id);
        }

        let removed: Vec<Zone> = self
            .zones
            .write()
            .map(|mut zones| zones.drain(..).map(|(_, zone)| zone).collect())
            .unwrap_or_default();
        if let Ok(mut occupancy) = self.occupancy.lock() {
            occupancy.clear();
        }

        let context = Context::new();
        for zone in &removed {
            self.states.remove(&zone.entity_id, context.clone());
        }
        debug!("Zone manager shut down, removed {} zones", removed.len());
    }

    fn attach_listeners(self: &Arc<Self>) {
        let Ok(mut listeners) = self.listeners.lock() else {
            return;
        };
        if !listeners.is_empty() {
            return;
        }

        let manager = Arc::downgrade(self);
        listeners.push(self.bus.listen_typed::<StateChangedData, _>(move |event| {
            if let Some(manager) = manager.upgrade() {
                manager.on_state_changed(&event.data);
            }
        }));

        let manager = Arc::downgrade(self);
        listeners.push(
            self.bus
                .listen_typed::<CoreConfigUpdatedData, _>(move |event| {
                    if let Some(manager) = manager.upgrade() {
                        manager.on_core_config_updated(event.context);
                    }
                }),
        );
    }

    async fn import_config_entries(&self, entries: &ConfigEntries) {
        for entry in entries.get_by_domain(DOMAIN) {
            let data = serde_json::Value::Object(entry.data.clone().into_iter().collect());
            let create = match serde_json::from_value::<ZoneCreate>(data) {
                Ok(create) => create,
                Err(e) => {
                    warn!("Ignoring invalid zone config entry {}: {}", entry.entry_id, e);
                    continue;
                }
            };

            match self.create(create, Context::new()).await {
                Ok(item) => {
                    info!("Imported zone {} from config entry {}", item.id, entry.entry_id);
                    if let Err(e) = entries.remove(&entry.entry_id).await {
                        warn!("Failed to remove imported config entry {}: {}", entry.entry_id, e);
                    }
                }
                Err(e) => warn!("Failed to import zone config entry {}: {}", entry.entry_id, e),
            }
        }
    }

    // ==================== Zone set ====================

    /// Home (or its static override), then static zones, then stored zones
    fn build_zone_set(
        &self,
        configs: &[ZoneConfig],
        stored: &[ZoneItem],
    ) -> ZoneResult<IndexMap<String, Zone>> {
        let mut zones = IndexMap::new();

        let home_override = configs.iter().position(|c| c.name == HOME_OVERRIDE_NAME);
        let home = match home_override {
            Some(index) => Zone::from_config(HOME_ZONE, &configs[index])?,
            None => Zone::home(&self.location.snapshot())?,
        };
        zones.insert(HOME_ZONE.to_string(), home);

        for (index, config) in configs.iter().enumerate() {
            if Some(index) == home_override {
                continue;
            }
            let entity_id = EntityId::generate(DOMAIN, &config.name, |candidate| {
                let id = object_id_of(candidate);
                zones.contains_key(id) || stored.iter().any(|item| item.id == id)
            })
            .map_err(|e| ZoneError::InvalidInput(e.to_string()))?;
            let id = entity_id.object_id().to_string();
            zones.insert(id.clone(), Zone::from_config(&id, config)?);
        }

        for item in stored {
            if zones.contains_key(&item.id) {
                warn!("Skipping stored zone {}: id already in use", item.id);
                continue;
            }
            let zone = match validate_item(item).and_then(|_| Zone::from_item(item)) {
                Ok(zone) => zone,
                Err(e) => {
                    warn!("Skipping stored zone {}: {}", item.id, e);
                    continue;
                }
            };
            zones.insert(item.id.clone(), zone);
        }

        Ok(zones)
    }

    /// Swap in a new zone set, rescan occupancy and republish everything
    fn replace_zones(&self, next: IndexMap<String, Zone>, context: Context) {
        let removed: Vec<Zone> = match self.zones.write() {
            Ok(mut zones) => {
                let removed = zones
                    .values()
                    .filter(|zone| !next.contains_key(&zone.id))
                    .cloned()
                    .collect();
                *zones = next.clone();
                removed
            }
            Err(_) => {
                warn!("Zone set lock poisoned, keeping previous zones");
                return;
            }
        };

        self.rescan(&next, &removed);

        for zone in &removed {
            debug!("Removing zone {}", zone.id);
            self.states.remove(&zone.entity_id, context.clone());
        }
        for zone in next.values() {
            self.publish(zone, context.clone());
        }
    }

    fn rescan(&self, zones: &IndexMap<String, Zone>, removed: &[Zone]) {
        let tracked_domains = self
            .occupancy
            .lock()
            .map(|occupancy| occupancy.tracked_domains().to_vec())
            .unwrap_or_default();
        let tracked: Vec<State> = tracked_domains
            .iter()
            .flat_map(|domain| self.states.domain_states(domain))
            .collect();

        if let Ok(mut occupancy) = self.occupancy.lock() {
            for zone in removed {
                occupancy.untrack_zone(&zone.id);
            }
            for id in zones.keys() {
                occupancy.track_zone(id);
            }
            occupancy.scan(&tracked);
        }
    }

    async fn register_storage_entities(&self) {
        let editable: Vec<Zone> = self.zones().into_iter().filter(Zone::editable).collect();
        if editable.is_empty() {
            return;
        }
        for zone in &editable {
            self.entity_registry
                .get_or_create(DOMAIN, &zone.entity_id.to_string(), &zone.id);
        }
        self.save_entity_registry().await;
    }

    async fn save_entity_registry(&self) {
        if let Err(e) = self.entity_registry.save().await {
            warn!("Failed to save entity registry: {}", e);
        }
    }

    /// Publish a zone's state with its current occupancy
    fn publish(&self, zone: &Zone, context: Context) {
        let count = self
            .occupancy
            .lock()
            .ok()
            .and_then(|occupancy| occupancy.count(&zone.id))
            .unwrap_or(0);
        self.states
            .set(zone.entity_id.clone(), count.to_string(), zone.attributes(), context);
    }

    // ==================== Event handlers ====================

    fn on_state_changed(&self, data: &StateChangedData) {
        let tracked = self
            .occupancy
            .lock()
            .map(|occupancy| occupancy.is_tracked(data.entity_id.domain()))
            .unwrap_or(false);
        if !tracked {
            return;
        }

        let entity_id = data.entity_id.to_string();
        let new_value = data.new_state.as_ref().map(|s| s.state.as_str());
        let changed = match self.occupancy.lock() {
            Ok(mut occupancy) => occupancy.apply_change(&entity_id, new_value),
            Err(_) => return,
        };

        let context = data
            .new_state
            .as_ref()
            .map(|s| s.context.child())
            .unwrap_or_default();
        for zone_id in changed {
            if let Some(zone) = self.get(&zone_id) {
                trace!(entity_id = %entity_id, zone = %zone_id, "Republishing zone occupancy");
                self.publish(&zone, context.clone());
            }
        }
    }

    fn on_core_config_updated(&self, context: Context) {
        let core = self.location.snapshot();
        let home = match self.zones.write() {
            Ok(mut zones) => {
                let generated = zones
                    .get(HOME_ZONE)
                    .map(|zone| zone.source == ZoneSource::Home)
                    .unwrap_or(false);
                if !generated {
                    return;
                }
                match Zone::home(&core) {
                    Ok(home) => {
                        zones.insert(HOME_ZONE.to_string(), home.clone());
                        home
                    }
                    Err(e) => {
                        warn!("Unable to rebuild home zone: {}", e);
                        return;
                    }
                }
            }
            Err(_) => return,
        };

        debug!("Core configuration changed, republishing home zone");
        self.publish(&home, context);
    }

    // ==================== Mutations ====================

    /// Create a user-editable zone
    ///
    /// The id is the slug of the name, suffixed `_2`, `_3`, ... when taken.
    /// The new zone starts with a count of 0 even if tracked entities already
    /// report its id.
    #[instrument(skip(self, data, context), fields(name = %data.name))]
    pub async fn create(&self, data: ZoneCreate, context: Context) -> ZoneResult<ZoneItem> {
        data.validate()?;
        let _guard = self.mutation.lock().await;

        let taken: HashSet<String> = self
            .zones
            .read()
            .map(|zones| zones.keys().cloned().collect())
            .unwrap_or_default();
        let entity_id = EntityId::generate(DOMAIN, &data.name, |candidate| {
            taken.contains(object_id_of(candidate))
        })
        .map_err(|e| ZoneError::InvalidInput(e.to_string()))?;
        let item = data.into_item(entity_id.object_id().to_string());
        let zone = Zone::from_item(&item)?;

        let mut items = self.storage_items();
        items.push(item.clone());
        self.store.save(&items).await?;

        if let Ok(mut zones) = self.zones.write() {
            zones.insert(item.id.clone(), zone.clone());
        }
        if let Ok(mut occupancy) = self.occupancy.lock() {
            occupancy.track_zone(&item.id);
        }
        self.entity_registry
            .get_or_create(DOMAIN, &zone.entity_id.to_string(), &item.id);
        self.save_entity_registry().await;
        self.publish(&zone, context);

        info!("Created zone {}", item.id);
        Ok(item)
    }

    /// Change fields of a user-editable zone
    #[instrument(skip(self, update, context))]
    pub async fn update(
        &self,
        zone_id: &str,
        update: ZoneUpdate,
        context: Context,
    ) -> ZoneResult<ZoneItem> {
        let _guard = self.mutation.lock().await;

        let current = self.editable_zone(zone_id)?;
        let item = update.apply(&current.to_item())?;
        let zone = Zone::from_item(&item)?;

        let items: Vec<ZoneItem> = self
            .storage_items()
            .into_iter()
            .map(|existing| if existing.id == item.id { item.clone() } else { existing })
            .collect();
        self.store.save(&items).await?;

        if let Ok(mut zones) = self.zones.write() {
            zones.insert(item.id.clone(), zone.clone());
        }
        self.publish(&zone, context);

        info!("Updated zone {}", item.id);
        Ok(item)
    }

    /// Remove a user-editable zone, its state and its entity registry entry
    #[instrument(skip(self, context))]
    pub async fn delete(&self, zone_id: &str, context: Context) -> ZoneResult<()> {
        let _guard = self.mutation.lock().await;

        let current = self.editable_zone(zone_id)?;
        let items: Vec<ZoneItem> = self
            .storage_items()
            .into_iter()
            .filter(|item| item.id != current.id)
            .collect();
        self.store.save(&items).await?;

        if let Ok(mut zones) = self.zones.write() {
            zones.shift_remove(&current.id);
        }
        if let Ok(mut occupancy) = self.occupancy.lock() {
            occupancy.untrack_zone(&current.id);
        }
        self.states.remove(&current.entity_id, context);

        let entity_id = current.entity_id.to_string();
        if self.entity_registry.remove(&entity_id).is_some() {
            self.save_entity_registry().await;
        }

        info!("Deleted zone {}", current.id);
        Ok(())
    }

    fn editable_zone(&self, zone_id: &str) -> ZoneResult<Zone> {
        let zone = self
            .get(zone_id)
            .ok_or_else(|| ZoneError::NotFound(zone_id.to_string()))?;
        if !zone.editable() {
            return Err(ZoneError::NotEditable(zone_id.to_string()));
        }
        Ok(zone)
    }

    // ==================== Queries ====================

    pub fn get(&self, zone_id: &str) -> Option<Zone> {
        self.zones
            .read()
            .ok()
            .and_then(|zones| zones.get(zone_id).cloned())
    }

    /// All live zones in registration order
    pub fn zones(&self) -> Vec<Zone> {
        self.zones
            .read()
            .map(|zones| zones.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stored form of every user-editable zone
    pub fn storage_items(&self) -> Vec<ZoneItem> {
        self.zones
            .read()
            .map(|zones| {
                zones
                    .values()
                    .filter(|zone| zone.editable())
                    .map(Zone::to_item)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.zones.read().map(|zones| zones.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current occupancy of a zone
    pub fn count(&self, zone_id: &str) -> Option<usize> {
        self.occupancy
            .lock()
            .ok()
            .and_then(|occupancy| occupancy.count(zone_id))
    }

    /// Smallest non-passive zone around a location
    pub fn active_zone(&self, latitude: f64, longitude: f64, accuracy: f64) -> Option<Zone> {
        let zones = self.zones.read().ok()?;
        resolve_active_with_accuracy(zones.values(), Point::new(latitude, longitude), accuracy)
            .cloned()
    }
}

fn object_id_of(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map(|(_, object_id)| object_id)
        .unwrap_or(entity_id)
}
