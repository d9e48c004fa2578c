//! Occupancy tracking
//!
//! A tracked entity (a `person` by default) is inside a zone when its state
//! value equals the zone id, e.g. `person.anne` = `"home"` or `"work"`.

use std::collections::{HashMap, HashSet};

use ha_core::{State, STATE_UNAVAILABLE, STATE_UNKNOWN};
use tracing::trace;

use super::DOMAIN;

/// Domains counted towards zone occupancy unless configured otherwise
pub const DEFAULT_TRACKED_DOMAINS: &[&str] = &["person"];

/// Per-zone membership of tracked entities
#[derive(Debug, Clone)]
pub struct OccupancyTracker {
    tracked_domains: Vec<String>,
    /// zone id -> entity ids inside
    members: HashMap<String, HashSet<String>>,
    /// entity id -> zone id it is counted in
    locations: HashMap<String, String>,
}

impl Default for OccupancyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_DOMAINS.iter().map(|d| d.to_string()).collect())
    }
}

impl OccupancyTracker {
    pub fn new(tracked_domains: Vec<String>) -> Self {
        Self {
            tracked_domains,
            members: HashMap::new(),
            locations: HashMap::new(),
        }
    }

    pub fn tracked_domains(&self) -> &[String] {
        &self.tracked_domains
    }

    /// Whether state changes of this domain affect occupancy
    pub fn is_tracked(&self, domain: &str) -> bool {
        domain != DOMAIN && self.tracked_domains.iter().any(|d| d == domain)
    }

    /// Start counting for a zone; an already tracked zone keeps its members
    pub fn track_zone(&mut self, zone_id: &str) {
        self.members.entry(zone_id.to_string()).or_default();
    }

    /// Stop counting for a zone and forget its members
    pub fn untrack_zone(&mut self, zone_id: &str) {
        if let Some(members) = self.members.remove(zone_id) {
            for entity_id in members {
                self.locations.remove(&entity_id);
            }
        }
    }

    pub fn is_zone_tracked(&self, zone_id: &str) -> bool {
        self.members.contains_key(zone_id)
    }

    /// Number of entities inside a zone, `None` for untracked zones
    pub fn count(&self, zone_id: &str) -> Option<usize> {
        self.members.get(zone_id).map(HashSet::len)
    }

    /// Zone an entity is currently counted in
    pub fn location_of(&self, entity_id: &str) -> Option<&str> {
        self.locations.get(entity_id).map(String::as_str)
    }

    /// Apply a state change of one entity
    ///
    /// `new_value` is `None` when the entity was removed. Returns the ids of
    /// the zones whose count changed.
    pub fn apply_change(&mut self, entity_id: &str, new_value: Option<&str>) -> Vec<String> {
        let new_zone = new_value
            .filter(|value| *value != STATE_UNAVAILABLE && *value != STATE_UNKNOWN)
            .filter(|value| self.members.contains_key(*value))
            .map(str::to_string);
        let old_zone = self.locations.get(entity_id).cloned();

        if old_zone == new_zone {
            return Vec::new();
        }

        let mut changed = Vec::with_capacity(2);
        if let Some(old) = old_zone {
            if let Some(members) = self.members.get_mut(&old) {
                members.remove(entity_id);
            }
            self.locations.remove(entity_id);
            changed.push(old);
        }
        if let Some(new) = new_zone {
            if let Some(members) = self.members.get_mut(&new) {
                members.insert(entity_id.to_string());
            }
            self.locations.insert(entity_id.to_string(), new.clone());
            changed.push(new);
        }

        trace!(entity_id, ?changed, "Occupancy changed");
        changed
    }

    /// Recompute all memberships from the current states
    pub fn scan<'a, I>(&mut self, states: I)
    where
        I: IntoIterator<Item = &'a State>,
    {
        for members in self.members.values_mut() {
            members.clear();
        }
        self.locations.clear();

        for state in states {
            if !self.is_tracked(state.entity_id.domain()) {
                continue;
            }
            self.apply_change(&state.entity_id.to_string(), Some(&state.state));
        }
    }

    /// Forget every zone and member
    pub fn clear(&mut self) {
        self.members.clear();
        self.locations.clear();
    }
}
