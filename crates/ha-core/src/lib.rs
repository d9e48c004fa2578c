//! Core types for the zone platform
//!
//! This crate provides the fundamental types shared by every other crate in the
//! workspace: EntityId, State, Event, Context and ServiceCall, plus the well-known
//! state values, attribute keys and event types the components agree on.

mod context;
mod entity_id;
mod event;
mod service_call;
mod slug;
mod state;

pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use service_call::ServiceCall;
pub use slug::slugify;
pub use state::{Attributes, State};

/// State value of an entity whose integration cannot reach it
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State value of an entity whose value is not known yet
pub const STATE_UNKNOWN: &str = "unknown";

/// Location state of a tracked entity inside the home zone
pub const STATE_HOME: &str = "home";


/// Well-known attribute keys
pub mod attrs {
    pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
    pub const ATTR_ICON: &str = "icon";
    pub const ATTR_EDITABLE: &str = "editable";
    pub const ATTR_LATITUDE: &str = "latitude";
    pub const ATTR_LONGITUDE: &str = "longitude";
}

/// Standard event types
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type fired after the core location configuration changed
    pub const CORE_CONFIG_UPDATE: &str = "core_config_updated";

    /// Data for STATE_CHANGED events
    ///
    /// `old_state` is `None` when the entity was just added and `new_state` is
    /// `None` when it was removed.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for CORE_CONFIG_UPDATE events: the keys that were changed
    #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
    pub struct CoreConfigUpdatedData {
        #[serde(default)]
        pub changed: Vec<String>,
    }

    impl EventData for CoreConfigUpdatedData {
        fn event_type() -> &'static str {
            CORE_CONFIG_UPDATE
        }
    }
}
