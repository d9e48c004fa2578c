//! Config Entries
//!
//! This crate provides the configuration entry system and the data entry
//! flows that create entries.
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`FlowManager`] - Config and options flows in progress
//! - [`ConfigFlow`] / [`OptionsFlow`] - Traits implemented by integrations
//!
//! # Storage
//!
//! Config entries are persisted in `.storage/core.config_entries` with
//! version tracking for migrations.

pub mod entry;
pub mod flow;
pub mod manager;

// Re-export main types
pub use entry::{ConfigEntry, ConfigEntrySource, ConfigEntryUpdate};

pub use flow::{
    ConfigFlow, DhcpServiceInfo, FieldType, FlowContext, FlowData, FlowError, FlowHandler,
    FlowInit, FlowManager, FlowProgress, FlowResult, FlowResultOf, FlowResultType, FlowScope,
    FlowStep, FlowStepResult, FormField, OptionsFlow, SsdpServiceInfo, ABORT_ALREADY_CONFIGURED,
    ABORT_ALREADY_IN_PROGRESS, ATTR_UPNP_FRIENDLY_NAME, ATTR_UPNP_MANUFACTURER, ATTR_UPNP_UDN,
};

pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, STORAGE_KEY,
    STORAGE_MINOR_VERSION, STORAGE_VERSION,
};
