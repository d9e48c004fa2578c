//! Data entry flows
//!
//! A config flow is a small state machine that walks a user (or a discovery
//! source) through the steps needed to create a [`ConfigEntry`]. Each
//! integration registers a [`FlowHandler`] that builds fresh flows; the
//! [`FlowManager`] keeps flows in progress, feeds them user input and turns
//! their terminal results into persisted entries.
//!
//! Flows own their current state. A step returns a [`FlowStep`]: a form to
//! show next, an entry to create, or an abort. Returning
//! `Err(FlowError::Abort(reason))` from anywhere inside a step is the same as
//! returning an abort result.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::entry::{ConfigEntry, ConfigEntrySource, ConfigEntryUpdate};
use crate::manager::{ConfigEntries, ConfigEntriesError};

/// Flow user input and entry data
pub type FlowData = HashMap<String, Value>;

/// Abort reason used when the device or service already has an entry
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";
/// Abort reason used when another flow is handling the same device
pub const ABORT_ALREADY_IN_PROGRESS: &str = "already_in_progress";

/// Errors raised by flows and the flow manager
#[derive(Debug, Error)]
pub enum FlowError {
    /// Terminates the flow with the given reason
    #[error("Flow aborted: {0}")]
    Abort(String),

    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error("No flow handler registered for {0}")]
    UnknownHandler(String),

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Options flow not supported for {0}")]
    OptionsNotSupported(String),

    #[error("Invalid user input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Entries(#[from] ConfigEntriesError),
}

impl FlowError {
    pub fn abort(reason: impl Into<String>) -> Self {
        FlowError::Abort(reason.into())
    }
}

pub type FlowResultOf<T> = Result<T, FlowError>;

// ==================== Discovery info ====================

/// Device seen on the network by the DHCP watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpServiceInfo {
    pub ip: String,
    pub hostname: String,
    /// Lowercase hex without separators
    pub macaddress: String,
}

/// UPnP friendly name attribute
pub const ATTR_UPNP_FRIENDLY_NAME: &str = "friendlyName";
/// UPnP unique device name attribute
pub const ATTR_UPNP_UDN: &str = "UDN";
/// UPnP manufacturer attribute
pub const ATTR_UPNP_MANUFACTURER: &str = "manufacturer";

/// Device announced over SSDP
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SsdpServiceInfo {
    pub ssdp_location: Option<String>,
    #[serde(default)]
    pub upnp: HashMap<String, String>,
}

impl SsdpServiceInfo {
    pub fn upnp_attr(&self, key: &str) -> Option<&str> {
        self.upnp.get(key).map(String::as_str)
    }
}

/// How a flow was started
#[derive(Debug, Clone, PartialEq)]
pub enum FlowInit {
    User,
    Import(FlowData),
    Dhcp(DhcpServiceInfo),
    Ssdp(SsdpServiceInfo),
}

impl FlowInit {
    pub fn source(&self) -> ConfigEntrySource {
        match self {
            FlowInit::User => ConfigEntrySource::User,
            FlowInit::Import(_) => ConfigEntrySource::Import,
            FlowInit::Dhcp(_) => ConfigEntrySource::Dhcp,
            FlowInit::Ssdp(_) => ConfigEntrySource::Ssdp,
        }
    }
}

// ==================== Forms ====================

/// Kind of value a form field accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Password,
    Integer,
    Boolean,
    Select,
}

/// One field of a form schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl FormField {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            default: None,
            options: Vec::new(),
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// What a flow step asks the manager to do next
#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    Form {
        step_id: String,
        data_schema: Vec<FormField>,
        errors: HashMap<String, String>,
        description_placeholders: HashMap<String, String>,
    },
    CreateEntry {
        title: String,
        data: FlowData,
    },
    Abort {
        reason: String,
    },
}

impl FlowStep {
    pub fn form(step_id: impl Into<String>, data_schema: Vec<FormField>) -> Self {
        FlowStep::Form {
            step_id: step_id.into(),
            data_schema,
            errors: HashMap::new(),
            description_placeholders: HashMap::new(),
        }
    }

    pub fn create_entry(title: impl Into<String>, data: FlowData) -> Self {
        FlowStep::CreateEntry {
            title: title.into(),
            data,
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        FlowStep::Abort {
            reason: reason.into(),
        }
    }

    /// Attach errors to a form; no effect on other results
    pub fn with_errors(mut self, new_errors: HashMap<String, String>) -> Self {
        if let FlowStep::Form { ref mut errors, .. } = self {
            *errors = new_errors;
        }
        self
    }

    /// Attach description placeholders to a form
    pub fn with_placeholders(mut self, placeholders: HashMap<String, String>) -> Self {
        if let FlowStep::Form {
            ref mut description_placeholders,
            ..
        } = self
        {
            *description_placeholders = placeholders;
        }
        self
    }
}

pub type FlowStepResult = FlowResultOf<FlowStep>;

/// Result type reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    Form,
    CreateEntry,
    Abort,
}

/// Serialized outcome of a flow step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    pub flow_id: String,
    pub handler: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_schema: Option<Vec<FormField>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub errors: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub description_placeholders: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FlowData>,
    /// Entry created or updated by this result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FlowResult {
    fn empty(result_type: FlowResultType, flow_id: &str, handler: &str) -> Self {
        Self {
            result_type,
            flow_id: flow_id.to_string(),
            handler: handler.to_string(),
            step_id: None,
            data_schema: None,
            errors: HashMap::new(),
            description_placeholders: HashMap::new(),
            title: None,
            data: None,
            entry_id: None,
            reason: None,
        }
    }

    fn aborted(flow_id: &str, handler: &str, reason: String) -> Self {
        Self {
            reason: Some(reason),
            ..Self::empty(FlowResultType::Abort, flow_id, handler)
        }
    }

    fn created(flow_id: &str, handler: &str, title: String, data: FlowData, entry_id: String) -> Self {
        Self {
            title: Some(title),
            data: Some(data),
            entry_id: Some(entry_id),
            ..Self::empty(FlowResultType::CreateEntry, flow_id, handler)
        }
    }

    fn form(flow_id: &str, handler: &str, step: FlowStep) -> Self {
        match step {
            FlowStep::Form {
                step_id,
                data_schema,
                errors,
                description_placeholders,
            } => Self {
                step_id: Some(step_id),
                data_schema: Some(data_schema),
                errors,
                description_placeholders,
                ..Self::empty(FlowResultType::Form, flow_id, handler)
            },
            _ => Self::empty(FlowResultType::Form, flow_id, handler),
        }
    }
}

// ==================== Flow context ====================

/// Context of a config flow, visible in the progress listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
    pub source: ConfigEntrySource,
    #[serde(default)]
    pub show_advanced_options: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub title_placeholders: HashMap<String, String>,
}

impl FlowContext {
    pub fn new(source: ConfigEntrySource) -> Self {
        Self {
            source,
            ..Default::default()
        }
    }

    pub fn with_advanced_options(mut self, show: bool) -> Self {
        self.show_advanced_options = show;
        self
    }
}

/// A flow in progress as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowProgress {
    pub flow_id: String,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub context: FlowContext,
}

/// Handle a flow uses during its steps to reach the entry store and the
/// other flows in progress
pub struct FlowScope {
    pub flow_id: String,
    pub handler: String,
    pub context: FlowContext,
    entries: Arc<ConfigEntries>,
    progress: Arc<DashMap<String, FlowProgress>>,
}

impl FlowScope {
    pub fn entries(&self) -> &ConfigEntries {
        &self.entries
    }

    /// Claim a unique id for this flow
    ///
    /// With `raise_on_progress`, aborts `already_in_progress` when another
    /// flow of the same handler holds the id. Returns the entry already
    /// configured with it, if any.
    pub fn set_unique_id(
        &mut self,
        unique_id: &str,
        raise_on_progress: bool,
    ) -> FlowResultOf<Option<ConfigEntry>> {
        if raise_on_progress {
            let taken = self.progress.iter().any(|p| {
                p.flow_id != self.flow_id
                    && p.handler == self.handler
                    && p.context.unique_id.as_deref() == Some(unique_id)
            });
            if taken {
                return Err(FlowError::abort(ABORT_ALREADY_IN_PROGRESS));
            }
        }

        self.context.unique_id = Some(unique_id.to_string());
        if let Some(mut progress) = self.progress.get_mut(&self.flow_id) {
            progress.context.unique_id = Some(unique_id.to_string());
        }

        Ok(self.entries.get_by_unique_id(&self.handler, unique_id))
    }

    /// Abort `already_configured` if an entry holds this flow's unique id
    ///
    /// When `updates` is given, the existing entry's data is merged with it
    /// first (only written if something changed).
    pub async fn abort_if_unique_id_configured(
        &self,
        updates: Option<FlowData>,
    ) -> FlowResultOf<()> {
        let Some(unique_id) = self.context.unique_id.as_deref() else {
            return Ok(());
        };
        let Some(entry) = self.entries.get_by_unique_id(&self.handler, unique_id) else {
            return Ok(());
        };

        if let Some(updates) = updates {
            let mut data = entry.data.clone();
            data.extend(updates);
            if data != entry.data {
                info!(
                    "Updating {} entry {} from {:?} discovery",
                    self.handler, entry.entry_id, self.context.source
                );
                self.entries
                    .update(&entry.entry_id, ConfigEntryUpdate::new().data(data))
                    .await?;
            }
        }

        Err(FlowError::abort(ABORT_ALREADY_CONFIGURED))
    }

    /// Abort `already_configured` if an entry's data contains `data`
    pub fn abort_if_entries_match(&self, data: &FlowData) -> FlowResultOf<()> {
        match self.entries.find_matching(&self.handler, data) {
            Some(_) => Err(FlowError::abort(ABORT_ALREADY_CONFIGURED)),
            None => Ok(()),
        }
    }

    /// Set placeholders used to title a discovered flow
    pub fn set_title_placeholders(&mut self, placeholders: HashMap<String, String>) {
        self.context.title_placeholders = placeholders.clone();
        if let Some(mut progress) = self.progress.get_mut(&self.flow_id) {
            progress.context.title_placeholders = placeholders;
        }
    }
}

// ==================== Flow traits ====================

/// A config flow for one integration
#[async_trait]
pub trait ConfigFlow: Send {
    /// Enter the flow through the step matching its source
    async fn start(&mut self, scope: &mut FlowScope, init: FlowInit) -> FlowStepResult;

    /// Feed user input to the step currently shown
    async fn step(&mut self, scope: &mut FlowScope, user_input: FlowData) -> FlowStepResult;
}

/// A flow editing the options of an existing entry
///
/// A `CreateEntry` result replaces the entry's options with its data.
#[async_trait]
pub trait OptionsFlow: Send {
    async fn init(&mut self, entry: &ConfigEntry) -> FlowStepResult;

    async fn step(&mut self, entry: &ConfigEntry, user_input: FlowData) -> FlowStepResult;
}

/// Builds flows for an integration domain
pub trait FlowHandler: Send + Sync {
    fn domain(&self) -> &str;

    fn create_flow(&self) -> Box<dyn ConfigFlow>;

    fn create_options_flow(&self, _entry: &ConfigEntry) -> Option<Box<dyn OptionsFlow>> {
        None
    }
}

// ==================== Flow manager ====================

struct ActiveFlow {
    flow: Box<dyn ConfigFlow>,
    scope: FlowScope,
}

struct ActiveOptionsFlow {
    entry_id: String,
    handler: String,
    flow: Box<dyn OptionsFlow>,
}

/// Keeps config and options flows in progress
pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    handlers: DashMap<String, Arc<dyn FlowHandler>>,
    flows: DashMap<String, Arc<Mutex<ActiveFlow>>>,
    progress: Arc<DashMap<String, FlowProgress>>,
    options_flows: DashMap<String, Arc<Mutex<ActiveOptionsFlow>>>,
}

impl FlowManager {
    pub fn new(entries: Arc<ConfigEntries>) -> Self {
        Self {
            entries,
            handlers: DashMap::new(),
            flows: DashMap::new(),
            progress: Arc::new(DashMap::new()),
            options_flows: DashMap::new(),
        }
    }

    pub fn entries(&self) -> &Arc<ConfigEntries> {
        &self.entries
    }

    /// Register the flow handler of an integration
    pub fn register(&self, handler: Arc<dyn FlowHandler>) {
        let domain = handler.domain().to_string();
        debug!("Registered config flow handler: {}", domain);
        self.handlers.insert(domain, handler);
    }

    pub fn has_handler(&self, domain: &str) -> bool {
        self.handlers.contains_key(domain)
    }

    /// Flows currently waiting for input
    pub fn progress(&self) -> Vec<FlowProgress> {
        self.progress.iter().map(|r| r.value().clone()).collect()
    }

    pub fn progress_for(&self, flow_id: &str) -> Option<FlowProgress> {
        self.progress.get(flow_id).map(|r| r.value().clone())
    }

    /// Start a config flow
    #[instrument(skip(self, context, init))]
    pub async fn init(
        &self,
        handler: &str,
        context: FlowContext,
        init: FlowInit,
    ) -> FlowResultOf<FlowResult> {
        let factory = self
            .handlers
            .get(handler)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(handler.to_string()))?;

        let flow_id = ulid::Ulid::new().to_string();
        self.progress.insert(
            flow_id.clone(),
            FlowProgress {
                flow_id: flow_id.clone(),
                handler: handler.to_string(),
                step_id: None,
                context: context.clone(),
            },
        );

        let mut active = ActiveFlow {
            flow: factory.create_flow(),
            scope: FlowScope {
                flow_id: flow_id.clone(),
                handler: handler.to_string(),
                context,
                entries: self.entries.clone(),
                progress: self.progress.clone(),
            },
        };

        debug!("Starting {} flow {} ({:?})", handler, flow_id, init.source());
        let outcome = active.flow.start(&mut active.scope, init).await;

        match self.finish_step(&active.scope, outcome).await {
            Ok(result) => {
                if result.result_type == FlowResultType::Form {
                    self.flows.insert(flow_id, Arc::new(Mutex::new(active)));
                }
                Ok(result)
            }
            Err(e) => {
                self.progress.remove(&flow_id);
                Err(e)
            }
        }
    }

    /// Continue a config flow with user input
    #[instrument(skip(self, user_input))]
    pub async fn configure(&self, flow_id: &str, user_input: FlowData) -> FlowResultOf<FlowResult> {
        let active = self
            .flows
            .get(flow_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let mut guard = active.lock().await;
        let ActiveFlow { flow, scope } = &mut *guard;
        let outcome = flow.step(scope, user_input).await;

        // Invalid input leaves the flow where it was
        if let Err(e @ FlowError::InvalidInput(_)) = outcome {
            return Err(e);
        }

        let result = self.finish_step(scope, outcome).await;
        if !matches!(&result, Ok(r) if r.result_type == FlowResultType::Form) {
            self.progress.remove(flow_id);
            self.flows.remove(flow_id);
        }
        result
    }

    /// Drop a flow in progress
    pub fn abort(&self, flow_id: &str) -> FlowResultOf<()> {
        self.progress.remove(flow_id);
        self.flows
            .remove(flow_id)
            .map(|_| ())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))
    }

    async fn finish_step(&self, scope: &FlowScope, outcome: FlowStepResult) -> FlowResultOf<FlowResult> {
        let flow_id = scope.flow_id.as_str();
        let handler = scope.handler.as_str();

        let step = match outcome {
            Ok(step) => step,
            Err(FlowError::Abort(reason)) => FlowStep::Abort { reason },
            Err(e) => return Err(e),
        };

        match step {
            form @ FlowStep::Form { .. } => {
                let result = FlowResult::form(flow_id, handler, form);
                if let Some(mut progress) = self.progress.get_mut(flow_id) {
                    progress.step_id = result.step_id.clone();
                }
                Ok(result)
            }
            FlowStep::Abort { reason } => {
                debug!("Flow {} ({}) aborted: {}", flow_id, handler, reason);
                self.progress.remove(flow_id);
                Ok(FlowResult::aborted(flow_id, handler, reason))
            }
            FlowStep::CreateEntry { title, data } => {
                self.progress.remove(flow_id);

                let mut entry = ConfigEntry::new(handler, title.clone())
                    .with_data(data.clone())
                    .with_source(scope.context.source);
                if let Some(ref unique_id) = scope.context.unique_id {
                    entry = entry.with_unique_id(unique_id.clone());
                }

                match self.entries.add(entry).await {
                    Ok(entry) => Ok(FlowResult::created(
                        flow_id,
                        handler,
                        title,
                        data,
                        entry.entry_id,
                    )),
                    Err(ConfigEntriesError::AlreadyExists { .. }) => {
                        warn!("Flow {} ({}) raced an existing entry", flow_id, handler);
                        Ok(FlowResult::aborted(
                            flow_id,
                            handler,
                            ABORT_ALREADY_CONFIGURED.to_string(),
                        ))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    // ==================== Options flows ====================

    /// Start an options flow for an existing entry
    #[instrument(skip(self))]
    pub async fn init_options(&self, entry_id: &str) -> FlowResultOf<FlowResult> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        let factory = self
            .handlers
            .get(&entry.domain)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowError::UnknownHandler(entry.domain.clone()))?;

        let mut flow = factory
            .create_options_flow(&entry)
            .ok_or_else(|| FlowError::OptionsNotSupported(entry.domain.clone()))?;

        let flow_id = ulid::Ulid::new().to_string();
        let outcome = flow.init(&entry).await;
        let result = self
            .finish_options_step(&flow_id, &entry, outcome)
            .await?;

        if result.result_type == FlowResultType::Form {
            self.options_flows.insert(
                flow_id,
                Arc::new(Mutex::new(ActiveOptionsFlow {
                    entry_id: entry.entry_id.clone(),
                    handler: entry.domain.clone(),
                    flow,
                })),
            );
        }
        Ok(result)
    }

    /// Continue an options flow with user input
    #[instrument(skip(self, user_input))]
    pub async fn configure_options(
        &self,
        flow_id: &str,
        user_input: FlowData,
    ) -> FlowResultOf<FlowResult> {
        let active = self
            .options_flows
            .get(flow_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let mut guard = active.lock().await;
        let entry = match self.entries.get(&guard.entry_id) {
            Some(entry) => entry,
            None => {
                self.options_flows.remove(flow_id);
                return Ok(FlowResult::aborted(
                    flow_id,
                    &guard.handler,
                    "entry_removed".to_string(),
                ));
            }
        };

        let outcome = guard.flow.step(&entry, user_input).await;
        let result = self.finish_options_step(flow_id, &entry, outcome).await;
        if !matches!(&result, Ok(r) if r.result_type == FlowResultType::Form) {
            self.options_flows.remove(flow_id);
        }
        result
    }

    async fn finish_options_step(
        &self,
        flow_id: &str,
        entry: &ConfigEntry,
        outcome: FlowStepResult,
    ) -> FlowResultOf<FlowResult> {
        let handler = entry.domain.as_str();
        let step = match outcome {
            Ok(step) => step,
            Err(FlowError::Abort(reason)) => FlowStep::Abort { reason },
            Err(e) => return Err(e),
        };

        match step {
            form @ FlowStep::Form { .. } => Ok(FlowResult::form(flow_id, handler, form)),
            FlowStep::Abort { reason } => Ok(FlowResult::aborted(flow_id, handler, reason)),
            FlowStep::CreateEntry { title, data } => {
                self.entries
                    .update(
                        &entry.entry_id,
                        ConfigEntryUpdate::new().options(data.clone()),
                    )
                    .await?;
                info!("Updated options of {} entry {}", handler, entry.entry_id);
                Ok(FlowResult::created(
                    flow_id,
                    handler,
                    title,
                    data,
                    entry.entry_id.clone(),
                ))
            }
        }
    }
}
