//! Version config flow
//!
//! States and transitions:
//!
//! | state            | input                         | next                 |
//! |------------------|-------------------------------|----------------------|
//! | `User`           | local or haio source          | create entry         |
//! | `User`           | any source, basic mode        | create entry         |
//! | `User`           | other source, advanced mode   | `VersionSource`      |
//! | `VersionSource`  | channel / image / board / beta | create entry        |
//!
//! Imports from YAML skip the states entirely.

use std::collections::HashMap;

use async_trait::async_trait;
use ha_config_entries::{
    ConfigFlow, FieldType, FlowData, FlowError, FlowHandler, FlowInit, FlowResultOf, FlowScope,
    FlowStep, FlowStepResult, FormField,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    board_slug, container_image, valid_boards, valid_container_images, Channel, VersionSource,
    ATTR_VERSION_SOURCE, CONF_BETA, CONF_BOARD, CONF_CHANNEL, CONF_IMAGE, CONF_NAME,
    CONF_SOURCE, CONF_VERSION_SOURCE, DEFAULT_BOARD, DEFAULT_IMAGE, DEFAULT_NAME,
    DEFAULT_NAME_CURRENT, DEFAULT_NAME_LATEST, DOMAIN, SOURCE_DOCKER, SOURCE_HASSIO, STEP_USER,
    STEP_VERSION_SOURCE, VALID_IMAGES,
};

/// Data of a version config entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionConfig {
    pub name: String,
    pub channel: Channel,
    pub image: String,
    pub board: String,
    /// Display name of the source
    pub version_source: String,
    pub source: VersionSource,
    /// Beta toggle of the PyPI source, kept apart from the channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta: Option<bool>,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            channel: Channel::Stable,
            image: DEFAULT_IMAGE.to_string(),
            board: DEFAULT_BOARD.to_string(),
            version_source: VersionSource::Local.display_name().to_string(),
            source: VersionSource::Local,
            beta: None,
        }
    }
}

impl VersionConfig {
    fn set_source(&mut self, source: VersionSource) {
        self.source = source;
        self.version_source = source.display_name().to_string();
    }

    /// Entry title: "Current Version" for local installs, otherwise the
    /// source name with the channel appended when it is not stable
    pub fn title(&self) -> String {
        if self.source == VersionSource::Local {
            return DEFAULT_NAME_CURRENT.to_string();
        }
        match self.channel {
            Channel::Stable => self.version_source.clone(),
            channel => format!("{} {}", self.version_source, channel.title()),
        }
    }

    pub fn to_data(&self) -> FlowData {
        let mut data = FlowData::new();
        data.insert(CONF_NAME.into(), Value::from(self.name.clone()));
        data.insert(CONF_CHANNEL.into(), Value::from(self.channel.as_str()));
        data.insert(CONF_IMAGE.into(), Value::from(self.image.clone()));
        data.insert(CONF_BOARD.into(), Value::from(self.board.clone()));
        data.insert(
            CONF_VERSION_SOURCE.into(),
            Value::from(self.version_source.clone()),
        );
        data.insert(CONF_SOURCE.into(), Value::from(self.source.as_str()));
        if let Some(beta) = self.beta {
            data.insert(CONF_BETA.into(), Value::from(beta));
        }
        data
    }

    /// Image slug of the configured board
    pub fn board_slug(&self) -> Option<&'static str> {
        board_slug(&self.board)
    }
}

/// Convert a `sensor: - platform: version` YAML entry
pub fn convert_imported_configuration(config: &FlowData) -> FlowResultOf<VersionConfig> {
    let mut data = VersionConfig::default();

    if config.get(CONF_BETA).and_then(Value::as_bool).unwrap_or(false) {
        data.channel = Channel::Beta;
    }

    if let Some(source) = optional_str(config, CONF_SOURCE)?.filter(|s| !s.is_empty()) {
        let source = match source {
            SOURCE_HASSIO => VersionSource::Supervisor,
            SOURCE_DOCKER => VersionSource::Container,
            other => VersionSource::parse(other)
                .ok_or_else(|| FlowError::InvalidInput(format!("unknown source '{}'", other)))?,
        };
        data.set_source(source);
    }

    if let Some(image) = optional_str(config, CONF_IMAGE)?.filter(|i| !i.is_empty()) {
        if image != DEFAULT_IMAGE {
            data.image = if data.source == VersionSource::Container {
                container_image(image)
            } else {
                image.to_string()
            };
        }
    }

    data.name = match optional_str(config, CONF_NAME)?.filter(|n| *n != DEFAULT_NAME) {
        Some(name) => name.to_string(),
        None if data.source == VersionSource::Local => DEFAULT_NAME_CURRENT.to_string(),
        None => DEFAULT_NAME_LATEST.to_string(),
    };

    Ok(data)
}

fn optional_str<'a>(input: &'a FlowData, key: &str) -> FlowResultOf<Option<&'a str>> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(FlowError::InvalidInput(format!(
            "{} must be a string, got {}",
            key, other
        ))),
    }
}

/// Value of a select field, checked against its choices
fn select<'a>(
    input: &'a FlowData,
    key: &str,
    default: &'a str,
    choices: &[&str],
) -> FlowResultOf<&'a str> {
    let value = optional_str(input, key)?.unwrap_or(default);
    if choices.contains(&value) {
        Ok(value)
    } else {
        Err(FlowError::InvalidInput(format!(
            "value '{}' is not a valid option for {}",
            value, key
        )))
    }
}

/// Named states of the flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionFlowState {
    User,
    VersionSource,
}

/// Next state after the user picked a source; `None` finishes the flow
fn after_user(source: VersionSource, show_advanced_options: bool) -> Option<VersionFlowState> {
    match (show_advanced_options, source) {
        (false, _) | (true, VersionSource::Local) | (true, VersionSource::Haio) => None,
        (true, _) => Some(VersionFlowState::VersionSource),
    }
}

/// Version setup wizard
pub struct VersionFlow {
    state: VersionFlowState,
    entry: VersionConfig,
}

impl Default for VersionFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionFlow {
    pub fn new() -> Self {
        Self {
            state: VersionFlowState::User,
            entry: VersionConfig::default(),
        }
    }

    pub fn state(&self) -> VersionFlowState {
        self.state
    }

    fn user_form(&self) -> FlowStep {
        FlowStep::form(
            STEP_USER,
            vec![FormField::required(CONF_VERSION_SOURCE, FieldType::Select)
                .with_default(VersionSource::Local.display_name())
                .with_options(VersionSource::ALL.iter().map(|s| s.display_name()))],
        )
    }

    fn version_source_form(&self) -> FlowStep {
        let channel = || {
            FormField::required(CONF_CHANNEL, FieldType::Select)
                .with_default(Channel::Stable.title())
                .with_options(Channel::ALL.iter().map(|c| c.title()))
        };

        let schema = match self.entry.source {
            VersionSource::Supervisor => vec![
                channel(),
                FormField::required(CONF_IMAGE, FieldType::Select)
                    .with_default(DEFAULT_IMAGE)
                    .with_options(VALID_IMAGES.iter().copied()),
                FormField::required(CONF_BOARD, FieldType::Select)
                    .with_default(DEFAULT_BOARD)
                    .with_options(valid_boards()),
            ],
            VersionSource::Container => vec![
                channel(),
                FormField::required(CONF_IMAGE, FieldType::Select)
                    .with_default(DEFAULT_IMAGE)
                    .with_options(valid_container_images()),
            ],
            _ => vec![FormField::required(CONF_BETA, FieldType::Boolean).with_default(false)],
        };

        let placeholders = HashMap::from([(
            ATTR_VERSION_SOURCE.to_string(),
            self.entry.version_source.clone(),
        )]);
        FlowStep::form(STEP_VERSION_SOURCE, schema).with_placeholders(placeholders)
    }

    fn create_entry(&self) -> FlowStep {
        debug!("Creating version entry for source {}", self.entry.source.as_str());
        FlowStep::create_entry(self.entry.title(), self.entry.to_data())
    }

    fn handle_user(&mut self, show_advanced_options: bool, input: FlowData) -> FlowStepResult {
        let choices: Vec<&str> = VersionSource::ALL.iter().map(|s| s.display_name()).collect();
        let chosen = select(
            &input,
            CONF_VERSION_SOURCE,
            VersionSource::Local.display_name(),
            &choices,
        )?;
        let source = VersionSource::from_display_name(chosen)
            .ok_or_else(|| FlowError::InvalidInput(chosen.to_string()))?;
        self.entry.set_source(source);

        match after_user(source, show_advanced_options) {
            None => Ok(self.create_entry()),
            Some(next) => {
                self.state = next;
                Ok(self.version_source_form())
            }
        }
    }

    fn handle_version_source(&mut self, input: FlowData) -> FlowStepResult {
        let channels: Vec<&str> = Channel::ALL.iter().map(|c| c.title()).collect();

        match self.entry.source {
            VersionSource::Supervisor => {
                let channel = select(&input, CONF_CHANNEL, Channel::Stable.title(), &channels)?;
                let image = select(&input, CONF_IMAGE, DEFAULT_IMAGE, VALID_IMAGES)?;
                let boards = valid_boards();
                let board = select(&input, CONF_BOARD, DEFAULT_BOARD, &boards)?;

                self.entry.channel = Channel::parse(channel).unwrap_or(Channel::Stable);
                self.entry.image = image.to_string();
                self.entry.board = board.to_string();
            }
            VersionSource::Container => {
                let channel = select(&input, CONF_CHANNEL, Channel::Stable.title(), &channels)?;
                let images = valid_container_images();
                let images: Vec<&str> = images.iter().map(String::as_str).collect();
                let image = select(&input, CONF_IMAGE, DEFAULT_IMAGE, &images)?;

                self.entry.channel = Channel::parse(channel).unwrap_or(Channel::Stable);
                self.entry.image = image.to_string();
            }
            _ => {
                let beta = match input.get(CONF_BETA) {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(beta)) => *beta,
                    Some(other) => {
                        return Err(FlowError::InvalidInput(format!(
                            "beta must be a boolean, got {}",
                            other
                        )))
                    }
                };
                self.entry.beta = Some(beta);
            }
        }

        Ok(self.create_entry())
    }
}

#[async_trait]
impl ConfigFlow for VersionFlow {
    async fn start(&mut self, scope: &mut FlowScope, init: FlowInit) -> FlowStepResult {
        match init {
            FlowInit::User => {
                self.state = VersionFlowState::User;
                self.entry = VersionConfig::default();
                Ok(self.user_form())
            }
            FlowInit::Import(config) => {
                self.entry = convert_imported_configuration(&config)?;
                scope.abort_if_entries_match(&self.entry.to_data())?;
                Ok(self.create_entry())
            }
            other => Err(FlowError::UnknownStep(format!("{:?}", other.source()))),
        }
    }

    async fn step(&mut self, scope: &mut FlowScope, user_input: FlowData) -> FlowStepResult {
        match self.state {
            VersionFlowState::User => {
                self.handle_user(scope.context.show_advanced_options, user_input)
            }
            VersionFlowState::VersionSource => self.handle_version_source(user_input),
        }
    }
}

/// Registers the version flow with the flow manager
pub struct VersionFlowHandler;

impl FlowHandler for VersionFlowHandler {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn create_flow(&self) -> Box<dyn ConfigFlow> {
        Box::new(VersionFlow::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_config_entries::{
        ConfigEntries, ConfigEntrySource, FlowContext, FlowManager, FlowResultType,
    };
    use ha_registries::Storage;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn make_test_setup() -> (TempDir, FlowManager) {
        let temp_dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(temp_dir.path()))));
        let flows = FlowManager::new(entries);
        flows.register(Arc::new(VersionFlowHandler));
        (temp_dir, flows)
    }

    fn input(value: serde_json::Value) -> FlowData {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_basic_form_creates_local_entry() {
        let (_dir, flows) = make_test_setup();
        let result = flows
            .init(DOMAIN, FlowContext::new(ConfigEntrySource::User), FlowInit::User)
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::Form);
        assert_eq!(result.step_id.as_deref(), Some("user"));

        let result = flows
            .configure(
                &result.flow_id,
                input(json!({"version_source": "Local installation"})),
            )
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);
        assert_eq!(result.title.as_deref(), Some("Current Version"));
        assert_eq!(
            result.data.unwrap(),
            input(json!({
                "name": "",
                "channel": "stable",
                "image": "default",
                "board": "OVA",
                "version_source": "Local installation",
                "source": "local"
            }))
        );
    }

    #[tokio::test]
    async fn test_basic_mode_skips_version_source_step() {
        let (_dir, flows) = make_test_setup();
        let result = flows
            .init(DOMAIN, FlowContext::new(ConfigEntrySource::User), FlowInit::User)
            .await
            .unwrap();

        let result = flows
            .configure(&result.flow_id, input(json!({"version_source": "Docker Hub"})))
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);
        assert_eq!(result.title.as_deref(), Some("Docker Hub"));
        assert_eq!(result.data.unwrap()["source"], json!("container"));
    }

    #[tokio::test]
    async fn test_advanced_supervisor() {
        let (_dir, flows) = make_test_setup();
        let context = FlowContext::new(ConfigEntrySource::User).with_advanced_options(true);
        let result = flows.init(DOMAIN, context, FlowInit::User).await.unwrap();

        let result = flows
            .configure(
                &result.flow_id,
                input(json!({"version_source": "Home Assistant Versions"})),
            )
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::Form);
        assert_eq!(result.step_id.as_deref(), Some("version_source"));
        assert_eq!(
            result.description_placeholders.get("version_source").map(String::as_str),
            Some("Home Assistant Versions")
        );
        let fields: Vec<String> = result
            .data_schema
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(fields, vec!["channel", "image", "board"]);

        let result = flows
            .configure(
                &result.flow_id,
                input(json!({"channel": "Dev", "image": "generic-x86-64", "board": "Intel NUC"})),
            )
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);
        assert_eq!(result.title.as_deref(), Some("Home Assistant Versions Dev"));
        let data = result.data.unwrap();
        assert_eq!(data["channel"], json!("dev"));
        assert_eq!(data["image"], json!("generic-x86-64"));
        assert_eq!(data["board"], json!("Intel NUC"));
        assert_eq!(data["source"], json!("supervisor"));
    }

    #[tokio::test]
    async fn test_advanced_pypi_beta() {
        let (_dir, flows) = make_test_setup();
        let context = FlowContext::new(ConfigEntrySource::User).with_advanced_options(true);
        let result = flows.init(DOMAIN, context, FlowInit::User).await.unwrap();

        let result = flows
            .configure(
                &result.flow_id,
                input(json!({"version_source": "Python Package Index (PyPI)"})),
            )
            .await
            .unwrap();
        let fields: Vec<String> = result
            .data_schema
            .clone()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(fields, vec!["beta"]);

        let result = flows
            .configure(&result.flow_id, input(json!({"beta": true})))
            .await
            .unwrap();
        assert_eq!(result.title.as_deref(), Some("Python Package Index (PyPI)"));
        let data = result.data.unwrap();
        assert_eq!(data["beta"], json!(true));
        assert_eq!(data["channel"], json!("stable"));
        assert_eq!(data["source"], json!("pypi"));
    }

    #[tokio::test]
    async fn test_advanced_haio_creates_immediately() {
        let (_dir, flows) = make_test_setup();
        let context = FlowContext::new(ConfigEntrySource::User).with_advanced_options(true);
        let result = flows.init(DOMAIN, context, FlowInit::User).await.unwrap();

        let result = flows
            .configure(
                &result.flow_id,
                input(json!({"version_source": "Home Assistant Website"})),
            )
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);
        assert_eq!(result.title.as_deref(), Some("Home Assistant Website"));
    }

    #[tokio::test]
    async fn test_invalid_choice_keeps_flow() {
        let (_dir, flows) = make_test_setup();
        let context = FlowContext::new(ConfigEntrySource::User).with_advanced_options(true);
        let result = flows.init(DOMAIN, context, FlowInit::User).await.unwrap();
        let flow_id = result.flow_id.clone();

        let outcome = flows
            .configure(&flow_id, input(json!({"version_source": "Floppy Disk"})))
            .await;
        assert!(matches!(outcome, Err(FlowError::InvalidInput(_))));

        let result = flows
            .configure(&flow_id, input(json!({"version_source": "Docker Hub"})))
            .await
            .unwrap();
        assert_eq!(result.step_id.as_deref(), Some("version_source"));

        let outcome = flows
            .configure(&flow_id, input(json!({"image": "qemux86-64"})))
            .await;
        assert!(matches!(outcome, Err(FlowError::InvalidInput(_))));

        let result = flows
            .configure(&flow_id, input(json!({"image": "qemux86-64-homeassistant"})))
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);
        assert_eq!(result.data.unwrap()["image"], json!("qemux86-64-homeassistant"));
    }

    #[tokio::test]
    async fn test_import_and_duplicate_import() {
        let (_dir, flows) = make_test_setup();
        let config = input(json!({"source": "docker", "image": "odroid-n2", "beta": true}));

        let result = flows
            .init(
                DOMAIN,
                FlowContext::new(ConfigEntrySource::Import),
                FlowInit::Import(config.clone()),
            )
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::CreateEntry);
        assert_eq!(result.title.as_deref(), Some("Docker Hub Beta"));
        let data = result.data.unwrap();
        assert_eq!(data["source"], json!("container"));
        assert_eq!(data["image"], json!("odroid-n2-homeassistant"));
        assert_eq!(data["name"], json!("Latest Version"));

        let result = flows
            .init(
                DOMAIN,
                FlowContext::new(ConfigEntrySource::Import),
                FlowInit::Import(config),
            )
            .await
            .unwrap();
        assert_eq!(result.result_type, FlowResultType::Abort);
        assert_eq!(result.reason.as_deref(), Some("already_configured"));
    }

    #[test]
    fn test_convert_imported_configuration() {
        let local = convert_imported_configuration(&FlowData::new()).unwrap();
        assert_eq!(local.source, VersionSource::Local);
        assert_eq!(local.name, "Current Version");
        assert_eq!(local.title(), "Current Version");

        let hassio = convert_imported_configuration(&input(json!({
            "source": "hassio",
            "image": "qemux86",
            "name": "Supervisor"
        })))
        .unwrap();
        assert_eq!(hassio.source, VersionSource::Supervisor);
        assert_eq!(hassio.version_source, "Home Assistant Versions");
        assert_eq!(hassio.image, "qemux86");
        assert_eq!(hassio.name, "Supervisor");
        assert_eq!(hassio.board_slug(), Some("ova"));

        let pypi = convert_imported_configuration(&input(json!({"source": "pypi"}))).unwrap();
        assert_eq!(pypi.version_source, "Python Package Index (PyPI)");

        assert!(convert_imported_configuration(&input(json!({"source": "floppy"}))).is_err());
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(after_user(VersionSource::Pypi, false), None);
        assert_eq!(after_user(VersionSource::Local, true), None);
        assert_eq!(after_user(VersionSource::Haio, true), None);
        assert_eq!(
            after_user(VersionSource::Container, true),
            Some(VersionFlowState::VersionSource)
        );
        assert_eq!(VersionFlow::new().state(), VersionFlowState::User);
    }
}
