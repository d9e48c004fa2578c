//! ISY994 config and options flows

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ha_config_entries::{
    ConfigEntry, ConfigFlow, DhcpServiceInfo, FieldType, FlowData, FlowError, FlowHandler,
    FlowInit, FlowResultOf, FlowScope, FlowStep, FlowStepResult, FormField, OptionsFlow,
    SsdpServiceInfo, ABORT_ALREADY_CONFIGURED, ATTR_UPNP_FRIENDLY_NAME, ATTR_UPNP_UDN,
};
use serde_json::Value;
use tracing::{debug, error, info};
use url::Url;

use super::connection::{IsyConnection, IsyConnector};
use super::{
    IsyError, IsyInfo, CONF_HOST, CONF_IGNORE_STRING, CONF_NAME, CONF_PASSWORD,
    CONF_RESTORE_LIGHT_STATE, CONF_SENSOR_STRING, CONF_TLS_VER, CONF_USERNAME,
    CONF_VAR_SENSOR_STRING, DEFAULT_IGNORE_STRING, DEFAULT_RESTORE_LIGHT_STATE,
    DEFAULT_SENSOR_STRING, DEFAULT_TLS_VERSION, DEFAULT_VAR_SENSOR_STRING, DOMAIN, HTTPS_PORT,
    HTTP_PORT, ISY_URL_POSTFIX, SCHEME_HTTPS, TLS_VERSIONS, UDN_UUID_PREFIX,
};

const STEP_USER: &str = "user";
const STEP_INIT: &str = "init";

/// Aborted when a discovery lacks the fields needed to identify the controller
pub const ABORT_NOT_ISY: &str = "not_isy994";

// ==================== Input helpers ====================

fn required_str(input: &FlowData, key: &str) -> FlowResultOf<String> {
    match input.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(FlowError::InvalidInput(format!(
            "{} must be a string, got {}",
            key, other
        ))),
        None => Err(FlowError::InvalidInput(format!("{} is required", key))),
    }
}

fn tls_version(input: &FlowData) -> FlowResultOf<f64> {
    let version = match input.get(CONF_TLS_VER) {
        None | Some(Value::Null) => return Ok(DEFAULT_TLS_VERSION),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        Some(_) => None,
    };
    version
        .filter(|v| TLS_VERSIONS.contains(v))
        .ok_or_else(|| FlowError::InvalidInput(format!("{} must be 1.1 or 1.2", CONF_TLS_VER)))
}

/// `aabbccddeeff` -> `aa:bb:cc:dd:ee:ff`
fn format_mac(mac: &str) -> String {
    let hex: Vec<char> = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if hex.len() != 12 {
        return mac.to_string();
    }
    hex.chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}

/// Whether the authority of `raw` spells out a port, default or not
fn has_explicit_port(raw: &str) -> bool {
    let authority = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let authority = authority
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host.rsplit_once(']').map_or(host, |(_, tail)| tail);
    host.contains(':')
}

/// Swap the host of `raw` for `ip`, keeping scheme, port, path and query
fn replace_host(raw: &str, url: &Url, ip: &str, port: Option<u16>) -> String {
    let current_port = if has_explicit_port(raw) {
        url.port_or_known_default()
    } else {
        url.port()
    };
    let netloc = match port.or(current_port) {
        Some(port) => format!("{}:{}", ip, port),
        None => ip.to_string(),
    };
    let mut rebuilt = format!("{}://{}", url.scheme(), netloc);
    if url.path() != "/" {
        rebuilt.push_str(url.path());
    }
    if let Some(query) = url.query() {
        rebuilt.push('?');
        rebuilt.push_str(query);
    }
    rebuilt
}

// ==================== Config flow ====================

/// Setup wizard for one controller
pub struct IsyFlow {
    connector: Arc<dyn IsyConnector>,
    discovered: HashMap<String, String>,
}

impl IsyFlow {
    pub fn new(connector: Arc<dyn IsyConnector>) -> Self {
        Self {
            connector,
            discovered: HashMap::new(),
        }
    }

    fn user_form(&self, errors: HashMap<String, String>) -> FlowStep {
        let host = self.discovered.get(CONF_HOST).cloned().unwrap_or_default();
        FlowStep::form(
            STEP_USER,
            vec![
                FormField::required(CONF_HOST, FieldType::String).with_default(host),
                FormField::required(CONF_USERNAME, FieldType::String),
                FormField::required(CONF_PASSWORD, FieldType::Password),
                FormField::optional(CONF_TLS_VER, FieldType::Select)
                    .with_default(DEFAULT_TLS_VERSION)
                    .with_options(TLS_VERSIONS.iter().map(|v| v.to_string())),
            ],
        )
        .with_errors(errors)
    }

    /// Probe the controller described by the form; returns its identity and
    /// the hostname it was reached at
    async fn validate_input(&self, input: &FlowData) -> FlowResultOf<Result<(IsyInfo, String), IsyError>> {
        let host = required_str(input, CONF_HOST)?;
        let username = required_str(input, CONF_USERNAME)?;
        let password = required_str(input, CONF_PASSWORD)?;
        let tls = tls_version(input)?;

        let connection = match IsyConnection::from_url(&host, username, password, Some(tls)) {
            Ok(connection) => connection,
            Err(e) => {
                error!("The isy994 host value in configuration is invalid");
                return Ok(Err(e));
            }
        };

        Ok(self
            .connector
            .connect(&connection)
            .await
            .map(|info| (info, connection.hostname)))
    }

    async fn step_user(&mut self, scope: &mut FlowScope, mut input: FlowData) -> FlowStepResult {
        match self.validate_input(&input).await? {
            Ok((info, hostname)) => {
                scope.set_unique_id(&info.uuid, false)?;
                scope.abort_if_unique_id_configured(None).await?;

                input
                    .entry(CONF_TLS_VER.to_string())
                    .or_insert_with(|| Value::from(DEFAULT_TLS_VERSION));
                info!("Adding ISY {} at {}", info.name, hostname);
                Ok(FlowStep::create_entry(
                    format!("{} ({})", info.name, hostname),
                    input,
                ))
            }
            Err(e) => {
                if let IsyError::Unknown(ref reason) = e {
                    error!("Unexpected exception: {}", reason);
                } else {
                    debug!("ISY validation failed: {}", e);
                }
                let errors = HashMap::from([("base".to_string(), e.error_key().to_string())]);
                Ok(self.user_form(errors))
            }
        }
    }

    /// Claim `unique_id`; if an entry already holds it, move that entry to
    /// `ip` when its host differs, then abort
    async fn set_unique_id_or_update(
        &self,
        scope: &mut FlowScope,
        unique_id: &str,
        ip: &str,
        port: Option<u16>,
    ) -> FlowResultOf<()> {
        let Some(existing) = scope.set_unique_id(unique_id, true)? else {
            return Ok(());
        };

        let current = existing
            .data
            .get(CONF_HOST)
            .and_then(Value::as_str)
            .and_then(|raw| Url::parse(raw).ok().map(|url| (raw, url)));

        match current {
            Some((raw, url)) if url.host_str() != Some(ip) => {
                let host = replace_host(raw, &url, ip, port);
                info!("ISY {} moved to {}", unique_id, host);
                let updates = FlowData::from([(CONF_HOST.to_string(), Value::from(host))]);
                scope.abort_if_unique_id_configured(Some(updates)).await
            }
            _ => Err(FlowError::abort(ABORT_ALREADY_CONFIGURED)),
        }
    }

    fn show_discovered(&mut self, scope: &mut FlowScope, name: String, host: String) -> FlowStep {
        self.discovered = HashMap::from([
            (CONF_NAME.to_string(), name),
            (CONF_HOST.to_string(), host),
        ]);
        scope.set_title_placeholders(self.discovered.clone());
        self.user_form(HashMap::new())
    }

    async fn step_dhcp(&mut self, scope: &mut FlowScope, info: DhcpServiceInfo) -> FlowStepResult {
        let isy_mac = format_mac(&info.macaddress);
        self.set_unique_id_or_update(scope, &isy_mac, &info.ip, None)
            .await?;

        let host = format!("http://{}", info.ip);
        Ok(self.show_discovered(scope, info.hostname, host))
    }

    async fn step_ssdp(&mut self, scope: &mut FlowScope, info: SsdpServiceInfo) -> FlowStepResult {
        let (Some(friendly_name), Some(udn), Some(location)) = (
            info.upnp_attr(ATTR_UPNP_FRIENDLY_NAME),
            info.upnp_attr(ATTR_UPNP_UDN),
            info.ssdp_location.as_deref(),
        ) else {
            return Err(FlowError::abort(ABORT_NOT_ISY));
        };

        let parsed = Url::parse(location).map_err(|_| FlowError::abort(ABORT_NOT_ISY))?;
        let hostname = parsed.host_str().unwrap_or_default();
        let mac = udn.strip_prefix(UDN_UUID_PREFIX).unwrap_or(udn);
        let url = location.strip_suffix(ISY_URL_POSTFIX).unwrap_or(location);

        let port = match parsed.port() {
            Some(port) => port,
            None if parsed.scheme() == SCHEME_HTTPS => HTTPS_PORT,
            None => HTTP_PORT,
        };

        self.set_unique_id_or_update(scope, mac, hostname, Some(port))
            .await?;

        Ok(self.show_discovered(scope, friendly_name.to_string(), url.to_string()))
    }
}

#[async_trait]
impl ConfigFlow for IsyFlow {
    async fn start(&mut self, scope: &mut FlowScope, init: FlowInit) -> FlowStepResult {
        match init {
            FlowInit::User => Ok(self.user_form(HashMap::new())),
            FlowInit::Import(config) => self.step_user(scope, config).await,
            FlowInit::Dhcp(info) => self.step_dhcp(scope, info).await,
            FlowInit::Ssdp(info) => self.step_ssdp(scope, info).await,
        }
    }

    async fn step(&mut self, scope: &mut FlowScope, user_input: FlowData) -> FlowStepResult {
        self.step_user(scope, user_input).await
    }
}

// ==================== Options flow ====================

/// Edits the node naming and light restore options of an entry
pub struct IsyOptionsFlow;

impl IsyOptionsFlow {
    /// Current options with defaults for the unset ones
    fn current(entry: &ConfigEntry) -> FlowData {
        let option = |key: &str, default: Value| {
            (
                key.to_string(),
                entry.options.get(key).cloned().unwrap_or(default),
            )
        };
        FlowData::from([
            option(CONF_IGNORE_STRING, Value::from(DEFAULT_IGNORE_STRING)),
            option(CONF_SENSOR_STRING, Value::from(DEFAULT_SENSOR_STRING)),
            option(CONF_VAR_SENSOR_STRING, Value::from(DEFAULT_VAR_SENSOR_STRING)),
            option(CONF_RESTORE_LIGHT_STATE, Value::from(DEFAULT_RESTORE_LIGHT_STATE)),
        ])
    }
}

#[async_trait]
impl OptionsFlow for IsyOptionsFlow {
    async fn init(&mut self, entry: &ConfigEntry) -> FlowStepResult {
        let current = Self::current(entry);
        let default = |key: &str| current.get(key).cloned().unwrap_or(Value::Null);

        Ok(FlowStep::form(
            STEP_INIT,
            vec![
                FormField::optional(CONF_IGNORE_STRING, FieldType::String)
                    .with_default(default(CONF_IGNORE_STRING)),
                FormField::optional(CONF_SENSOR_STRING, FieldType::String)
                    .with_default(default(CONF_SENSOR_STRING)),
                FormField::optional(CONF_VAR_SENSOR_STRING, FieldType::String)
                    .with_default(default(CONF_VAR_SENSOR_STRING)),
                FormField::required(CONF_RESTORE_LIGHT_STATE, FieldType::Boolean)
                    .with_default(default(CONF_RESTORE_LIGHT_STATE)),
            ],
        ))
    }

    async fn step(&mut self, entry: &ConfigEntry, user_input: FlowData) -> FlowStepResult {
        let mut options = Self::current(entry);
        for (key, value) in user_input {
            let valid = match key.as_str() {
                CONF_RESTORE_LIGHT_STATE => value.is_boolean(),
                CONF_IGNORE_STRING | CONF_SENSOR_STRING | CONF_VAR_SENSOR_STRING => {
                    value.is_string()
                }
                _ => false,
            };
            if !valid {
                return Err(FlowError::InvalidInput(format!("invalid option {}", key)));
            }
            options.insert(key, value);
        }
        Ok(FlowStep::create_entry("", options))
    }
}

/// Builds ISY994 flows around a shared connector
pub struct IsyFlowHandler {
    connector: Arc<dyn IsyConnector>,
}

impl IsyFlowHandler {
    pub fn new(connector: Arc<dyn IsyConnector>) -> Self {
        Self { connector }
    }
}

impl FlowHandler for IsyFlowHandler {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn create_flow(&self) -> Box<dyn ConfigFlow> {
        Box::new(IsyFlow::new(self.connector.clone()))
    }

    fn create_options_flow(&self, _entry: &ConfigEntry) -> Option<Box<dyn OptionsFlow>> {
        Some(Box::new(IsyOptionsFlow))
    }
}
