//! Universal Devices ISY994 integration
//!
//! Setup wizard for ISY controllers entered by hand, imported from YAML or
//! discovered over DHCP/SSDP. The controller is probed through an
//! [`IsyConnector`] before an entry is created.

pub mod config_flow;
pub mod connection;

use thiserror::Error;

pub use config_flow::{IsyFlow, IsyFlowHandler, IsyOptionsFlow};
pub use connection::{parse_configuration, HttpIsyConnector, IsyConnection, IsyConnector};

pub const DOMAIN: &str = "isy994";

pub const CONF_HOST: &str = "host";
pub const CONF_NAME: &str = "name";
pub const CONF_USERNAME: &str = "username";
pub const CONF_PASSWORD: &str = "password";
pub const CONF_TLS_VER: &str = "tls";

pub const CONF_IGNORE_STRING: &str = "ignore_string";
pub const CONF_SENSOR_STRING: &str = "sensor_string";
pub const CONF_VAR_SENSOR_STRING: &str = "variable_sensor_string";
pub const CONF_RESTORE_LIGHT_STATE: &str = "restore_light_state";

pub const DEFAULT_IGNORE_STRING: &str = "{IGNORE ME}";
pub const DEFAULT_SENSOR_STRING: &str = "sensor";
pub const DEFAULT_VAR_SENSOR_STRING: &str = "HA.";
pub const DEFAULT_RESTORE_LIGHT_STATE: bool = false;

pub const DEFAULT_TLS_VERSION: f64 = 1.1;
pub const TLS_VERSIONS: [f64; 2] = [1.1, 1.2];

pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;

pub const SCHEME_HTTP: &str = "http";
pub const SCHEME_HTTPS: &str = "https";

/// Suffix of the SSDP description URL
pub const ISY_URL_POSTFIX: &str = "/desc";
pub const UDN_UUID_PREFIX: &str = "uuid:";

/// Seconds allowed for the connection probe
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors raised while probing a controller
#[derive(Debug, Error)]
pub enum IsyError {
    #[error("invalid authentication")]
    InvalidAuth,

    #[error("cannot connect: {0}")]
    CannotConnect(String),

    #[error("invalid host")]
    InvalidHost,

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl IsyError {
    /// Form error key shown to the user
    pub fn error_key(&self) -> &'static str {
        match self {
            IsyError::InvalidAuth => "invalid_auth",
            IsyError::CannotConnect(_) => "cannot_connect",
            IsyError::InvalidHost => "invalid_host",
            IsyError::Unknown(_) => "unknown",
        }
    }
}

pub type IsyResult<T> = Result<T, IsyError>;

/// Identity reported by a controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsyInfo {
    pub name: String,
    pub uuid: String,
}
