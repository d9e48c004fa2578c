//! Connection probe for ISY controllers

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use tracing::{debug, instrument};
use url::Url;

use super::{
    IsyError, IsyInfo, IsyResult, CONNECT_TIMEOUT_SECS, HTTPS_PORT, HTTP_PORT, SCHEME_HTTP,
    SCHEME_HTTPS,
};

/// Where and how to reach a controller
#[derive(Debug, Clone, PartialEq)]
pub struct IsyConnection {
    pub hostname: String,
    pub port: u16,
    pub use_https: bool,
    /// Path prefix of the REST API, without trailing slash
    pub webroot: String,
    pub username: String,
    pub password: String,
    pub tls_version: Option<f64>,
}

impl IsyConnection {
    /// Build a connection from the `host` URL entered in the form
    ///
    /// Only `http` and `https` URLs are accepted; the port defaults to the
    /// scheme's standard port.
    pub fn from_url(
        host: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        tls_version: Option<f64>,
    ) -> IsyResult<Self> {
        let url = Url::parse(host).map_err(|_| IsyError::InvalidHost)?;
        let (use_https, default_port) = match url.scheme() {
            SCHEME_HTTP => (false, HTTP_PORT),
            SCHEME_HTTPS => (true, HTTPS_PORT),
            _ => return Err(IsyError::InvalidHost),
        };
        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(IsyError::InvalidHost)?;

        Ok(Self {
            hostname: hostname.to_string(),
            port: url.port().unwrap_or(default_port),
            use_https,
            webroot: url.path().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            tls_version,
        })
    }

    /// URL of the controller configuration document
    pub fn config_url(&self) -> String {
        let scheme = if self.use_https { SCHEME_HTTPS } else { SCHEME_HTTP };
        format!(
            "{}://{}:{}{}/rest/config",
            scheme, self.hostname, self.port, self.webroot
        )
    }
}

/// Probes a controller and reports its identity
#[async_trait]
pub trait IsyConnector: Send + Sync {
    async fn connect(&self, connection: &IsyConnection) -> IsyResult<IsyInfo>;
}

/// Probe over the controller's REST API
pub struct HttpIsyConnector {
    timeout: Duration,
}

impl Default for HttpIsyConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpIsyConnector {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self, connection: &IsyConnection) -> IsyResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if connection.use_https && connection.tls_version.is_some_and(|v| v >= 1.2) {
            builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);
        }
        builder
            .build()
            .map_err(|e| IsyError::Unknown(e.to_string()))
    }
}

#[async_trait]
impl IsyConnector for HttpIsyConnector {
    #[instrument(skip(self, connection), fields(host = %connection.hostname))]
    async fn connect(&self, connection: &IsyConnection) -> IsyResult<IsyInfo> {
        let client = self.client(connection)?;
        let url = connection.config_url();
        debug!("Probing ISY at {}", url);

        let response = client
            .get(&url)
            .basic_auth(&connection.username, Some(&connection.password))
            .send()
            .await
            .map_err(|e| IsyError::CannotConnect(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(IsyError::InvalidAuth),
            status if !status.is_success() => {
                return Err(IsyError::CannotConnect(format!("HTTP {}", status)))
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| IsyError::CannotConnect(e.to_string()))?;
        parse_configuration(&body)
    }
}

// ==================== Configuration document ====================

struct ConfigPatterns {
    root: Regex,
    name: Regex,
    id: Regex,
}

static CONFIG_PATTERNS: OnceLock<Result<ConfigPatterns, regex::Error>> = OnceLock::new();

fn config_patterns() -> IsyResult<&'static ConfigPatterns> {
    CONFIG_PATTERNS
        .get_or_init(|| {
            Ok(ConfigPatterns {
                root: Regex::new(r"(?s)<root>(.*?)</root>")?,
                name: Regex::new(r"(?s)<name>(.*?)</name>")?,
                id: Regex::new(r"(?s)<id>(.*?)</id>")?,
            })
        })
        .as_ref()
        .map_err(|e| IsyError::Unknown(e.to_string()))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Extract name and uuid from a `/rest/config` document
///
/// Both live under `<configuration><root>`; a document without a name is
/// treated as an unreachable controller.
pub fn parse_configuration(xml: &str) -> IsyResult<IsyInfo> {
    let patterns = config_patterns()?;
    let root = capture(&patterns.root, xml)
        .ok_or_else(|| IsyError::CannotConnect("configuration has no root".into()))?;

    let name = capture(&patterns.name, &root).unwrap_or_default();
    if name.is_empty() {
        return Err(IsyError::CannotConnect("controller reported no name".into()));
    }
    let uuid = capture(&patterns.id, &root)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| IsyError::CannotConnect("controller reported no id".into()))?;

    Ok(IsyInfo { name, uuid })
}
