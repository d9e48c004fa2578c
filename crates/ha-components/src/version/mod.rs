//! Version integration
//!
//! Only the setup wizard lives here: it records which version source (local
//! install, PyPI, the supervisor version file, Docker Hub or the website) an
//! entry should follow, and on which channel.

pub mod config_flow;

use serde::{Deserialize, Serialize};

pub use config_flow::{VersionFlow, VersionFlowHandler, VersionFlowState};

pub const DOMAIN: &str = "version";

pub const CONF_BETA: &str = "beta";
pub const CONF_BOARD: &str = "board";
pub const CONF_CHANNEL: &str = "channel";
pub const CONF_IMAGE: &str = "image";
pub const CONF_NAME: &str = "name";
pub const CONF_SOURCE: &str = "source";
pub const CONF_VERSION_SOURCE: &str = "version_source";

pub const ATTR_VERSION_SOURCE: &str = CONF_VERSION_SOURCE;

pub const STEP_USER: &str = "user";
pub const STEP_VERSION_SOURCE: &str = "version_source";

pub const DEFAULT_BOARD: &str = "OVA";
pub const DEFAULT_CHANNEL: &str = "stable";
pub const DEFAULT_IMAGE: &str = "default";
pub const DEFAULT_NAME: &str = "";
pub const DEFAULT_NAME_CURRENT: &str = "Current Version";
pub const DEFAULT_NAME_LATEST: &str = "Latest Version";

/// Legacy YAML source names
pub const SOURCE_DOCKER: &str = "docker";
pub const SOURCE_HASSIO: &str = "hassio";

pub const POSTFIX_CONTAINER_NAME: &str = "-homeassistant";

/// Board display names and their image slugs
pub const BOARD_MAP: &[(&str, &str)] = &[
    ("OVA", "ova"),
    ("RaspberryPi 2", "rpi2"),
    ("RaspberryPi 3", "rpi3"),
    ("RaspberryPi 3 64bit", "rpi3-64"),
    ("RaspberryPi 4", "rpi4"),
    ("RaspberryPi 4 64bit", "rpi4-64"),
    ("ASUS Tinkerboard", "tinker"),
    ("ODROID C2", "odroid-c2"),
    ("ODROID C4", "odroid-c4"),
    ("ODROID N2", "odroid-n2"),
    ("ODROID XU4", "odroid-xu4"),
    ("Generic AArch64", "generic-aarch64"),
    ("Generic x86-64", "generic-x86-64"),
    ("Intel NUC", "intel-nuc"),
    ("Khadas VIM3", "khadas-vim3"),
];

/// Machine images published by the supervisor
pub const VALID_IMAGES: &[&str] = &[
    "default",
    "generic-x86-64",
    "intel-nuc",
    "odroid-c2",
    "odroid-n2",
    "odroid-xu",
    "qemuarm",
    "qemuarm-64",
    "qemux86",
    "qemux86-64",
    "raspberrypi",
    "raspberrypi2",
    "raspberrypi3",
    "raspberrypi3-64",
    "raspberrypi4",
    "raspberrypi4-64",
    "tinker",
    "khadas-vim3",
];

/// Image slug of a board display name
pub fn board_slug(board: &str) -> Option<&'static str> {
    BOARD_MAP
        .iter()
        .find(|(name, _)| *name == board)
        .map(|(_, slug)| *slug)
}

pub fn valid_boards() -> Vec<&'static str> {
    BOARD_MAP.iter().map(|(name, _)| *name).collect()
}

/// Docker Hub repositories: `<image>-homeassistant`, except `default`
pub fn valid_container_images() -> Vec<String> {
    VALID_IMAGES
        .iter()
        .map(|image| container_image(image))
        .collect()
}

fn container_image(image: &str) -> String {
    if image == DEFAULT_IMAGE {
        image.to_string()
    } else {
        format!("{}{}", image, POSTFIX_CONTAINER_NAME)
    }
}

/// Where versions are looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSource {
    Local,
    Pypi,
    Supervisor,
    Container,
    Haio,
}

impl VersionSource {
    /// Display order of the user step
    pub const ALL: [VersionSource; 5] = [
        VersionSource::Local,
        VersionSource::Supervisor,
        VersionSource::Haio,
        VersionSource::Container,
        VersionSource::Pypi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionSource::Local => "local",
            VersionSource::Pypi => "pypi",
            VersionSource::Supervisor => "supervisor",
            VersionSource::Container => "container",
            VersionSource::Haio => "haio",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VersionSource::Local => "Local installation",
            VersionSource::Pypi => "Python Package Index (PyPI)",
            VersionSource::Supervisor => "Home Assistant Versions",
            VersionSource::Container => "Docker Hub",
            VersionSource::Haio => "Home Assistant Website",
        }
    }

    pub fn parse(source: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == source)
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.display_name() == name)
    }
}

/// Release channel followed by an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stable,
    Beta,
    Dev,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Stable, Channel::Beta, Channel::Dev];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stable => "stable",
            Channel::Beta => "beta",
            Channel::Dev => "dev",
        }
    }

    /// Form label, e.g. `Beta`
    pub fn title(&self) -> &'static str {
        match self {
            Channel::Stable => "Stable",
            Channel::Beta => "Beta",
            Channel::Dev => "Dev",
        }
    }

    /// Accepts both the stored and the form spelling
    pub fn parse(channel: &str) -> Option<Self> {
        let lower = channel.to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_names_round_trip() {
        for source in VersionSource::ALL {
            assert_eq!(VersionSource::parse(source.as_str()), Some(source));
            assert_eq!(VersionSource::from_display_name(source.display_name()), Some(source));
        }
        assert_eq!(VersionSource::parse("hassio"), None);
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!(Channel::parse("Beta"), Some(Channel::Beta));
        assert_eq!(Channel::parse("dev"), Some(Channel::Dev));
        assert_eq!(Channel::parse("nightly"), None);
    }

    #[test]
    fn test_boards_and_images() {
        assert_eq!(board_slug("RaspberryPi 4"), Some("rpi4"));
        assert_eq!(board_slug("OVA"), Some("ova"));
        assert_eq!(board_slug("Commodore 64"), None);
        assert_eq!(valid_boards().len(), BOARD_MAP.len());

        let images = valid_container_images();
        assert_eq!(images[0], "default");
        assert!(images.contains(&"qemux86-64-homeassistant".to_string()));
    }
}
