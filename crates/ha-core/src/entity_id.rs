//! `domain.object_id` identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id must contain exactly one '.' separator")]
    InvalidFormat,

    #[error("domain cannot be empty")]
    EmptyDomain,

    #[error("object_id cannot be empty")]
    EmptyObjectId,

    #[error("invalid domain: use lowercase letters, digits and single underscores")]
    InvalidDomainChars,

    #[error("invalid object_id: use lowercase letters, digits and underscores")]
    InvalidObjectIdChars,
}

/// An entity id such as `zone.home` or `person.paulus`
///
/// Serialized as the dotted string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

/// Lowercase letters, digits and `_`, not starting or ending with `_`
fn is_identifier(s: &str) -> bool {
    !s.starts_with('_')
        && !s.ends_with('_')
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl EntityId {
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();

        if domain.is_empty() {
            return Err(EntityIdError::EmptyDomain);
        }
        if object_id.is_empty() {
            return Err(EntityIdError::EmptyObjectId);
        }
        // Domains additionally forbid `__`
        if domain.contains("__") || !is_identifier(&domain) {
            return Err(EntityIdError::InvalidDomainChars);
        }
        if !is_identifier(&object_id) {
            return Err(EntityIdError::InvalidObjectIdChars);
        }

        Ok(Self { domain, object_id })
    }

    /// Entity id whose object_id is the slug of a display name
    pub fn from_name(domain: impl Into<String>, name: &str) -> Result<Self, EntityIdError> {
        Self::new(domain, crate::slugify(name))
    }

    /// Entity id for a display name, suffixed `_2`, `_3`, ... until `taken`
    /// returns false for the full id
    pub fn generate(
        domain: &str,
        name: &str,
        taken: impl Fn(&str) -> bool,
    ) -> Result<Self, EntityIdError> {
        let base = crate::slugify(name);
        let mut object_id = base.clone();
        let mut suffix = 1;
        while taken(&format!("{}.{}", domain, object_id)) {
            suffix += 1;
            object_id = format!("{}_{}", base, suffix);
        }
        Self::new(domain, object_id)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => Self::new(domain, object_id),
            _ => Err(EntityIdError::InvalidFormat),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_entity_id() {
        let id = EntityId::new("zone", "home").unwrap();
        assert_eq!(id.domain(), "zone");
        assert_eq!(id.object_id(), "home");
        assert_eq!(id.to_string(), "zone.home");
    }

    #[test]
    fn test_parse_entity_id() {
        let id: EntityId = "person.paulus".parse().unwrap();
        assert_eq!(id.domain(), "person");
        assert_eq!(id.object_id(), "paulus");
    }

    #[test]
    fn test_invalid_format() {
        assert_eq!(
            "no_separator".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
        assert_eq!(
            "zone.too.many".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidFormat
        );
    }

    #[test]
    fn test_empty_parts() {
        assert_eq!(
            ".home".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyDomain
        );
        assert_eq!(
            "zone.".parse::<EntityId>().unwrap_err(),
            EntityIdError::EmptyObjectId
        );
    }

    #[test]
    fn test_invalid_chars() {
        assert_eq!(
            "ZONE.home".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidDomainChars
        );
        assert_eq!(
            "zone.Test Zone".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidObjectIdChars
        );
    }

    #[test]
    fn test_underscore_rules() {
        assert_eq!(
            "_zone.home".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidDomainChars
        );
        assert_eq!(
            "zone._home".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidObjectIdChars
        );
        assert_eq!(
            "my__zone.home".parse::<EntityId>().unwrap_err(),
            EntityIdError::InvalidDomainChars
        );
        assert!("zone.my__office".parse::<EntityId>().is_ok());
    }

    #[test]
    fn test_from_name() {
        let id = EntityId::from_name("zone", "Test Zone").unwrap();
        assert_eq!(id.to_string(), "zone.test_zone");
    }

    #[test]
    fn test_generate_with_collisions() {
        let taken = ["zone.test_zone", "zone.test_zone_2"];
        let id = EntityId::generate("zone", "Test Zone", |candidate| taken.contains(&candidate))
            .unwrap();
        assert_eq!(id.to_string(), "zone.test_zone_3");

        let free = EntityId::generate("zone", "Office", |_| false).unwrap();
        assert_eq!(free.to_string(), "zone.office");
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = EntityId::new("zone", "office").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"zone.office\"");

        let parsed: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
