//! Event types for the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

/// Payload type bound to a single event type
pub trait EventData: Clone + Send + Sync + 'static {
    fn event_type() -> &'static str;
}

/// Name of an event type; `*` matches every event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn match_all() -> Self {
        Self("*".to_string())
    }

    pub fn is_match_all(&self) -> bool {
        self.0 == "*"
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event fired on the bus
///
/// Untyped events carry their payload as JSON; typed listeners decode it with
/// [`Event::to_typed`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub time_fired: DateTime<Utc>,
    /// Who caused the event
    pub context: Context,
}

impl<T> Event<T> {
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            time_fired: Utc::now(),
            context,
        }
    }
}

impl Event<serde_json::Value> {
    /// Decode the JSON payload into a typed event
    ///
    /// Returns `None` when the event type does not match `T` or the payload
    /// does not deserialize.
    pub fn to_typed<T>(&self) -> Option<Event<T>>
    where
        T: EventData + serde::de::DeserializeOwned,
    {
        if self.event_type.as_str() != T::event_type() {
            return None;
        }
        let data = serde_json::from_value(self.data.clone()).ok()?;
        Some(Event {
            event_type: self.event_type.clone(),
            data,
            time_fired: self.time_fired,
            context: self.context.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CoreConfigUpdatedData, StateChangedData, CORE_CONFIG_UPDATE};
    use serde_json::json;

    #[test]
    fn test_match_all() {
        assert!(EventType::match_all().is_match_all());
        assert!(!EventType::from("state_changed").is_match_all());
    }

    #[test]
    fn test_to_typed() {
        let event = Event::new(
            CORE_CONFIG_UPDATE,
            json!({"changed": ["latitude"]}),
            Context::new(),
        );
        let typed = event.to_typed::<CoreConfigUpdatedData>().unwrap();
        assert_eq!(typed.data.changed, vec!["latitude".to_string()]);
        assert_eq!(typed.context, event.context);
    }

    #[test]
    fn test_to_typed_wrong_type() {
        let event = Event::new(CORE_CONFIG_UPDATE, json!({}), Context::new());
        assert!(event.to_typed::<StateChangedData>().is_none());
    }
}
