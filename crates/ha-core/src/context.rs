//! Context type for tracking request origin and causality

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Context for tracking the origin and causality of events and service calls
///
/// Every state write, event and service call carries a Context that identifies
/// who initiated the action. Permission checks (admin-only services and
/// commands) look at `user_id`; a context without a user is a system action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier for this context (ULID)
    pub id: String,

    /// User ID that initiated this action (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Parent context ID for tracking causality chains
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// Create a new system context with a fresh ULID
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: None,
            parent_id: None,
        }
    }

    /// Create a new context with a specific user
    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: Some(user_id.into()),
            parent_id: None,
        }
    }

    /// Create a child context with this context as parent
    ///
    /// Occupancy republishing uses this so a zone's state change can be traced
    /// back to the tracked entity move that caused it.
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: self.user_id.clone(),
            parent_id: Some(self.id.clone()),
        }
    }

    /// True when no user initiated this action
    pub fn is_system(&self) -> bool {
        self.user_id.is_none()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_keeps_user_and_links_parent() {
        let parent = Context::with_user("admin");
        let child = parent.child();

        assert_ne!(child.id, parent.id);
        assert_eq!(child.user_id.as_deref(), Some("admin"));
        assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
    }

    #[test]
    fn test_system_context() {
        assert!(Context::new().is_system());
        assert!(!Context::with_user("someone").is_system());
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let json = serde_json::to_value(Context::new()).unwrap();
        assert!(json.get("user_id").is_none());
        assert!(json.get("parent_id").is_none());
    }
}
