//! A request to run a registered service

use serde::{Deserialize, Serialize};

use crate::Context;

/// A call to a service such as `zone.reload`
///
/// The context carries the calling user, which admin-only services check
/// before the handler runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub service_data: serde_json::Value,
    pub context: Context,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            context,
        }
    }

    /// User that initiated the call; `None` for internal callers
    pub fn user_id(&self) -> Option<&str> {
        self.context.user_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reload_call() {
        let ctx = Context::new();
        let call = ServiceCall::new("zone", "reload", json!({}), ctx.clone());

        assert_eq!(call.domain, "zone");
        assert_eq!(call.service, "reload");
        assert_eq!(call.context.id, ctx.id);
        assert_eq!(call.user_id(), None);
    }

    #[test]
    fn test_user_id() {
        let call = ServiceCall::new("zone", "reload", json!({}), Context::with_user("abcd"));
        assert_eq!(call.user_id(), Some("abcd"));
    }
}
