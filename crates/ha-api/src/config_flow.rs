//! Config flow commands
//!
//! Exposes the [`FlowManager`] over the websocket API:
//!
//! - `config_entries/flow` starts a user flow for a handler
//! - `config_entries/flow/progress` feeds user input to a flow
//! - `config_entries/flow/list` lists flows in progress
//! - `config_entries/options/flow` and `config_entries/options/flow/progress`
//!   do the same for options flows

use std::sync::Arc;

use ha_config_entries::{
    ConfigEntriesError, ConfigEntrySource, FlowContext, FlowData, FlowError, FlowInit,
    FlowManager,
};
use serde::Deserialize;
use serde_json::Value;

use crate::commands::{CommandError, CommandRegistry, CommandRequest};

#[derive(Debug, Deserialize)]
struct StartFlow {
    handler: String,
    #[serde(default)]
    show_advanced_options: bool,
}

#[derive(Debug, Deserialize)]
struct ProgressFlow {
    flow_id: String,
    #[serde(default)]
    user_input: FlowData,
}

#[derive(Debug, Deserialize)]
struct StartOptionsFlow {
    entry_id: String,
}

impl From<FlowError> for CommandError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::UnknownFlow(_)
            | FlowError::UnknownHandler(_)
            | FlowError::Entries(ConfigEntriesError::NotFound(_)) => {
                CommandError::NotFound(err.to_string())
            }
            FlowError::InvalidInput(_) | FlowError::UnknownStep(_) => {
                CommandError::InvalidFormat(err.to_string())
            }
            FlowError::OptionsNotSupported(_) | FlowError::Abort(_) => {
                CommandError::HomeAssistant(err.to_string())
            }
            FlowError::Entries(_) => CommandError::Unknown(err.to_string()),
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Unknown(e.to_string()))
}

/// Register the config flow commands
pub fn register_commands(registry: &CommandRegistry, flows: Arc<FlowManager>) {
    let manager = flows.clone();
    registry.register_admin("config_entries/flow", move |request: CommandRequest| {
        let manager = manager.clone();
        async move {
            let msg: StartFlow = request.parse()?;
            let context = FlowContext::new(ConfigEntrySource::User)
                .with_advanced_options(msg.show_advanced_options);
            let result = manager.init(&msg.handler, context, FlowInit::User).await?;
            to_value(&result)
        }
    });

    let manager = flows.clone();
    registry.register_admin("config_entries/flow/progress", move |request: CommandRequest| {
        let manager = manager.clone();
        async move {
            let msg: ProgressFlow = request.parse()?;
            let result = manager.configure(&msg.flow_id, msg.user_input).await?;
            to_value(&result)
        }
    });

    let manager = flows.clone();
    registry.register_admin("config_entries/flow/list", move |_: CommandRequest| {
        let manager = manager.clone();
        async move { to_value(&manager.progress()) }
    });

    let manager = flows.clone();
    registry.register_admin("config_entries/options/flow", move |request: CommandRequest| {
        let manager = manager.clone();
        async move {
            let msg: StartOptionsFlow = request.parse()?;
            let result = manager.init_options(&msg.entry_id).await?;
            to_value(&result)
        }
    });

    let manager = flows;
    registry.register_admin(
        "config_entries/options/flow/progress",
        move |request: CommandRequest| {
            let manager = manager.clone();
            async move {
                let msg: ProgressFlow = request.parse()?;
                let result = manager.configure_options(&msg.flow_id, msg.user_input).await?;
                to_value(&result)
            }
        },
    );
}
