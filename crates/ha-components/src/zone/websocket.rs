//! `zone/*` websocket commands

use std::sync::Arc;

use ha_api::{CommandError, CommandRegistry, CommandRequest};
use serde::Deserialize;
use serde_json::Value;

use super::collection::ZoneManager;
use super::model::{ZoneCreate, ZoneUpdate};
use super::ZoneError;

#[derive(Debug, Deserialize)]
struct UpdateZone {
    zone_id: String,
    #[serde(flatten)]
    update: ZoneUpdate,
}

#[derive(Debug, Deserialize)]
struct DeleteZone {
    zone_id: String,
}

impl From<ZoneError> for CommandError {
    fn from(err: ZoneError) -> Self {
        match err {
            ZoneError::NotFound(_) | ZoneError::NotEditable(_) => {
                CommandError::NotFound(err.to_string())
            }
            ZoneError::InvalidInput(_) | ZoneError::Config(_) => {
                CommandError::InvalidFormat(err.to_string())
            }
            ZoneError::Persistence(_) => CommandError::HomeAssistant(err.to_string()),
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Unknown(e.to_string()))
}

/// Register `zone/list`, `zone/create`, `zone/update` and `zone/delete`
pub fn register_commands(registry: &CommandRegistry, zones: Arc<ZoneManager>) {
    let manager = zones.clone();
    registry.register("zone/list", move |_: CommandRequest| {
        let manager = manager.clone();
        async move { to_value(&manager.storage_items()) }
    });

    let manager = zones.clone();
    registry.register_admin("zone/create", move |request: CommandRequest| {
        let manager = manager.clone();
        async move {
            let data: ZoneCreate = request.parse()?;
            let item = manager.create(data, request.context).await?;
            to_value(&item)
        }
    });

    let manager = zones.clone();
    registry.register_admin("zone/update", move |request: CommandRequest| {
        let manager = manager.clone();
        async move {
            let msg: UpdateZone = request.parse()?;
            let item = manager
                .update(&msg.zone_id, msg.update, request.context)
                .await?;
            to_value(&item)
        }
    });

    let manager = zones;
    registry.register_admin("zone/delete", move |request: CommandRequest| {
        let manager = manager.clone();
        async move {
            let msg: DeleteZone = request.parse()?;
            manager.delete(&msg.zone_id, request.context).await?;
            Ok(Value::Null)
        }
    });
}
