//! `zone/*` websocket commands

mod common;

use common::{MemoryStore, TestHomeAssistant};
use ha_components::zone::{ZoneCreate, ZoneItem, ZoneUpdate};
use ha_core::Context;
use serde_json::json;

fn stored_item() -> ZoneItem {
    ZoneItem {
        id: "from_storage".into(),
        name: "from storage".into(),
        latitude: 1.0,
        longitude: 2.0,
        radius: 3.0,
        passive: false,
        icon: Some("mdi:from-storage".into()),
    }
}

async fn storage_setup() -> TestHomeAssistant {
    let hass = TestHomeAssistant::with_store(MemoryStore::with_items(vec![stored_item()]));
    hass.setup_zones("zone:\n  name: yaml option\n  latitude: 3\n  longitude: 4\n")
        .await;
    hass
}

#[tokio::test]
async fn test_ws_list() {
    let hass = storage_setup().await;
    let conn = hass.user_connection();

    let msg = hass.send(&conn, 5, "zone/list", json!({})).await;
    assert!(msg.success);
    assert_eq!(
        msg.result.unwrap(),
        json!([{
            "id": "from_storage",
            "name": "from storage",
            "latitude": 1.0,
            "longitude": 2.0,
            "radius": 3.0,
            "passive": false,
            "icon": "mdi:from-storage"
        }])
    );
}

#[tokio::test]
async fn test_ws_create() {
    let hass = storage_setup().await;
    let conn = hass.admin_connection();

    let msg = hass
        .send(
            &conn,
            6,
            "zone/create",
            json!({"name": "New Zone", "latitude": 3, "longitude": 4, "passive": true}),
        )
        .await;
    assert!(msg.success, "{:?}", msg.error);
    let result = msg.result.unwrap();
    assert_eq!(result["id"], json!("new_zone"));
    assert_eq!(result["radius"], json!(100.0));

    let state = hass.get_state("zone.new_zone").unwrap();
    assert_eq!(state.state, "0");
    assert_eq!(state.attributes["passive"], json!(true));
    assert_eq!(state.attributes["editable"], json!(true));
    assert_eq!(hass.store.items().len(), 2);
    assert!(hass.entity_registry.get("zone.new_zone").is_some());
}

#[tokio::test]
async fn test_ws_create_requires_admin() {
    let hass = storage_setup().await;
    let conn = hass.user_connection();

    let msg = hass
        .send(&conn, 1, "zone/create", json!({"name": "Nope", "latitude": 3, "longitude": 4}))
        .await;
    assert!(!msg.success);
    assert_eq!(msg.error.unwrap().code, "unauthorized");
    hass.assert_missing("zone.nope");
}

#[tokio::test]
async fn test_ws_create_rejects_invalid_zone() {
    let hass = storage_setup().await;
    let conn = hass.admin_connection();

    let msg = hass
        .send(&conn, 1, "zone/create", json!({"name": "Bad", "latitude": 91, "longitude": 4}))
        .await;
    assert!(!msg.success);
    assert_eq!(msg.error.unwrap().code, "invalid_format");

    let msg = hass
        .send(&conn, 2, "zone/create", json!({"name": "Bad", "latitude": 1, "longitude": 4, "radius": -1}))
        .await;
    assert_eq!(msg.error.unwrap().code, "invalid_format");
    hass.assert_missing("zone.bad");
    assert_eq!(hass.store.save_count(), 0);
}

#[tokio::test]
async fn test_ws_create_rejects_placeholder_state_ids() {
    let hass = storage_setup().await;
    let conn = hass.admin_connection();

    for (id, name) in [(1, "Unknown"), (2, "Unavailable"), (3, "🌴🌴")] {
        let msg = hass
            .send(&conn, id, "zone/create", json!({"name": name, "latitude": 3, "longitude": 4}))
            .await;
        assert_eq!(msg.error.unwrap().code, "invalid_format", "{}", name);
    }
    hass.assert_missing("zone.unknown");
    hass.assert_missing("zone.unavailable");
    assert_eq!(hass.store.save_count(), 0);
}

#[tokio::test]
async fn test_create_suffixes_taken_ids() {
    let hass = storage_setup().await;

    let first = hass
        .zones
        .create(ZoneCreate::new("yaml option", 5.0, 6.0), Context::new())
        .await
        .unwrap();
    assert_eq!(first.id, "yaml_option_2");

    let second = hass
        .zones
        .create(ZoneCreate::new("New Input", 5.0, 6.0), Context::new())
        .await
        .unwrap();
    assert_eq!(second.id, "new_input");
    hass.assert_state("zone.new_input", "0");
}

#[tokio::test]
async fn test_create_does_not_count_existing_entities() {
    let hass = storage_setup().await;
    hass.set_state("person.person1", "late_zone");

    hass.zones
        .create(ZoneCreate::new("Late Zone", 5.0, 6.0), Context::new())
        .await
        .unwrap();
    hass.assert_state("zone.late_zone", "0");

    hass.set_state("person.person2", "late_zone");
    hass.assert_state("zone.late_zone", "1");
}

#[tokio::test]
async fn test_ws_update() {
    let hass = storage_setup().await;
    let conn = hass.admin_connection();

    let msg = hass
        .send(
            &conn,
            6,
            "zone/update",
            json!({
                "zone_id": "from_storage",
                "latitude": 3,
                "longitude": 4,
                "passive": true
            }),
        )
        .await;
    assert!(msg.success, "{:?}", msg.error);
    let result = msg.result.unwrap();
    assert_eq!(result["id"], json!("from_storage"));
    assert_eq!(result["name"], json!("from storage"));
    assert_eq!(result["latitude"], json!(3.0));
    assert_eq!(result["passive"], json!(true));
    assert_eq!(result["icon"], json!("mdi:from-storage"));

    let state = hass.get_state("zone.from_storage").unwrap();
    assert_eq!(state.attributes["latitude"], json!(3.0));
    assert_eq!(state.attributes["longitude"], json!(4.0));
    assert_eq!(state.attributes["passive"], json!(true));
    assert_eq!(hass.store.items()[0].latitude, 3.0);
}

#[tokio::test]
async fn test_update_keeps_occupancy() {
    let hass = storage_setup().await;
    hass.set_state("person.person1", "from_storage");
    hass.assert_state("zone.from_storage", "1");

    hass.zones
        .update(
            "from_storage",
            ZoneUpdate {
                name: Some("Renamed".into()),
                ..ZoneUpdate::default()
            },
            Context::new(),
        )
        .await
        .unwrap();

    let state = hass.get_state("zone.from_storage").unwrap();
    assert_eq!(state.state, "1");
    assert_eq!(state.name(), "Renamed");
}

#[tokio::test]
async fn test_ws_update_errors() {
    let hass = storage_setup().await;
    let conn = hass.admin_connection();

    let msg = hass
        .send(&conn, 1, "zone/update", json!({"zone_id": "non_existing", "name": "x"}))
        .await;
    assert_eq!(msg.error.unwrap().code, "not_found");

    let msg = hass
        .send(&conn, 2, "zone/update", json!({"zone_id": "yaml_option", "name": "x"}))
        .await;
    assert_eq!(msg.error.unwrap().code, "not_found");

    let msg = hass
        .send(&conn, 3, "zone/update", json!({"zone_id": "from_storage"}))
        .await;
    assert_eq!(msg.error.unwrap().code, "invalid_format");
}

#[tokio::test]
async fn test_ws_delete() {
    let hass = storage_setup().await;
    let conn = hass.admin_connection();
    assert!(hass.entity_registry.get("zone.from_storage").is_some());

    let msg = hass
        .send(&conn, 6, "zone/delete", json!({"zone_id": "from_storage"}))
        .await;
    assert!(msg.success, "{:?}", msg.error);

    hass.assert_missing("zone.from_storage");
    assert!(hass.entity_registry.get("zone.from_storage").is_none());
    assert!(hass.store.items().is_empty());
    assert!(hass.zones.get("from_storage").is_none());
}

#[tokio::test]
async fn test_deleted_zone_stops_counting() {
    let hass = storage_setup().await;
    hass.set_state("person.a", "home");
    hass.assert_state("zone.home", "1");
    hass.set_state("person.b", "from_storage");
    hass.assert_state("zone.from_storage", "1");

    hass.zones.delete("from_storage", Context::new()).await.unwrap();
    hass.assert_missing("zone.from_storage");

    hass.set_state("person.a", "from_storage");
    hass.set_state("person.b", "not_home");
    hass.assert_missing("zone.from_storage");
    hass.assert_state("zone.home", "0");
}

#[tokio::test]
async fn test_delete_static_zone_is_rejected() {
    let hass = storage_setup().await;

    let result = hass.zones.delete("yaml_option", Context::new()).await;
    assert!(matches!(
        result,
        Err(ha_components::zone::ZoneError::NotEditable(_))
    ));
    let result = hass.zones.delete("home", Context::new()).await;
    assert!(result.is_err());
    assert!(hass.get_state("zone.yaml_option").is_some());
    assert!(hass.get_state("zone.home").is_some());
}

#[tokio::test]
async fn test_failed_save_leaves_zones_untouched() {
    let hass = storage_setup().await;
    let conn = hass.admin_connection();
    hass.store.fail_save(true);

    let msg = hass
        .send(&conn, 1, "zone/create", json!({"name": "Unsaved", "latitude": 3, "longitude": 4}))
        .await;
    assert_eq!(msg.error.unwrap().code, "home_assistant_error");
    hass.assert_missing("zone.unsaved");
    assert!(hass.zones.get("unsaved").is_none());

    let msg = hass
        .send(&conn, 2, "zone/update", json!({"zone_id": "from_storage", "latitude": 50}))
        .await;
    assert_eq!(msg.error.unwrap().code, "home_assistant_error");
    assert_eq!(hass.get_state("zone.from_storage").unwrap().attributes["latitude"], json!(1.0));

    let msg = hass
        .send(&conn, 3, "zone/delete", json!({"zone_id": "from_storage"}))
        .await;
    assert_eq!(msg.error.unwrap().code, "home_assistant_error");
    assert!(hass.get_state("zone.from_storage").is_some());
    assert_eq!(hass.store.items(), vec![stored_item()]);
}
