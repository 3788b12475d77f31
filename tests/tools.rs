//! Highlight tool tests against an in-memory store and a recording transport

use std::time::Duration;

use actuation_gateway::{DeviceCommand, Theme};
use serde_json::json;

mod common;
use common::{MockTransport, sample_tools};

#[tokio::test(start_paused = true)]
async fn pulse_gaming_example() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    let outcome = tools
        .call(
            "highlight_targets",
            json!({
                "store_id": "s1",
                "targets": [{ "sku": "X1" }],
                "effect": "pulse",
                "theme": "gaming",
                "duration_ms": 5000
            }),
        )
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({ "ok": true, "action": "pulse_started", "theme": "gaming", "targets": ["X1"] })
    );

    let job = tools.scheduler().job("d1").unwrap();
    assert_eq!(job.theme, Theme::Gaming);
    assert_eq!(job.deadline - job.started_at, Duration::from_millis(5000));
}

#[tokio::test(start_paused = true)]
async fn unmapped_targets_schedule_nothing() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    let outcome = tools
        .call(
            "highlight_targets",
            json!({ "store_id": "s1", "targets": [{ "sku": "X2" }, { "sku": "X9" }] }),
        )
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({
            "ok": false,
            "error": "no_targets_mapped_for_provider",
            "provider": "tuya",
            "debug": {
                "requested_skus": ["X2", "X9"],
                "available_skus": ["X1", "X2", "X3"],
                "selected_count": 0
            }
        })
    );
    assert!(tools.scheduler().active_devices().is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn off_reaches_every_device_despite_failures() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    tools
        .call(
            "highlight_targets",
            json!({ "store_id": "s1", "targets": [{ "sku": "X1" }, { "sku": "X3" }] }),
        )
        .await
        .unwrap();
    assert_eq!(tools.scheduler().active_devices().len(), 2);

    transport.fail_device("d1");
    let outcome = tools
        .call(
            "highlight_targets",
            json!({ "store_id": "s1", "targets": [{ "sku": "X1" }, { "sku": "X3" }], "effect": "off" }),
        )
        .await
        .unwrap();

    assert!(!outcome.ok);
    assert_eq!(outcome.action.as_deref(), Some("off"));
    let detail = outcome.detail.unwrap();
    assert_eq!(detail.as_array().unwrap().len(), 1);
    assert_eq!(detail[0]["device_id"], "d1");

    assert!(transport.sent_to("d1").contains(&DeviceCommand::switch_led(false)));
    assert!(transport.sent_to("d3").contains(&DeviceCommand::switch_led(false)));
    assert!(tools.scheduler().active_devices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn off_success_echoes_targets() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    let outcome = tools
        .call(
            "highlight_targets",
            json!({ "store_id": "s1", "targets": [{ "sku": "X3", "mode": "both" }], "effect": "off" }),
        )
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({ "ok": true, "action": "off", "provider": "tuya", "targets": ["X3"] })
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_store_is_reported() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    let outcome = tools
        .call("highlight_targets", json!({ "store_id": "nowhere", "targets": [{ "sku": "X1" }] }))
        .await
        .unwrap();
    assert!(!outcome.ok);
    assert_eq!(serde_json::to_value(&outcome).unwrap()["error"], "unknown_store");

    let outcome = tools
        .call("stop_highlights", json!({ "store_id": "nowhere" }))
        .await
        .unwrap();
    assert_eq!(serde_json::to_value(&outcome).unwrap()["error"], "unknown_store");
}

#[tokio::test(start_paused = true)]
async fn unknown_theme_and_short_duration_fall_back() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    let outcome = tools
        .call(
            "highlight_targets",
            json!({
                "store_id": "s1",
                "targets": [{ "sku": "X1" }],
                "theme": "neon",
                "duration_ms": 10
            }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.theme, Some(Theme::Default));
    let job = tools.scheduler().job("d1").unwrap();
    assert_eq!(job.deadline - job.started_at, Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn duplicate_device_gets_one_job() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    let outcome = tools
        .call(
            "highlight_targets",
            json!({ "store_id": "s1", "targets": [{ "sku": "X1" }, { "sku": "X1" }] }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.targets, Some(vec!["X1".to_string(), "X1".to_string()]));
    assert_eq!(tools.scheduler().active_devices(), vec!["d1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn stop_highlights_switches_store_off() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    tools
        .call(
            "highlight_targets",
            json!({ "store_id": "s1", "targets": [{ "sku": "X1" }, { "sku": "X3" }] }),
        )
        .await
        .unwrap();

    let outcome = tools
        .call("stop_highlights", json!({ "store_id": "s1" }))
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({ "ok": true, "action": "stop" })
    );
    assert!(tools.scheduler().active_devices().is_empty());

    transport.clear();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_highlights_reports_failed_devices() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    tools
        .call(
            "highlight_targets",
            json!({ "store_id": "s1", "targets": [{ "sku": "X1" }, { "sku": "X3" }] }),
        )
        .await
        .unwrap();

    transport.fail_device("d3");
    let outcome = tools
        .call("stop_highlights", json!({ "store_id": "s1" }))
        .await
        .unwrap();

    assert!(!outcome.ok);
    assert_eq!(outcome.action.as_deref(), Some("stop"));
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["error"], "device_command_failed");
    let detail = outcome.detail.unwrap();
    assert_eq!(detail.as_array().unwrap().len(), 1);
    assert_eq!(detail[0]["device_id"], "d3");

    assert!(transport.sent_to("d1").contains(&DeviceCommand::switch_led(false)));
    assert!(transport.sent_to("d3").contains(&DeviceCommand::switch_led(false)));
    assert!(tools.scheduler().active_devices().is_empty());
}

#[tokio::test]
async fn invalid_arguments_are_rejected() {
    let transport = MockTransport::new();
    let tools = sample_tools(&transport);

    assert!(tools.call("highlight_targets", json!({ "targets": [] })).await.is_err());
    assert!(
        tools
            .call("highlight_targets", json!({ "store_id": "s1", "targets": [], "effect": "blink" }))
            .await
            .is_err()
    );
    assert!(tools.call("dance", json!({})).await.is_err());
}
