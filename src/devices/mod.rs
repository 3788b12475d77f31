//! Device command transport
//!
//! The gateway never talks to lights directly; it hands command lists to a
//! [`DeviceTransport`] which delivers them to the vendor cloud.

pub mod tuya;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::effects::Hsv;

pub use tuya::{DeviceStatus, TuyaClient};

/// A single data-point command, e.g. `{"code": "switch_led", "value": true}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub code: String,
    pub value: serde_json::Value,
}

impl DeviceCommand {
    /// Power the light on or off
    #[must_use]
    pub fn switch_led(on: bool) -> Self {
        Self {
            code: "switch_led".to_string(),
            value: serde_json::Value::Bool(on),
        }
    }

    /// Put the light into colour mode
    #[must_use]
    pub fn colour_mode() -> Self {
        Self {
            code: "work_mode".to_string(),
            value: serde_json::Value::String("colour".to_string()),
        }
    }

    /// Set the colour and intensity
    #[must_use]
    pub fn colour(hsv: Hsv) -> Self {
        Self {
            code: "colour_data_v2".to_string(),
            value: serde_json::json!({ "h": hsv.h, "s": hsv.s, "v": hsv.v }),
        }
    }
}

/// Delivers command lists to physical devices
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Provider name matched against store configuration (e.g. "tuya")
    fn provider(&self) -> &str;

    /// Send a command list to a device
    ///
    /// # Errors
    ///
    /// Returns error if the command could not be delivered or was rejected
    async fn send(&self, device_id: &str, commands: &[DeviceCommand]) -> Result<()>;
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn DeviceTransport>;

/// Send command batches to a device on a detached task
///
/// Fire-and-forget: a failure is logged at debug level and discarded, never
/// propagated to the caller. Batches are sent in order and the first failure
/// skips the remaining batches.
pub fn spawn_best_effort(
    transport: SharedTransport,
    device_id: String,
    batches: Vec<Vec<DeviceCommand>>,
    label: &'static str,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        for batch in &batches {
            if let Err(e) = transport.send(&device_id, batch).await {
                tracing::debug!(device_id = %device_id, action = label, error = %e, "best-effort device command failed");
                return;
            }
        }
        tracing::trace!(device_id = %device_id, action = label, "best-effort device command sent");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_format() {
        let cmd = DeviceCommand::colour(Hsv { h: 300, s: 1000, v: 150 });
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"code": "colour_data_v2", "value": {"h": 300, "s": 1000, "v": 150}})
        );

        let off = serde_json::to_value(DeviceCommand::switch_led(false)).unwrap();
        assert_eq!(off, serde_json::json!({"code": "switch_led", "value": false}));

        let mode = serde_json::to_value(DeviceCommand::colour_mode()).unwrap();
        assert_eq!(mode["value"], "colour");
    }
}
