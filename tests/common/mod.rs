//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use actuation_gateway::config::EffectsConfig;
use actuation_gateway::{
    ApiServer, ApiServerBuilder, DeviceCommand, DeviceTransport, EffectScheduler, HighlightTools,
    SharedTransport, StoreCatalog, StoreConfig,
};
use async_trait::async_trait;

/// Device transport that records every send and can fail chosen devices
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(String, Vec<DeviceCommand>)>>,
    failing: Mutex<HashSet<String>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every send to `device_id` fail (after recording it)
    pub fn fail_device(&self, device_id: &str) {
        self.failing.lock().unwrap().insert(device_id.to_string());
    }

    /// Every send so far, in order
    pub fn sent(&self) -> Vec<(String, Vec<DeviceCommand>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Commands sent to one device, flattened
    pub fn sent_to(&self, device_id: &str) -> Vec<DeviceCommand> {
        self.sent()
            .into_iter()
            .filter(|(id, _)| id == device_id)
            .flat_map(|(_, commands)| commands)
            .collect()
    }

    /// Colour levels (`v`) sent to one device, in order
    pub fn levels(&self, device_id: &str) -> Vec<u64> {
        self.sent_to(device_id)
            .into_iter()
            .filter(|c| c.code == "colour_data_v2")
            .filter_map(|c| c.value["v"].as_u64())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    fn provider(&self) -> &str {
        "tuya"
    }

    async fn send(
        &self,
        device_id: &str,
        commands: &[DeviceCommand],
    ) -> actuation_gateway::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((device_id.to_string(), commands.to_vec()));
        if self.failing.lock().unwrap().contains(device_id) {
            return Err(actuation_gateway::Error::Device(format!("{device_id} unreachable")));
        }
        Ok(())
    }
}

/// Store `s1`: X1 and X3 on tuya devices d1/d3, X2 only mapped for hue
#[must_use]
pub fn sample_store() -> StoreConfig {
    serde_json::from_value(serde_json::json!({
        "targets": {
            "X1": { "providers": { "tuya": { "device_id": "d1" } } },
            "X2": { "providers": { "hue": { "device_id": "h2" } } },
            "X3": { "providers": { "tuya": { "device_id": "d3" } } }
        }
    }))
    .unwrap()
}

/// Highlight tools over the sample store with a mock transport
pub fn sample_tools(transport: &Arc<MockTransport>) -> HighlightTools {
    let shared: SharedTransport = transport.clone();
    HighlightTools::new(
        Arc::new(StoreCatalog::in_memory([("s1".to_string(), sample_store())])),
        Arc::new(EffectScheduler::new(shared.clone())),
        shared,
        "tuya",
        EffectsConfig::default(),
    )
}

/// API server over the sample store, optionally requiring a bearer token
pub fn sample_server(transport: &Arc<MockTransport>, token: Option<&str>) -> ApiServer {
    ApiServerBuilder::new(sample_tools(transport))
        .bearer_token(token.map(|t| secrecy::SecretString::from(t.to_string())))
        .build()
}
