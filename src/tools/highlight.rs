//! Highlight tools: pulse or switch off the lights mapped to store SKUs

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::config::EffectsConfig;
use crate::devices::{DeviceCommand, SharedTransport};
use crate::effects::{EffectScheduler, Theme};
use crate::stores::{ResolvedTarget, StoreCatalog};

/// Shortest accepted effect duration in milliseconds
pub const MIN_DURATION_MS: u64 = 1_000;

/// Longest accepted effect duration in milliseconds
pub const MAX_DURATION_MS: u64 = 60_000;

/// Duration used when a request omits one
pub const DEFAULT_DURATION_MS: u64 = 15_000;

/// How a target should be highlighted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    #[default]
    Light,
    Screen,
    Both,
}

/// Requested effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    #[default]
    Pulse,
    Off,
}

/// One SKU to highlight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub sku: String,
    #[serde(default)]
    pub mode: TargetMode,
}

/// Arguments of `highlight_targets`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightArgs {
    pub store_id: String,
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub effect: Effect,
    /// Theme name; unknown names fall back to the configured default
    #[serde(default)]
    pub theme: Option<String>,
    /// Clamped to `MIN_DURATION_MS..=MAX_DURATION_MS`
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

/// Arguments of `stop_highlights`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopArgs {
    pub store_id: String,
}

/// Machine-readable failure code in a tool result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorCode {
    UnknownStore,
    NoTargetsMappedForProvider,
    NoDevicesMapped,
    DeviceCommandFailed,
}

/// Structured result returned to the caller of a highlight tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

impl ToolOutcome {
    fn failure(code: ToolErrorCode) -> Self {
        Self {
            ok: false,
            error: Some(code),
            ..Self::default()
        }
    }
}

/// Clamp a requested duration into the accepted range
#[must_use]
pub fn clamp_duration(duration_ms: Option<i64>) -> Duration {
    let ms = duration_ms.map_or(DEFAULT_DURATION_MS, |ms| {
        u64::try_from(ms).unwrap_or(0).clamp(MIN_DURATION_MS, MAX_DURATION_MS)
    });
    Duration::from_millis(ms)
}

/// Resolves store targets to devices and drives the effect scheduler
#[derive(Clone)]
pub struct HighlightTools {
    stores: Arc<StoreCatalog>,
    scheduler: Arc<EffectScheduler>,
    transport: SharedTransport,
    provider: String,
    effects: EffectsConfig,
}

impl HighlightTools {
    /// Create highlight tools resolving targets for `provider`
    #[must_use]
    pub fn new(
        stores: Arc<StoreCatalog>,
        scheduler: Arc<EffectScheduler>,
        transport: SharedTransport,
        provider: impl Into<String>,
        effects: EffectsConfig,
    ) -> Self {
        Self {
            stores,
            scheduler,
            transport,
            provider: provider.into(),
            effects,
        }
    }

    /// Scheduler driving this tool's animations
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<EffectScheduler> {
        &self.scheduler
    }

    /// Provider name targets are resolved for
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Pulse or switch off the devices mapped to the requested SKUs
    ///
    /// Pulses are only scheduled here; the result does not wait for them.
    pub async fn highlight(&self, args: HighlightArgs) -> ToolOutcome {
        tracing::info!(
            store_id = %args.store_id,
            targets = args.targets.len(),
            effect = ?args.effect,
            "highlight_targets"
        );

        let store = match self.stores.store(&args.store_id) {
            Ok(store) => store,
            Err(e) => return unknown_store(&e),
        };

        let mut skus = Vec::new();
        let mut selected = Vec::new();
        for target in &args.targets {
            tracing::debug!(sku = %target.sku, mode = ?target.mode, "resolving target");
            if let Some(resolved) = store.resolve(&target.sku, &self.provider) {
                skus.push(resolved.sku.clone());
                selected.push(resolved);
            }
        }

        if selected.is_empty() {
            tracing::warn!(store_id = %args.store_id, provider = %self.provider, "no targets mapped for provider");
            return ToolOutcome {
                provider: Some(self.provider.clone()),
                debug: Some(serde_json::json!({
                    "requested_skus": args.targets.iter().map(|t| t.sku.as_str()).collect::<Vec<_>>(),
                    "available_skus": store.skus(),
                    "selected_count": 0,
                })),
                ..ToolOutcome::failure(ToolErrorCode::NoTargetsMappedForProvider)
            };
        }

        let devices = unique_devices(&selected);

        if args.effect == Effect::Off {
            let failures = self.switch_off(&devices).await;
            let mut outcome = ToolOutcome {
                ok: true,
                action: Some("off".to_string()),
                provider: Some(self.provider.clone()),
                targets: Some(skus),
                ..ToolOutcome::default()
            };
            if !failures.is_empty() {
                outcome.ok = false;
                outcome.error = Some(ToolErrorCode::DeviceCommandFailed);
                outcome.detail = Some(serde_json::Value::Array(failures));
            }
            return outcome;
        }

        let theme = args.theme.as_deref().map_or(Theme::Battery, |name| {
            Theme::resolve(name, self.effects.default_theme)
        });
        let duration = clamp_duration(args.duration_ms);

        for device in &devices {
            self.scheduler
                .start(&device.device_id, theme, duration, self.effects.pulse_period);
        }

        ToolOutcome {
            ok: true,
            action: Some("pulse_started".to_string()),
            theme: Some(theme),
            targets: Some(skus),
            ..ToolOutcome::default()
        }
    }

    /// Stop every effect in a store and switch all of its lights off
    pub async fn stop_all(&self, args: StopArgs) -> ToolOutcome {
        tracing::info!(store_id = %args.store_id, "stop_highlights");

        let store = match self.stores.store(&args.store_id) {
            Ok(store) => store,
            Err(e) => return unknown_store(&e),
        };

        let devices = store.devices(&self.provider);
        if devices.is_empty() {
            return ToolOutcome::failure(ToolErrorCode::NoDevicesMapped);
        }

        let failures = self.switch_off(&devices).await;
        if failures.is_empty() {
            ToolOutcome {
                ok: true,
                action: Some("stop".to_string()),
                ..ToolOutcome::default()
            }
        } else {
            ToolOutcome {
                action: Some("stop".to_string()),
                detail: Some(serde_json::Value::Array(failures)),
                ..ToolOutcome::failure(ToolErrorCode::DeviceCommandFailed)
            }
        }
    }

    /// Cancel effects and send off commands to every device in parallel
    ///
    /// A failing device never prevents the others from being switched off;
    /// failures are collected and returned.
    async fn switch_off(&self, devices: &[ResolvedTarget]) -> Vec<serde_json::Value> {
        for device in devices {
            self.scheduler.stop(&device.device_id);
        }

        let off = &[DeviceCommand::switch_led(false)];
        let results = join_all(devices.iter().map(|device| async move {
            let result = self.transport.send(&device.device_id, off).await;
            (device, result)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(device, result)| {
                let e = result.err()?;
                tracing::warn!(device_id = %device.device_id, error = %e, "off command failed");
                Some(serde_json::json!({
                    "sku": device.sku,
                    "device_id": device.device_id,
                    "error": e.to_string(),
                }))
            })
            .collect()
    }
}

impl std::fmt::Debug for HighlightTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighlightTools")
            .field("provider", &self.provider)
            .field("effects", &self.effects)
            .finish_non_exhaustive()
    }
}

fn unknown_store(e: &Error) -> ToolOutcome {
    tracing::warn!(error = %e, "store lookup failed");
    let detail = match e {
        Error::UnknownStore { reason, .. } => reason.clone(),
        other => other.to_string(),
    };
    ToolOutcome {
        detail: Some(serde_json::Value::String(detail)),
        ..ToolOutcome::failure(ToolErrorCode::UnknownStore)
    }
}

fn unique_devices(targets: &[ResolvedTarget]) -> Vec<ResolvedTarget> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .filter(|t| seen.insert(t.device_id.as_str()))
        .cloned()
        .collect()
}
