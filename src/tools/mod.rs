//! Tools exposed to protocol clients

pub mod highlight;

use serde::{Deserialize, Serialize};

pub use highlight::{
    DEFAULT_DURATION_MS, Effect, HighlightArgs, HighlightTools, MAX_DURATION_MS, MIN_DURATION_MS,
    StopArgs, TargetMode, TargetSpec, ToolErrorCode, ToolOutcome, clamp_duration,
};

use crate::effects::Theme;

/// Name of the pulse/off tool
pub const HIGHLIGHT_TARGETS: &str = "highlight_targets";

/// Name of the store-wide stop tool
pub const STOP_HIGHLIGHTS: &str = "stop_highlights";

/// Tool advertised in `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Why a tool call could not be dispatched
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
}

/// Descriptors for every tool
#[must_use]
pub fn definitions() -> Vec<ToolDescriptor> {
    let themes: Vec<&str> = Theme::ALL.iter().map(|t| t.name()).collect();

    vec![
        ToolDescriptor {
            name: HIGHLIGHT_TARGETS.to_string(),
            title: "Highlight targets".to_string(),
            description: "Highlight one or more SKUs (lights only).".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "store_id": { "type": "string" },
                    "targets": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "sku": { "type": "string" },
                                "mode": { "type": "string", "enum": ["light", "screen", "both"], "default": "light" }
                            },
                            "required": ["sku"]
                        }
                    },
                    "effect": { "type": "string", "enum": ["pulse", "off"], "default": "pulse" },
                    "theme": { "type": "string", "enum": themes, "default": "battery" },
                    "duration_ms": {
                        "type": "integer",
                        "minimum": MIN_DURATION_MS,
                        "maximum": MAX_DURATION_MS,
                        "default": DEFAULT_DURATION_MS
                    }
                },
                "required": ["store_id", "targets"]
            }),
        },
        ToolDescriptor {
            name: STOP_HIGHLIGHTS.to_string(),
            title: "Stop highlights".to_string(),
            description: "Turn off mapped lights for this store.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "store_id": { "type": "string" } },
                "required": ["store_id"]
            }),
        },
    ]
}

impl HighlightTools {
    /// Dispatch a tool call by name
    ///
    /// # Errors
    ///
    /// Returns error if the tool is unknown or the arguments do not match its schema.
    /// Failures while running the tool are reported inside the outcome instead.
    pub async fn call(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolCallError> {
        match name {
            HIGHLIGHT_TARGETS => {
                let args = parse_args(HIGHLIGHT_TARGETS, arguments)?;
                Ok(self.highlight(args).await)
            }
            STOP_HIGHLIGHTS => {
                let args = parse_args(STOP_HIGHLIGHTS, arguments)?;
                Ok(self.stop_all(args).await)
            }
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    tool: &'static str,
    arguments: serde_json::Value,
) -> std::result::Result<T, ToolCallError> {
    let arguments = if arguments.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ToolCallError::InvalidArguments {
        tool,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_cover_both_tools() {
        let defs = definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![HIGHLIGHT_TARGETS, STOP_HIGHLIGHTS]);

        let json = serde_json::to_value(&defs[0]).unwrap();
        assert!(json["inputSchema"]["properties"]["theme"]["enum"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("gaming")));
    }

    #[test]
    fn missing_store_id_is_invalid() {
        let err = parse_args::<StopArgs>(STOP_HIGHLIGHTS, serde_json::Value::Null).unwrap_err();
        assert!(matches!(err, ToolCallError::InvalidArguments { .. }));
    }
}
