//! Actuation Gateway - MCP gateway that drives in-store light effects
//!
//! AI assistants connect over the Model Context Protocol (Streamable HTTP)
//! and call tools that highlight product SKUs by pulsing the smart lights
//! mapped to them in a store's configuration.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          MCP clients (POST/GET/DELETE /mcp)          │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │  api (gateway, auth)  │  session (registry, reaper)  │
//! │  mcp (per-session server + transport)                │
//! └────────────────────┬────────────────────────────────┘
//!                      │ tools/call
//! ┌────────────────────▼────────────────────────────────┐
//! │  tools (highlight)  │  stores (SKU -> device)        │
//! │  effects (pulse scheduler, themes)                   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │            devices (Tuya cloud transport)            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod devices;
pub mod effects;
pub mod error;
pub mod mcp;
pub mod session;
pub mod stores;
pub mod tools;

pub use api::{ApiServer, ApiServerBuilder, ApiState};
pub use config::Config;
pub use devices::{DeviceCommand, DeviceTransport, SharedTransport, TuyaClient};
pub use effects::{EffectScheduler, Theme};
pub use error::{Error, Result};
pub use session::{Session, SessionRegistry};
pub use stores::{StoreCatalog, StoreConfig};
pub use tools::{HighlightTools, ToolOutcome};
