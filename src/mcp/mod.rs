//! Model Context Protocol plumbing
//!
//! Each client session owns one [`McpServer`] bound to one
//! [`SessionTransport`]; servers never share protocol state.

pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::{
    JsonRpcError, JsonRpcMessage, JsonRpcResponse, LATEST_PROTOCOL_VERSION, RequestId, methods,
};
pub use server::{McpServer, SERVER_NAME};
pub use transport::SessionTransport;
