//! Per-session streamable transport
//!
//! The transport carries one client's messages to its protocol server and
//! owns the handshake state: a session id is generated only once the server
//! has answered `initialize` successfully, and the registration callback
//! fires at that moment. Server-initiated messages go out over an optional
//! push stream that the client opens separately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::protocol::{JsonRpcError, JsonRpcMessage, JsonRpcResponse};
use super::server::McpServer;
use crate::{Error, Result};

/// Buffered server-initiated messages per push stream
const PUSH_BUFFER: usize = 64;

type SessionCallback = Box<dyn FnOnce(&str) + Send>;

/// Transport bound to a single protocol session
pub struct SessionTransport {
    session_id: OnceLock<String>,
    server: OnceLock<Arc<McpServer>>,
    on_initialized: Mutex<Option<SessionCallback>>,
    on_disconnect: Mutex<Option<SessionCallback>>,
    push: Mutex<Option<mpsc::Sender<JsonRpcMessage>>>,
    closed: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: OnceLock::new(),
            server: OnceLock::new(),
            on_initialized: Mutex::new(None),
            on_disconnect: Mutex::new(None),
            push: Mutex::new(None),
            closed: AtomicBool::new(false),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Register the callback fired once with the new session id
    pub fn on_initialized(&self, callback: impl FnOnce(&str) + Send + 'static) {
        *lock(&self.on_initialized) = Some(Box::new(callback));
    }

    /// Register the callback fired once when the client's push stream goes away
    pub fn on_disconnect(&self, callback: impl FnOnce(&str) + Send + 'static) {
        *lock(&self.on_disconnect) = Some(Box::new(callback));
    }

    pub(super) fn bind(&self, server: Arc<McpServer>) -> Result<()> {
        self.server
            .set(server)
            .map_err(|_| Error::Protocol("transport already connected".to_string()))
    }

    /// Session id, once the handshake has completed
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.get().map(String::as_str)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Time since the last routed message
    #[must_use]
    pub fn idle_for(&self) -> std::time::Duration {
        lock(&self.last_seen).elapsed()
    }

    /// Route one inbound message to the connected server
    ///
    /// Returns the response for requests and `None` for notifications and
    /// client responses.
    ///
    /// # Errors
    ///
    /// Returns error if the transport is closed or not connected to a server
    pub async fn handle(&self, message: JsonRpcMessage) -> Result<Option<JsonRpcResponse>> {
        if self.is_closed() {
            return Err(Error::Protocol("transport closed".to_string()));
        }
        let server = self
            .server
            .get()
            .ok_or_else(|| Error::Protocol("transport not connected".to_string()))?;
        *lock(&self.last_seen) = Instant::now();

        if message.is_initialize_request() {
            if self.session_id.get().is_some() {
                return Ok(Some(JsonRpcResponse::error(
                    message.id,
                    JsonRpcError::new(JsonRpcError::INVALID_REQUEST, "Server already initialized"),
                )));
            }
            let response = server.handle(message).await;
            if let Some(response) = response.as_ref().filter(|r| !r.is_error()) {
                tracing::trace!(id = ?response.id, "handshake answered");
                self.complete_handshake()?;
            }
            return Ok(response);
        }

        if self.session_id.get().is_none() {
            return Ok(message.id.clone().filter(|_| message.is_request()).map(|id| {
                JsonRpcResponse::error(
                    Some(id),
                    JsonRpcError::new(JsonRpcError::INVALID_REQUEST, "Server not initialized"),
                )
            }));
        }

        Ok(server.handle(message).await)
    }

    fn complete_handshake(&self) -> Result<()> {
        let id = uuid::Uuid::new_v4().to_string();
        self.session_id
            .set(id.clone())
            .map_err(|_| Error::Protocol("session id already assigned".to_string()))?;

        let callback = lock(&self.on_initialized).take();
        if let Some(callback) = callback {
            callback(&id);
        }
        Ok(())
    }

    /// Open the server push stream
    ///
    /// # Errors
    ///
    /// Returns error if the transport is closed or a stream is already open
    pub fn open_stream(&self) -> Result<mpsc::Receiver<JsonRpcMessage>> {
        if self.is_closed() {
            return Err(Error::Protocol("transport closed".to_string()));
        }
        let mut push = lock(&self.push);
        if push.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(Error::Protocol("push stream already open".to_string()));
        }
        let (tx, rx) = mpsc::channel(PUSH_BUFFER);
        *push = Some(tx);
        Ok(rx)
    }

    /// Queue a server-initiated message; dropped when no stream is open
    pub fn push(&self, message: JsonRpcMessage) -> bool {
        let push = lock(&self.push);
        let Some(tx) = push.as_ref() else {
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(session_id = ?self.session_id(), error = %e, "push message dropped");
                false
            }
        }
    }

    /// The client's push stream went away
    pub fn disconnected(&self) {
        lock(&self.push).take();
        let callback = lock(&self.on_disconnect).take();
        if let (Some(callback), Some(id)) = (callback, self.session_id()) {
            callback(id);
        }
    }

    /// Stop accepting messages and end the push stream
    ///
    /// # Errors
    ///
    /// Returns error if the transport was already closed
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Protocol("transport already closed".to_string()));
        }
        lock(&self.push).take();
        lock(&self.on_disconnect).take();
        Ok(())
    }
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("session_id", &self.session_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::config::EffectsConfig;
    use crate::devices::{DeviceCommand, DeviceTransport, SharedTransport};
    use crate::effects::EffectScheduler;
    use crate::mcp::protocol::{RequestId, methods};
    use crate::stores::StoreCatalog;
    use crate::tools::HighlightTools;

    struct Null;

    #[async_trait]
    impl DeviceTransport for Null {
        fn provider(&self) -> &str {
            "tuya"
        }

        async fn send(&self, _device_id: &str, _commands: &[DeviceCommand]) -> crate::Result<()> {
            Ok(())
        }
    }

    fn connected() -> Arc<SessionTransport> {
        let devices: SharedTransport = Arc::new(Null);
        let server = Arc::new(McpServer::new(HighlightTools::new(
            Arc::new(StoreCatalog::in_memory(Vec::new())),
            Arc::new(EffectScheduler::new(devices.clone())),
            devices,
            "tuya",
            EffectsConfig::default(),
        )));
        let transport = Arc::new(SessionTransport::new());
        assert_ok!(server.connect(&transport));
        transport
    }

    fn initialize() -> JsonRpcMessage {
        JsonRpcMessage::request(
            RequestId::Number(1),
            methods::INITIALIZE,
            serde_json::json!({ "protocolVersion": "2025-03-26", "capabilities": {} }),
        )
    }

    #[tokio::test]
    async fn requests_before_handshake_are_refused() {
        let transport = connected();
        let ping =
            JsonRpcMessage::request(RequestId::Number(2), methods::PING, serde_json::json!({}));

        let response = assert_ok!(transport.handle(ping).await).unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_REQUEST);
        assert!(transport.session_id().is_none());
    }

    #[tokio::test]
    async fn handshake_fires_callback_once() {
        let transport = connected();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        transport.on_initialized(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_ok!(transport.handle(initialize()).await);
        let again = assert_ok!(transport.handle(initialize()).await).unwrap();

        assert!(again.is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(transport.session_id().is_some());
    }

    #[tokio::test]
    async fn single_push_stream() {
        let transport = connected();
        let message = JsonRpcMessage::notification(methods::LOG_MESSAGE, None);
        assert!(!transport.push(message.clone()));

        let mut rx = assert_ok!(transport.open_stream());
        assert_err!(transport.open_stream());

        assert!(transport.push(message));
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn closed_transport_refuses_everything() {
        let transport = connected();
        assert_ok!(transport.close());
        assert_err!(transport.close());
        assert_err!(transport.open_stream());
        assert_err!(transport.handle(initialize()).await);
    }

    #[test]
    fn unbound_transport_is_not_connected() {
        let transport = SessionTransport::new();
        assert_err!(tokio_test::block_on(transport.handle(initialize())));
    }
}
