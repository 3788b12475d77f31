//! Session registry: session id to (server, transport) pairs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::mcp::{JsonRpcMessage, JsonRpcResponse, McpServer, SessionTransport};
use crate::tools::HighlightTools;
use crate::{Error, Result};

/// Shortest interval between idle sweeps
const MIN_REAP_INTERVAL: Duration = Duration::from_secs(1);

type SessionMap = Mutex<HashMap<String, Arc<Session>>>;

/// An established protocol session
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub server: Arc<McpServer>,
    pub transport: Arc<SessionTransport>,
    pub created_at: DateTime<Utc>,
}

/// Result of routing a handshake message into a fresh session
#[derive(Debug)]
pub struct Handshake {
    /// Set only if the handshake succeeded and the session was registered
    pub session_id: Option<String>,
    pub response: Option<JsonRpcResponse>,
}

/// Owns every live session
///
/// A session becomes visible here only once its transport reports the
/// handshake as complete.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    tools: HighlightTools,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(tools: HighlightTools) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            tools,
        }
    }

    /// Build an isolated server for a handshake message and route it
    ///
    /// # Errors
    ///
    /// Returns error if the server and transport cannot be bound or the
    /// transport refuses the message
    pub async fn begin_session(&self, init: JsonRpcMessage) -> Result<Handshake> {
        let server = Arc::new(McpServer::new(self.tools.clone()));
        let transport = Arc::new(SessionTransport::new());
        server.connect(&transport)?;

        let sessions = Arc::downgrade(&self.sessions);
        let weak_server = Arc::downgrade(&server);
        let weak_transport = Arc::downgrade(&transport);
        transport.on_initialized(move |id| {
            let (Some(sessions), Some(server), Some(transport)) =
                (sessions.upgrade(), weak_server.upgrade(), weak_transport.upgrade())
            else {
                return;
            };
            lock(&sessions).insert(
                id.to_string(),
                Arc::new(Session {
                    id: id.to_string(),
                    server,
                    transport,
                    created_at: Utc::now(),
                }),
            );
            tracing::info!(session_id = %id, "session initialized");
        });

        let sessions = Arc::downgrade(&self.sessions);
        transport.on_disconnect(move |id| {
            if let Some(sessions) = sessions.upgrade() {
                tracing::debug!(session_id = %id, "transport disconnected");
                end_in(&sessions, id);
            }
        });

        let response = transport.handle(init).await?;
        Ok(Handshake {
            session_id: transport.session_id().map(str::to_string),
            response,
        })
    }

    /// Look up an established session
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the id is not registered
    pub fn lookup(&self, session_id: &str) -> Result<Arc<Session>> {
        lock(&self.sessions)
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// End a session, closing its transport and server
    ///
    /// Close failures are logged and ignored. Returns false if the id was not
    /// registered; ending twice is a no-op.
    pub fn end_session(&self, session_id: &str) -> bool {
        end_in(&self.sessions, session_id)
    }

    /// End every session idle for at least `max_idle`
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let idle: Vec<String> = lock(&self.sessions)
            .values()
            .filter(|s| s.transport.idle_for() >= max_idle)
            .map(|s| s.id.clone())
            .collect();

        idle.iter()
            .filter(|id| {
                tracing::info!(session_id = %id, "ending idle session");
                self.end_session(id)
            })
            .count()
    }

    /// Spawn the background sweep ending sessions idle past `max_idle`
    #[must_use]
    pub fn spawn_reaper(&self, max_idle: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let every = (max_idle / 4).max(MIN_REAP_INTERVAL);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let reaped = registry.reap_idle(max_idle);
                if reaped > 0 {
                    tracing::debug!(reaped, "idle sweep");
                }
            }
        })
    }

    /// End every session
    pub fn shutdown(&self) -> usize {
        let ids: Vec<String> = lock(&self.sessions).keys().cloned().collect();
        ids.iter().filter(|id| self.end_session(id)).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}

fn end_in(sessions: &SessionMap, session_id: &str) -> bool {
    // Removed under the lock, closed outside it
    let Some(session) = lock(sessions).remove(session_id) else {
        return false;
    };

    if let Err(e) = session.transport.close() {
        tracing::debug!(session_id, error = %e, "transport close failed");
    }
    if let Err(e) = session.server.close() {
        tracing::debug!(session_id, error = %e, "server close failed");
    }
    tracing::info!(session_id, "session ended");
    true
}

fn lock(sessions: &SessionMap) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Session>>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}
