//! Connection lifecycle.
//!
//! The [`ConnectionManager`] owns the current [`Session`] and everything
//! needed to get one:
//!
//! - **client mode**: dial the configured URL, retrying at a fixed interval
//!   with no cap, and dial again whenever the link drops;
//! - **server mode**: bind the listener (retrying while the port is taken)
//!   and make the newest accepted peer the current session.
//!
//! ```text
//! Idle ──start()──▶ Starting ──▶ Running ──shutdown()──▶ Stopping ──▶ Stopped
//!                                   │
//!                      auth failure ┘ (same shutdown, from the receive task)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use onebridge_core::{
    AdapterError, AdapterResult, ApiError, ApiResult, Bot, CallCorrelator, Connection,
    FrameStream, TokenGuard, TransportError, TriggerRegistry,
};
use onebridge_transport::client;
use onebridge_transport::server::{self, ListenerHandle, ServerOptions};

use crate::config::{Mode, OneBotConfig};
use crate::session::{LoopExit, Session};

/// Adapter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Built, not started.
    Idle,
    /// Connecting or binding.
    Starting,
    /// Serving traffic.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Fully stopped.
    Stopped,
}

/// State of the underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection and not trying.
    Disconnected,
    /// Client mode, dialing.
    Connecting,
    /// Server mode, waiting for a peer.
    Listening,
    /// A session is current.
    Connected,
}

/// Why the manager stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// [`ConnectionManager::shutdown`] was called.
    Requested,
    /// The remote rejected our access token.
    AuthRejected {
        /// Return code of the failure report.
        retcode: i64,
        /// Failure message of the report.
        message: String,
    },
}

impl StopReason {
    /// Converts an abnormal stop into an error.
    pub fn into_result(self) -> AdapterResult<()> {
        match self {
            Self::Requested => Ok(()),
            Self::AuthRejected { retcode, message } => {
                Err(AdapterError::AuthRejected { retcode, message })
            }
        }
    }
}

// =============================================================================
// Session slot
// =============================================================================

/// Holds the current session; replaced wholesale.
#[derive(Default)]
struct SessionSlot(RwLock<Option<Arc<Session>>>);

impl SessionSlot {
    fn current(&self) -> Option<Arc<Session>> {
        self.0.read().clone()
    }

    /// Installs `session`, running `on_replaced` on the previous one while
    /// the slot is still locked.
    fn replace_with(&self, session: Arc<Session>, on_replaced: impl FnOnce(Arc<Session>)) {
        let mut slot = self.0.write();
        if let Some(previous) = slot.replace(session) {
            on_replaced(previous);
        }
    }

    /// Clears the slot if it still holds `session`.
    fn clear_if(&self, session: &Arc<Session>) -> bool {
        let mut slot = self.0.write();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
            *slot = None;
            true
        } else {
            false
        }
    }

    fn take(&self) -> Option<Arc<Session>> {
        self.0.write().take()
    }
}

// =============================================================================
// Connection manager
// =============================================================================

/// Owns the connection and the background tasks that serve it.
pub struct ConnectionManager {
    config: OneBotConfig,
    correlator: Arc<CallCorrelator>,
    triggers: Arc<TriggerRegistry>,
    slot: SessionSlot,
    state: watch::Sender<ManagerState>,
    link: watch::Sender<LinkState>,
    shutdown_token: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    listener: Mutex<Option<ListenerHandle>>,
    local_addr: Mutex<Option<SocketAddr>>,
    stop_reason: Mutex<Option<StopReason>>,
}

impl ConnectionManager {
    /// Creates an idle manager with a frozen trigger registry.
    pub fn new(config: OneBotConfig, triggers: Arc<TriggerRegistry>) -> Self {
        Self {
            config,
            correlator: Arc::new(CallCorrelator::new()),
            triggers,
            slot: SessionSlot::default(),
            state: watch::Sender::new(ManagerState::Idle),
            link: watch::Sender::new(LinkState::Disconnected),
            shutdown_token: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            stop_reason: Mutex::new(None),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &OneBotConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    /// Subscribes to lifecycle changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.state.subscribe()
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }

    /// Subscribes to link changes.
    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    /// The bound listener address (server mode, after start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// The current session, if connected.
    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.slot.current()
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Why the manager stopped, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason.lock().clone()
    }

    /// Connects or starts listening, depending on the configured mode.
    ///
    /// In client mode this returns once the first connection is up; in
    /// server mode once the listener is bound.
    pub async fn start(self: &Arc<Self>) -> AdapterResult<()> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == ManagerState::Idle {
                *state = ManagerState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(AdapterError::AlreadyStarted);
        }

        info!(mode = %self.config.mode, "Starting OneBot adapter");
        let started = match self.config.mode {
            Mode::Client => self.start_client().await,
            Mode::Server => self.start_server().await,
        };

        if let Err(e) = started {
            self.state.send_if_modified(|state| {
                if *state == ManagerState::Starting {
                    *state = ManagerState::Stopped;
                    true
                } else {
                    false
                }
            });
            self.link.send_replace(LinkState::Disconnected);
            return Err(e);
        }

        let running = self.state.send_if_modified(|state| {
            if *state == ManagerState::Starting {
                *state = ManagerState::Running;
                true
            } else {
                false
            }
        });
        if running {
            Ok(())
        } else {
            Err(AdapterError::Shutdown)
        }
    }

    async fn start_client(self: &Arc<Self>) -> AdapterResult<()> {
        let connection = self.connect_with_retry().await?;
        if self.shutdown_token.is_cancelled() {
            connection.handle.close();
            return Err(AdapterError::Shutdown);
        }

        let manager = Arc::clone(self);
        self.tasks
            .lock()
            .spawn(async move { manager.run_client(connection).await });
        Ok(())
    }

    /// Dials until connected or shut down.
    async fn connect_with_retry(&self) -> AdapterResult<Connection> {
        let url = self.config.client.url.as_str();
        let token = Some(self.config.client.token.as_str()).filter(|t| !t.is_empty());
        let interval = self.config.retry_interval();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            self.link.send_replace(LinkState::Connecting);
            info!(url = %url, attempt, "Connecting to OneBot server");

            let result = tokio::select! {
                () = self.shutdown_token.cancelled() => return Err(AdapterError::Shutdown),
                result = client::connect(url, token) => result,
            };

            match result {
                Ok(connection) => {
                    info!(url = %url, attempt, "Connected to OneBot server");
                    return Ok(connection);
                }
                Err(e @ TransportError::InvalidConfig(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, retry_in = ?interval, "Connection failed, retrying");
                    tokio::select! {
                        () = self.shutdown_token.cancelled() => return Err(AdapterError::Shutdown),
                        () = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }
    }

    /// Serves one client connection after another until shutdown.
    async fn run_client(self: Arc<Self>, mut connection: Connection) {
        loop {
            let (session, frames) = self.install(connection);
            let exit = Arc::clone(&session).receive_loop(frames).await;
            if self.handle_exit(&session, exit) || self.shutdown_token.is_cancelled() {
                return;
            }

            warn!(url = %self.config.client.url, "Connection lost, reconnecting");
            connection = match self.connect_with_retry().await {
                Ok(connection) => connection,
                Err(_) => return,
            };
        }
    }

    async fn start_server(self: &Arc<Self>) -> AdapterResult<()> {
        let server_config = &self.config.server;
        let options = ServerOptions {
            host: server_config.host.clone(),
            port: server_config.port,
            path: server_config.path.clone(),
            retry_interval: self.config.retry_interval(),
            guard: TokenGuard::new(Some(server_config.token.clone())),
        };
        if options.guard.is_enabled() {
            debug!("Access token check enabled for inbound connections");
        }

        let (incoming_tx, incoming_rx) = mpsc::channel(8);
        let listener = server::listen(options, incoming_tx, &self.shutdown_token)
            .await
            .map_err(|e| match e {
                TransportError::Cancelled => AdapterError::Shutdown,
                other => AdapterError::Transport(other),
            })?;

        *self.local_addr.lock() = Some(listener.local_addr());
        *self.listener.lock() = Some(listener);
        self.link.send_replace(LinkState::Listening);

        let manager = Arc::clone(self);
        self.tasks
            .lock()
            .spawn(async move { manager.accept_loop(incoming_rx).await });
        Ok(())
    }

    /// Turns accepted peers into sessions until shutdown.
    async fn accept_loop(self: Arc<Self>, mut incoming: mpsc::Receiver<Connection>) {
        loop {
            let connection = tokio::select! {
                () = self.shutdown_token.cancelled() => break,
                connection = incoming.recv() => match connection {
                    Some(connection) => connection,
                    None => break,
                },
            };

            let (session, frames) = self.install(connection);
            let manager = Arc::clone(&self);
            {
                let mut tasks = self.tasks.lock();
                // Reap receive tasks of peers that already left.
                while tasks.try_join_next().is_some() {}
                tasks.spawn(async move {
                    let exit = Arc::clone(&session).receive_loop(frames).await;
                    manager.handle_exit(&session, exit);
                });
            }
        }
        debug!("Accept loop stopped");
    }

    /// Makes a connection the current session.
    ///
    /// The previous session, if any, is closed and every pending call fails
    /// with [`ApiError::NotConnected`] before the new session is visible.
    fn install(&self, connection: Connection) -> (Arc<Session>, FrameStream) {
        let Connection {
            handle,
            frames,
            info,
        } = connection;
        let session = Arc::new(Session::new(
            handle,
            info,
            Arc::clone(&self.correlator),
            Arc::clone(&self.triggers),
            self.config.api_timeout(),
        ));

        self.slot.replace_with(Arc::clone(&session), |previous| {
            previous.close();
            let failed = self.correlator.fail_all(ApiError::NotConnected);
            info!(
                previous = %previous.id(),
                current = %session.id(),
                failed_calls = failed,
                "Replacing current session"
            );
        });
        self.link.send_replace(LinkState::Connected);

        if self.shutdown_token.is_cancelled() {
            session.close();
        }
        (session, frames)
    }

    /// Cleans up after a receive loop. Returns `true` if the manager must stop.
    fn handle_exit(self: &Arc<Self>, session: &Arc<Session>, exit: LoopExit) -> bool {
        if self.slot.clear_if(session) {
            let failed = self.correlator.fail_all(ApiError::NotConnected);
            let idle = match self.config.mode {
                Mode::Client => LinkState::Disconnected,
                Mode::Server => LinkState::Listening,
            };
            self.link.send_replace(idle);
            debug!(session = %session.id(), failed_calls = failed, "Current session cleared");
        }

        match exit {
            LoopExit::AuthRejected { retcode, message } => {
                error!(retcode, message = %message, "Stopping adapter: access token rejected");
                self.begin_shutdown(StopReason::AuthRejected { retcode, message });
                true
            }
            LoopExit::Closed => {
                info!(session = %session.id(), "Connection closed");
                false
            }
            LoopExit::Errored(e) => {
                warn!(session = %session.id(), error = %e, "Connection failed");
                false
            }
        }
    }

    /// Starts a shutdown from inside a background task.
    ///
    /// The actual teardown runs on a separate task so it can join the task
    /// that requested it.
    fn begin_shutdown(self: &Arc<Self>, reason: StopReason) {
        self.stop_reason.lock().get_or_insert(reason);
        self.shutdown_token.cancel();
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.shutdown().await });
    }

    /// Resolves once a stop has been requested, by anyone.
    pub async fn stopped(&self) -> StopReason {
        self.shutdown_token.cancelled().await;
        self.stop_reason().unwrap_or(StopReason::Requested)
    }

    /// Stops everything. Idempotent; concurrent callers wait for the first.
    pub async fn shutdown(&self) {
        let first = self.state.send_if_modified(|state| match state {
            ManagerState::Stopping | ManagerState::Stopped => false,
            _ => {
                *state = ManagerState::Stopping;
                true
            }
        });
        if !first {
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(|state| *state == ManagerState::Stopped).await;
            return;
        }

        self.stop_reason.lock().get_or_insert(StopReason::Requested);
        self.shutdown_token.cancel();
        info!("Shutting down OneBot adapter");

        if let Some(listener) = self.listener.lock().take() {
            listener.stop();
        }
        if let Some(session) = self.slot.take() {
            session.close();
        }
        let failed = self.correlator.fail_all(ApiError::NotConnected);
        if failed > 0 {
            debug!(failed_calls = failed, "Failed pending calls on shutdown");
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                error!(error = %e, "Background task panicked");
            }
        }

        self.link.send_replace(LinkState::Disconnected);
        self.state.send_replace(ManagerState::Stopped);
        info!("OneBot adapter stopped");
    }
}

#[async_trait]
impl Bot for ConnectionManager {
    fn id(&self) -> &str {
        "onebot"
    }

    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value> {
        let session = self.slot.current().ok_or(ApiError::NotConnected)?;
        session.call_api(action, params).await
    }

    async fn send_raw(&self, frame: String) -> ApiResult<()> {
        let session = self.slot.current().ok_or(ApiError::NotConnected)?;
        session.send_raw(frame).await
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("mode", &self.config.mode)
            .field("state", &self.state())
            .field("link", &self.link_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(config: OneBotConfig) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(config, Arc::new(TriggerRegistry::new())))
    }

    #[tokio::test]
    async fn test_call_without_session_is_not_connected() {
        let m = manager(OneBotConfig::default());
        assert!(matches!(
            m.call_api("get_status", Value::Null).await,
            Err(ApiError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let m = manager(OneBotConfig::default());
        m.shutdown().await;
        m.shutdown().await;
        assert_eq!(m.state(), ManagerState::Stopped);
        assert_eq!(m.stop_reason(), Some(StopReason::Requested));
        assert!(matches!(m.start().await, Err(AdapterError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_client_retry() {
        let holder = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = holder.local_addr().unwrap();
        drop(holder);

        let mut config = OneBotConfig::default();
        config.mode = Mode::Client;
        config.client.url = format!("ws://{addr}/");
        config.retry_interval_secs = 3600;
        let m = manager(config);

        let starter = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.start().await })
        };

        let mut link = m.subscribe_link();
        link.wait_for(|l| *l == LinkState::Connecting).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        m.shutdown().await;

        assert!(matches!(starter.await.unwrap(), Err(AdapterError::Shutdown)));
        assert_eq!(m.state(), ManagerState::Stopped);
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let mut config = OneBotConfig::default();
        config.server.port = 0;
        let m = manager(config);

        m.start().await.unwrap();
        assert_eq!(m.state(), ManagerState::Running);
        assert_eq!(m.link_state(), LinkState::Listening);
        let addr = m.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        m.shutdown().await;
        assert_eq!(m.link_state(), LinkState::Disconnected);
    }
}
