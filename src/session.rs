//! Janus session lifecycle.
//!
//! A [`Session`] creates the remote session, attaches a primary streaming
//! handle and runs one background task that long-polls the session's event
//! endpoint. Events are handed to the session's [`TransactionRegistry`],
//! which wakes whichever handle operation is waiting for them.
//!
//! The poll task heals itself: repeated failures reinitialize the remote
//! session, and if that keeps failing the session is destroyed and the task
//! ends (see [`PollPolicy`](crate::config::PollPolicy)).

mod poll_loop;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::JanusConfig;
use crate::error::JanusError;
use crate::handle::Handle;
use crate::protocol::{
    Attached, Command, Expect, JanusId, MountpointSpec, SessionCreated, STREAMING_PLUGIN,
};
use crate::registry::TransactionRegistry;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    SessionCreated,
    HandleAttached,
    Polling,
    /// The last poll failed; the loop is backing off.
    Failing,
    Reinitializing,
    /// Gave up after exhausting reinitializations. Permanent.
    Terminated,
    /// Stopped by [`Session::kill`]. The remote session is left alone.
    Killed,
}

/// Failure counters of the poll loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Failed polls since the last healthy one, in the current loop instance.
    pub consecutive_failures: u32,
    /// Reinitializations since the last healthy poll.
    pub reinit_count: u32,
}

struct SessionCore {
    session_id: Option<JanusId>,
    primary: Option<Handle>,
    handles: Vec<Handle>,
    state: SessionState,
    stats: PollStats,
    /// Stop token of the current poll task; cancelled once it stops.
    poll_stop: Option<CancellationToken>,
}

struct PollTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

pub(crate) struct SessionInner {
    pub(crate) config: JanusConfig,
    pub(crate) transport: Transport,
    pub(crate) registry: TransactionRegistry,
    core: Mutex<SessionCore>,
    killed: CancellationToken,
    poller: tokio::sync::Mutex<Option<PollTask>>,
}

/// Result of [`Session::watch`]: the handle dedicated to the viewer and the
/// gateway's SDP offer.
#[derive(Debug, Clone)]
pub struct Watching {
    pub handle: Handle,
    pub sdp: String,
}

/// Client for one Janus session on one gateway.
///
/// Clones share the same session. The poll task keeps the session alive
/// until [`kill`](Self::kill) is called or the retry budget runs out.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.inner.config.host)
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session talking to `config.host` over reqwest, with its own registry.
    pub fn new(config: JanusConfig) -> Result<Self, JanusError> {
        let transport = Transport::new(&config);
        Self::with_transport(config, transport, TransactionRegistry::new())
    }

    /// Session over a caller-supplied transport and registry.
    pub fn with_transport(
        config: JanusConfig,
        transport: Transport,
        registry: TransactionRegistry,
    ) -> Result<Self, JanusError> {
        config.validate().map_err(JanusError::InvalidConfig)?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                transport,
                registry,
                core: Mutex::new(SessionCore {
                    session_id: None,
                    primary: None,
                    handles: Vec::new(),
                    state: SessionState::Uninitialized,
                    stats: PollStats::default(),
                    poll_stop: None,
                }),
                killed: CancellationToken::new(),
                poller: tokio::sync::Mutex::new(None),
            }),
        })
    }

    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    pub fn config(&self) -> &JanusConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.inner.registry
    }

    pub fn session_id(&self) -> Option<JanusId> {
        self.inner.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    pub fn stats(&self) -> PollStats {
        self.inner.stats()
    }

    pub fn is_killed(&self) -> bool {
        self.inner.killed.is_cancelled()
    }

    /// Whether a poll task is running and able to deliver events.
    pub fn is_polling(&self) -> bool {
        self.inner.is_polling()
    }

    /// Handle attached by [`init`](Self::init), if attaching succeeded.
    pub fn primary_handle(&self) -> Option<Handle> {
        self.inner.core.lock().primary.clone()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.inner.core.lock().handles.clone()
    }

    /// Create the remote session, attach the primary handle and start
    /// polling for events.
    ///
    /// Never fails: errors from the remote calls are logged and polling
    /// starts regardless, so the poll loop's reinitialization can recover.
    /// Inspect [`state`](Self::state) to see how far setup got. Any poll
    /// task from an earlier `init` is stopped first.
    pub async fn init(&self) {
        if self.is_killed() {
            tracing::warn!(host = %self.host(), "init called on a killed session, ignoring");
            return;
        }

        let mut poller = self.inner.poller.lock().await;
        if let Some(previous) = poller.take() {
            previous.stop.cancel();
            if let Err(e) = previous.task.await {
                tracing::warn!(host = %self.host(), error = %e, "previous poll task panicked");
            }
            // A panicked task never reached its own cleanup.
            self.inner.registry.clear();
        }

        self.inner.core.lock().stats = PollStats::default();
        self.inner.establish().await;

        let stop = self.inner.killed.child_token();
        self.inner.core.lock().poll_stop = Some(stop.clone());
        let task = tokio::spawn(poll_loop::run(self.inner.clone(), stop.clone()));
        *poller = Some(PollTask { stop, task });
    }

    /// Ask the poll task to stop. Does not touch the remote session.
    pub fn kill(&self) {
        tracing::info!(host = %self.host(), "killing janus session poller");
        self.inner.killed.cancel();
    }

    /// Wait for the poll task to finish. Returns at once if none is running.
    ///
    /// The task only finishes after [`kill`](Self::kill), after the remote
    /// session is destroyed, or once the retry budget is exhausted.
    pub async fn join(&self) {
        let mut poller = self.inner.poller.lock().await;
        if let Some(running) = poller.as_mut() {
            if let Err(e) = (&mut running.task).await {
                tracing::warn!(host = %self.host(), error = %e, "poll task panicked");
            }
        }
        *poller = None;
    }

    /// Create a remote session, replacing any previous session id.
    pub async fn create_session(&self) -> Result<JanusId, JanusError> {
        self.inner.create_session().await
    }

    /// Attach a new streaming handle to the current session.
    pub async fn attach(&self) -> Result<Handle, JanusError> {
        self.inner.attach().await
    }

    /// Destroy the remote session and forget its handles.
    ///
    /// Also stops the poll task, so the session is not recreated behind the
    /// caller's back. Call [`init`](Self::init) to start over.
    pub async fn destroy_session(&self) -> Result<(), JanusError> {
        self.inner.destroy_session().await
    }

    /// Destroy the remote session if there is one.
    ///
    /// A session that was never created (or is already destroyed) is not an
    /// error: this logs a notice and returns without any request.
    pub async fn delete(&self) -> Result<(), JanusError> {
        if self.session_id().is_none() {
            tracing::info!(host = %self.host(), "janus session is not initiated, nothing to delete");
            return Ok(());
        }
        self.destroy_session().await
    }

    fn require_primary(&self) -> Result<Handle, JanusError> {
        self.primary_handle().ok_or(JanusError::NoHandle)
    }

    /// Create a mountpoint through the primary handle.
    pub async fn mount(&self, spec: &MountpointSpec) -> Result<Value, JanusError> {
        self.require_primary()?.create(spec).await
    }

    /// List mountpoints through the primary handle.
    pub async fn list(&self) -> Result<Vec<Value>, JanusError> {
        self.require_primary()?.list().await
    }

    /// Destroy a mountpoint through the primary handle.
    pub async fn destroy_mountpoint(&self, id: impl Into<JanusId>) -> Result<Value, JanusError> {
        self.require_primary()?.destroy(id).await
    }

    /// Attach a dedicated handle and watch mountpoint `id` on it.
    ///
    /// The handle is detached again if watching fails.
    pub async fn watch(&self, id: impl Into<JanusId>) -> Result<Watching, JanusError> {
        let handle = self.attach().await?;
        match handle.watch(id).await {
            Ok(sdp) => Ok(Watching { handle, sdp }),
            Err(e) => {
                if let Err(detach_err) = handle.detach().await {
                    tracing::debug!(handle_id = %handle.id(), error = %detach_err, "failed to detach after watch error");
                }
                Err(e)
            }
        }
    }
}

impl SessionInner {
    pub(crate) fn session_id(&self) -> Option<JanusId> {
        self.core.lock().session_id.clone()
    }

    fn stats(&self) -> PollStats {
        self.core.lock().stats
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.core
            .lock()
            .poll_stop
            .as_ref()
            .is_some_and(|stop| !stop.is_cancelled())
    }

    fn set_state(&self, state: SessionState) {
        self.core.lock().state = state;
    }

    pub(crate) fn forget_handle(&self, id: &JanusId) {
        let mut core = self.core.lock();
        core.handles.retain(|h| h.id() != id);
        if core.primary.as_ref().is_some_and(|h| h.id() == id) {
            core.primary = None;
        }
    }

    async fn create_session(&self) -> Result<JanusId, JanusError> {
        let envelope = self.transport.post("", Command::create_session()).await?;
        envelope
            .ensure("create", Expect::Success, self.config.status_check)
            .inspect_err(|e| {
                tracing::error!(host = %self.config.host, error = %e, "failed to create janus session");
            })?;
        let created: SessionCreated = envelope.data_as("create")?;

        let mut core = self.core.lock();
        core.session_id = Some(created.id.clone());
        core.primary = None;
        core.handles.clear();
        core.state = SessionState::SessionCreated;
        tracing::info!(host = %self.config.host, session_id = %created.id, "janus session created");
        Ok(created.id)
    }

    async fn attach(self: &Arc<Self>) -> Result<Handle, JanusError> {
        let session_id = self.session_id().ok_or(JanusError::NotInitialized)?;
        let envelope = self
            .transport
            .post(&format!("{session_id}/"), Command::attach(STREAMING_PLUGIN))
            .await?;
        envelope
            .ensure("attach", Expect::Success, self.config.status_check)
            .inspect_err(|e| {
                tracing::error!(host = %self.config.host, session_id = %session_id, error = %e, "failed to attach streaming handle");
            })?;
        let attached: Attached = envelope.data_as("attach")?;

        let handle = Handle::new(attached.id, Arc::downgrade(self));
        self.core.lock().handles.push(handle.clone());
        tracing::debug!(session_id = %session_id, handle_id = %handle.id(), "streaming handle attached");
        Ok(handle)
    }

    /// Session creation plus primary attach. Failures are logged, not returned.
    async fn establish(self: &Arc<Self>) {
        if let Err(e) = self.create_session().await {
            tracing::error!(host = %self.config.host, error = %e, "janus unavailable, session not created");
            return;
        }
        match self.attach().await {
            Ok(handle) => {
                let mut core = self.core.lock();
                core.primary = Some(handle);
                core.state = SessionState::HandleAttached;
            }
            Err(e) => {
                tracing::error!(host = %self.config.host, error = %e, "janus handle not attached");
            }
        }
    }

    async fn destroy_session(&self) -> Result<(), JanusError> {
        let session_id = self.session_id().ok_or(JanusError::NotInitialized)?;
        let envelope = self
            .transport
            .post(&format!("{session_id}/"), Command::destroy_session())
            .await?;
        envelope
            .ensure("destroy", Expect::Success, self.config.status_check)
            .inspect_err(|e| {
                tracing::error!(host = %self.config.host, session_id = %session_id, error = %e, "failed to destroy janus session");
            })?;

        let mut core = self.core.lock();
        if core.session_id.as_ref() == Some(&session_id) {
            core.session_id = None;
            core.primary = None;
            core.handles.clear();
            core.state = SessionState::Uninitialized;
            if let Some(stop) = core.poll_stop.take() {
                stop.cancel();
            }
        }
        tracing::info!(host = %self.config.host, session_id = %session_id, "janus session destroyed");
        Ok(())
    }
}
