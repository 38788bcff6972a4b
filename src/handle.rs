//! Streaming plugin handles.

use std::sync::{Arc, Weak};

use serde_json::{json, Value};

use crate::error::JanusError;
use crate::protocol::{Command, Envelope, Expect, JanusId, MountpointSpec};
use crate::session::SessionInner;

/// A `janus.plugin.streaming` handle attached to a [`Session`](crate::Session).
///
/// Cheap to clone. Holds only a weak reference to its session; operations on
/// a handle whose session was dropped fail with [`JanusError::SessionGone`].
#[derive(Clone)]
pub struct Handle {
    id: JanusId,
    session: Weak<SessionInner>,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Handle {
    pub(crate) fn new(id: JanusId, session: Weak<SessionInner>) -> Self {
        Self { id, session }
    }

    pub fn id(&self) -> &JanusId {
        &self.id
    }

    fn session(&self) -> Result<Arc<SessionInner>, JanusError> {
        self.session.upgrade().ok_or(JanusError::SessionGone)
    }

    fn path(&self, session: &SessionInner) -> Result<String, JanusError> {
        let session_id = session.session_id().ok_or(JanusError::NotInitialized)?;
        Ok(format!("{}/{}", session_id, self.id))
    }

    /// POST `command` to this handle and check the envelope status.
    async fn send(
        &self,
        session: &SessionInner,
        command: Command,
        expect: Expect,
    ) -> Result<Envelope, JanusError> {
        let path = self.path(session)?;
        let request = command.request_name();
        let envelope = session.transport.post(&path, command).await?;
        if let Err(e) = envelope.ensure(&request, expect, session.config.status_check) {
            tracing::error!(handle_id = %self.id, request = %request, error = %e, "janus request failed");
            return Err(e);
        }
        Ok(envelope)
    }

    fn payload(&self, session: &SessionInner, envelope: &Envelope, request: &str) -> Result<Value, JanusError> {
        envelope
            .plugin_payload(request, session.config.status_check)
            .inspect_err(|e| {
                tracing::error!(handle_id = %self.id, request, error = %e, "unusable plugin response");
            })
    }

    /// Create a mountpoint. Returns the plugin's `data` object.
    pub async fn create(&self, spec: &MountpointSpec) -> Result<Value, JanusError> {
        let session = self.session()?;
        let envelope = self
            .send(&session, Command::message(spec.to_body()?), Expect::Success)
            .await?;
        self.payload(&session, &envelope, "create")
    }

    /// Start watching mountpoint `id` and return the gateway's SDP offer.
    ///
    /// The offer arrives asynchronously on the event channel, correlated by
    /// transaction id, so the session's poll loop must be running. Fails with
    /// [`JanusError::NotPolling`] if it is not, and with
    /// [`JanusError::WaiterDropped`] if it stops before the offer arrives.
    pub async fn watch(&self, id: impl Into<JanusId>) -> Result<String, JanusError> {
        let session = self.session()?;
        // Fail before registering anything if there is no session to post to.
        self.path(&session)?;

        let id: JanusId = id.into();
        let transaction = session.transport.new_transaction();
        let waiter = session.registry.register(&transaction)?;
        // Checked after registering: a poll task stopping from here on
        // clears the registry, which fails the waiter instead of hanging it.
        if !session.is_polling() {
            tracing::warn!(handle_id = %self.id, "watch refused, session is not polling");
            return Err(JanusError::NotPolling);
        }
        let command = Command::message(json!({"request": "watch", "id": id}))
            .with_transaction(transaction.clone());
        self.send(&session, command, Expect::Accepted).await?;

        tracing::debug!(handle_id = %self.id, transaction = %transaction, "waiting for watch offer");
        let event = match session.config.watch_timeout() {
            Some(timeout) => waiter.wait_timeout(timeout).await,
            None => waiter.wait().await,
        }
        .inspect_err(|e| {
            tracing::error!(handle_id = %self.id, transaction = %transaction, error = %e, "no answer to watch");
        })?;

        if let Err(e @ JanusError::Plugin { .. }) =
            event.plugin_payload("watch", session.config.status_check)
        {
            tracing::error!(handle_id = %self.id, error = %e, "watch rejected");
            return Err(e);
        }

        match event.sdp() {
            Some(sdp) => Ok(sdp.to_string()),
            None => {
                let err = JanusError::MissingArtifact {
                    request: "watch".into(),
                    artifact: "jsep.sdp",
                };
                tracing::error!(handle_id = %self.id, transaction = %transaction, error = %err, "watch event had no offer");
                Err(err)
            }
        }
    }

    /// Start playback, passing the viewer's answer as `jsep`.
    pub async fn start(&self, jsep: Option<Value>) -> Result<Envelope, JanusError> {
        let session = self.session()?;
        let command = Command::message(json!({"request": "start"})).with_jsep(jsep);
        self.send(&session, command, Expect::Accepted).await
    }

    /// Stop the stream on this handle.
    pub async fn stop(&self) -> Result<(), JanusError> {
        let session = self.session()?;
        self.send(&session, Command::message(json!({"request": "stop"})), Expect::Accepted)
            .await
            .map(|_| ())
    }

    pub async fn hangup(&self) -> Result<(), JanusError> {
        self.stop().await
    }

    /// Send an ICE candidate (or `{"completed": true}`).
    pub async fn trickle(&self, candidate: Value) -> Result<(), JanusError> {
        let session = self.session()?;
        self.send(&session, Command::trickle(candidate), Expect::Accepted)
            .await
            .map(|_| ())
    }

    /// List the gateway's mountpoints.
    pub async fn list(&self) -> Result<Vec<Value>, JanusError> {
        let session = self.session()?;
        let envelope = self
            .send(&session, Command::message(json!({"request": "list"})), Expect::Success)
            .await?;
        let data = self.payload(&session, &envelope, "list")?;
        match data.get("list").and_then(Value::as_array) {
            Some(list) => Ok(list.clone()),
            None => {
                let err = JanusError::Malformed("list response has no list".into());
                tracing::error!(handle_id = %self.id, error = %err, "unusable plugin response");
                Err(err)
            }
        }
    }

    /// Destroy mountpoint `id`. Returns the plugin's `data` object.
    pub async fn destroy(&self, id: impl Into<JanusId>) -> Result<Value, JanusError> {
        let session = self.session()?;
        let id: JanusId = id.into();
        let command = Command::message(json!({"request": "destroy", "id": id}));
        let envelope = self.send(&session, command, Expect::Success).await?;
        self.payload(&session, &envelope, "destroy")
    }

    /// Detach from the plugin and drop this handle from its session.
    pub async fn detach(&self) -> Result<(), JanusError> {
        let session = self.session()?;
        self.send(&session, Command::detach(), Expect::Success).await?;
        session.forget_handle(&self.id);
        tracing::debug!(handle_id = %self.id, "handle detached");
        Ok(())
    }
}
