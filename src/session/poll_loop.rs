//! Background event poller.
//!
//! One task per session. Each pass of [`poll_events`] is a loop instance; it
//! ends when the failure threshold is reached, and [`run`] either
//! reinitializes the remote session and starts a fresh instance, or gives
//! up once the reinitialization budget is spent.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{SessionInner, SessionState};
use crate::error::JanusError;
use crate::protocol::Envelope;

enum LoopExit {
    /// Stop token cancelled.
    Stopped,
    /// Too many consecutive failures.
    Escalate,
}

pub(super) async fn run(session: Arc<SessionInner>, stop: CancellationToken) {
    let host = session.config.host.clone();
    tracing::debug!(host = %host, "janus poll task started");

    loop {
        match poll_events(&session, &stop).await {
            LoopExit::Stopped => break,
            LoopExit::Escalate => {
                let max_reinits = session.config.poll.max_reinits;
                let reinits = session.stats().reinit_count;
                if reinits >= max_reinits {
                    terminate(&session, reinits).await;
                    break;
                }

                {
                    let mut core = session.core.lock();
                    if stop.is_cancelled() {
                        break;
                    }
                    core.stats.reinit_count += 1;
                    core.state = SessionState::Reinitializing;
                }
                tracing::warn!(
                    host = %host,
                    attempt = reinits + 1,
                    max_reinits,
                    "janus poll failing, reinitializing session"
                );

                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = session.establish() => {}
                }
            }
        }
    }

    if session.killed.is_cancelled() {
        session.set_state(SessionState::Killed);
    }

    // Nothing delivers events from here on.
    stop.cancel();
    let abandoned = session.registry.clear();
    if abandoned > 0 {
        tracing::debug!(host = %host, abandoned, "dropped pending transactions");
    }
    tracing::debug!(host = %host, "janus poll task stopped");
}

/// One loop instance. Starts with a clean failure counter.
async fn poll_events(session: &Arc<SessionInner>, stop: &CancellationToken) -> LoopExit {
    let policy = &session.config.poll;
    {
        let mut core = session.core.lock();
        if stop.is_cancelled() {
            return LoopExit::Stopped;
        }
        core.stats.consecutive_failures = 0;
        core.state = SessionState::Polling;
    }

    loop {
        if stop.is_cancelled() {
            return LoopExit::Stopped;
        }
        if session.stats().consecutive_failures >= policy.failure_threshold {
            return LoopExit::Escalate;
        }

        let result = tokio::select! {
            _ = stop.cancelled() => return LoopExit::Stopped,
            result = poll_once(session) => result,
        };

        match result {
            Ok(()) => {
                // Checked under the lock: a destroy cancels while holding it
                // and its state must win.
                let mut core = session.core.lock();
                if stop.is_cancelled() {
                    return LoopExit::Stopped;
                }
                core.stats.consecutive_failures = 0;
                core.stats.reinit_count = 0;
                core.state = SessionState::Polling;
            }
            Err(e) => {
                let failures = {
                    let mut core = session.core.lock();
                    if stop.is_cancelled() {
                        return LoopExit::Stopped;
                    }
                    core.stats.consecutive_failures += 1;
                    core.state = SessionState::Failing;
                    core.stats.consecutive_failures
                };
                tracing::warn!(
                    host = %session.config.host,
                    failures,
                    error = %e,
                    "janus poll failed"
                );

                tokio::select! {
                    _ = stop.cancelled() => return LoopExit::Stopped,
                    _ = tokio::time::sleep(policy.backoff()) => {}
                }
            }
        }
    }
}

async fn poll_once(session: &SessionInner) -> Result<(), JanusError> {
    let session_id = session.session_id().ok_or(JanusError::NotInitialized)?;
    let envelope = session.transport.get(&session_id.to_string()).await?;
    if envelope.is_poll_failure(session.config.status_check) {
        return Err(JanusError::Protocol {
            request: "poll".into(),
            status: envelope.janus.clone(),
            reason: envelope.error.as_ref().map(|e| e.reason.clone()),
        });
    }
    dispatch(session, envelope);
    Ok(())
}

fn dispatch(session: &SessionInner, envelope: Envelope) {
    let transaction = match (&envelope.plugindata, &envelope.transaction) {
        (Some(_), Some(t)) => t.clone(),
        _ => {
            tracing::trace!(janus = %envelope.janus, "event without plugin payload");
            return;
        }
    };
    if !session.registry.resolve(&transaction, envelope) {
        tracing::debug!(transaction = %transaction, "no waiter for event, dropped");
    }
}

/// Destroy the remote session once and leave the session terminated.
async fn terminate(session: &SessionInner, reinits: u32) {
    session.set_state(SessionState::Terminated);
    let err = JanusError::ExhaustedRetries { reinits };
    tracing::error!(host = %session.config.host, error = %err, "janus session terminated");

    if let Err(e) = session.destroy_session().await {
        tracing::warn!(host = %session.config.host, error = %e, "failed to destroy terminated session");
    }
    session.set_state(SessionState::Terminated);
}
