use thiserror::Error;

/// Failure talking to the gateway over HTTP.
///
/// Never retried at the transport layer; the poll loop owns retry policy.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to decode gateway response: {0}")]
    Decode(String),

    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),
}

#[derive(Error, Debug)]
pub enum JanusError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The envelope decoded but its shape is not what the command expects.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The envelope status says the request failed.
    #[error("{request} failed with status {status:?}{}", suffix(.reason))]
    Protocol {
        request: String,
        status: String,
        reason: Option<String>,
    },

    /// The plugin answered `success` but reported an error in its payload.
    #[error("{request} rejected by plugin (code {code:?}): {reason}")]
    Plugin {
        request: String,
        code: Option<i64>,
        reason: String,
    },

    #[error("event for {request} carried no {artifact}")]
    MissingArtifact {
        request: String,
        artifact: &'static str,
    },

    #[error("no janus session has been created")]
    NotInitialized,

    #[error("no plugin handle is attached")]
    NoHandle,

    /// No poll task is running, so an asynchronous answer could never arrive.
    #[error("session is not polling for events")]
    NotPolling,

    #[error("handle outlived its session")]
    SessionGone,

    #[error("transaction already registered: {0}")]
    DuplicateTransaction(String),

    #[error("waiter for transaction {0} was dropped before an event arrived")]
    WaiterDropped(String),

    #[error("timed out after {after_ms}ms waiting for transaction {transaction}")]
    Timeout { transaction: String, after_ms: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The poll loop hit its reinitialization ceiling and tore the session down.
    #[error("gave up on session after {reinits} reinitializations")]
    ExhaustedRetries { reinits: u32 },
}

fn suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl JanusError {
    /// True when the gateway answered but refused or could not satisfy the
    /// request, as opposed to a local or network failure.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::Plugin { .. } | Self::MissingArtifact { .. }
        )
    }
}
