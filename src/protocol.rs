//! Janus HTTP wire types.
//!
//! Every request is a JSON object whose `janus` field names the command;
//! every response and long-poll event is an [`Envelope`]. Plugin payloads
//! (`body`, `plugindata.data`) are relayed as opaque `serde_json::Value`s.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::StatusCheck;
use crate::error::JanusError;

/// Plugin package the streaming handles attach to.
pub const STREAMING_PLUGIN: &str = "janus.plugin.streaming";

/// Status value of a successful synchronous response.
pub const SUCCESS: &str = "success";

/// Status value of an acknowledged asynchronous request.
pub const ACK: &str = "ack";

/// Session, handle or mountpoint identifier.
///
/// Gateways emit numeric ids by default; mountpoints may be configured with
/// string ids. Both render without quotes in URL paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JanusId {
    Number(u64),
    Text(String),
}

impl fmt::Display for JanusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for JanusId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for JanusId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for JanusId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// An outgoing request body.
///
/// `transaction` and `apisecret` are normally left empty and filled in by
/// [`Transport::post`](crate::transport::Transport::post).
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub janus: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apisecret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsep: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
}

impl Command {
    fn new(janus: &'static str) -> Self {
        Self {
            janus,
            transaction: None,
            apisecret: None,
            plugin: None,
            body: None,
            jsep: None,
            candidate: None,
        }
    }

    pub fn create_session() -> Self {
        Self::new("create")
    }

    pub fn attach(plugin: &'static str) -> Self {
        Self {
            plugin: Some(plugin),
            ..Self::new("attach")
        }
    }

    pub fn destroy_session() -> Self {
        Self::new("destroy")
    }

    pub fn detach() -> Self {
        Self::new("detach")
    }

    /// A plugin message carrying `body` verbatim.
    pub fn message(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new("message")
        }
    }

    pub fn trickle(candidate: Value) -> Self {
        Self {
            candidate: Some(candidate),
            ..Self::new("trickle")
        }
    }

    pub fn with_transaction(mut self, transaction: impl Into<String>) -> Self {
        self.transaction = Some(transaction.into());
        self
    }

    pub fn with_jsep(mut self, jsep: Option<Value>) -> Self {
        self.jsep = jsep;
        self
    }

    /// Name used in logs and errors: the plugin `request` for messages,
    /// otherwise the janus command itself.
    pub fn request_name(&self) -> String {
        self.body
            .as_ref()
            .and_then(|b| b.get("request"))
            .and_then(Value::as_str)
            .unwrap_or(self.janus)
            .to_string()
    }
}

/// Nested plugin result or event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Session description attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Core-level error object carried by `"janus": "error"` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub reason: String,
}

/// The outer structure of every response and event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub janus: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<JanusId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<JanusId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugindata: Option<PluginData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsep: Option<Jsep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Classification of an envelope's `janus` status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Success,
    Ack,
    Event,
    Keepalive,
    Error,
    /// The gateway expired the session.
    Timeout,
    /// PeerConnection / media notifications (`webrtcup`, `media`, ...).
    Notification,
    Unknown,
}

/// `data` of a successful `create` request.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreated {
    pub id: JanusId,
}

/// `data` of a successful `attach` request.
#[derive(Debug, Clone, Deserialize)]
pub struct Attached {
    pub id: JanusId,
}

/// What a request accepts as a positive synchronous answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Requests the gateway answers inline: only `success`.
    Success,
    /// Requests the plugin handles asynchronously: `success` or `ack`.
    Accepted,
}

impl Envelope {
    /// Decode an envelope from a parsed JSON document.
    pub fn from_value(value: Value) -> Result<Self, JanusError> {
        serde_json::from_value(value)
            .map_err(|e| JanusError::Malformed(format!("invalid envelope: {e}")))
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self.janus.as_str() {
            SUCCESS => EnvelopeKind::Success,
            ACK => EnvelopeKind::Ack,
            "event" => EnvelopeKind::Event,
            "keepalive" => EnvelopeKind::Keepalive,
            "error" => EnvelopeKind::Error,
            "timeout" => EnvelopeKind::Timeout,
            "webrtcup" | "media" | "slowlink" | "hangup" | "detached" | "trickle" => {
                EnvelopeKind::Notification
            }
            _ => EnvelopeKind::Unknown,
        }
    }

    /// Case-sensitive `janus == "success"`.
    pub fn is_success(&self) -> bool {
        self.janus == SUCCESS
    }

    /// Whether a long-poll answer should count against the failure budget.
    pub fn is_poll_failure(&self, check: StatusCheck) -> bool {
        match check {
            StatusCheck::Legacy => false,
            StatusCheck::Strict => matches!(
                self.kind(),
                EnvelopeKind::Error | EnvelopeKind::Timeout | EnvelopeKind::Unknown
            ),
        }
    }

    /// Check the status against what `request` expects.
    pub fn ensure(&self, request: &str, expect: Expect, check: StatusCheck) -> Result<(), JanusError> {
        if check == StatusCheck::Legacy {
            return Ok(());
        }
        let accepted = match expect {
            Expect::Success => self.is_success(),
            Expect::Accepted => self.is_success() || self.janus == ACK,
        };
        if accepted {
            Ok(())
        } else {
            Err(JanusError::Protocol {
                request: request.to_string(),
                status: self.janus.clone(),
                reason: self.error.as_ref().map(|e| e.reason.clone()),
            })
        }
    }

    /// Decode the core `data` object into `T`.
    pub fn data_as<T: DeserializeOwned>(&self, request: &str) -> Result<T, JanusError> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| JanusError::Malformed(format!("{request} response has no data")))?;
        serde_json::from_value(data)
            .map_err(|e| JanusError::Malformed(format!("{request} response data: {e}")))
    }

    /// Extract `plugindata.data`, surfacing plugin-reported errors.
    pub fn plugin_payload(&self, request: &str, check: StatusCheck) -> Result<Value, JanusError> {
        let data = self
            .plugindata
            .as_ref()
            .map(|p| p.data.clone())
            .filter(|d| !d.is_null())
            .ok_or_else(|| JanusError::Malformed(format!("{request} response has no plugindata")))?;

        if check == StatusCheck::Strict {
            if let Some(reason) = data.get("error") {
                return Err(JanusError::Plugin {
                    request: request.to_string(),
                    code: data.get("error_code").and_then(Value::as_i64),
                    reason: reason
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| reason.to_string()),
                });
            }
        }
        Ok(data)
    }

    /// `jsep.sdp`, if the event carries one.
    pub fn sdp(&self) -> Option<&str> {
        self.jsep.as_ref().and_then(|j| j.sdp.as_deref())
    }
}

/// Parameters of a streaming `create` request.
///
/// Named fields cover an RTP mountpoint; anything in `extra` is forwarded
/// verbatim so other mountpoint types and options pass through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountpointSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audiopt: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audiortpmap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audioport: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audiortcpport: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videopt: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videortpmap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videoport: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videortcpport: Option<u16>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MountpointSpec {
    /// Build the `create` message body. `type` defaults to `rtp` unless the
    /// caller set it in `extra`.
    pub fn to_body(&self) -> Result<Value, JanusError> {
        let mut body = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(JanusError::Malformed(format!(
                    "mountpoint spec serialized to {other}"
                )))
            }
            Err(e) => return Err(JanusError::Malformed(format!("mountpoint spec: {e}"))),
        };
        body.insert("request".into(), Value::from("create"));
        body.entry("type").or_insert_with(|| Value::from("rtp"));
        Ok(Value::Object(body))
    }
}
