//! HTTP transport for the Janus REST interface.
//!
//! [`Transport`] builds gateway URLs, stamps every POST with the API secret
//! and a transaction id, and decodes the answer into an [`Envelope`]. The
//! request itself goes through an [`HttpClient`], so tests and embedders can
//! swap the network layer out.

mod reqwest_client;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::config::JanusConfig;
use crate::error::{JanusError, TransportError};
use crate::protocol::{Command, Envelope};

pub use reqwest_client::ReqwestHttpClient;

const URL_SCHEME: &str = "http://";
const URL_ROUTE: &str = "/janus/";

/// Minimal JSON-over-HTTP client.
pub trait HttpClient: Send + Sync {
    /// POST `body` as JSON and decode the JSON response.
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<Value, TransportError>>;

    /// GET `url` and decode the JSON response.
    fn get_json<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Value, TransportError>>;
}

/// Source of unique transaction ids.
pub trait TransactionIds: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random UUID v4 transaction ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTransactions;

impl TransactionIds for UuidTransactions {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// `http://{host}/janus/{path}`
pub fn build_url(host: &str, path: &str) -> String {
    format!("{URL_SCHEME}{host}{URL_ROUTE}{path}")
}

#[derive(Clone)]
pub struct Transport {
    host: String,
    secret: String,
    http: Arc<dyn HttpClient>,
    ids: Arc<dyn TransactionIds>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Reqwest-backed transport for `config`.
    pub fn new(config: &JanusConfig) -> Self {
        Self::with_client(
            config,
            Arc::new(ReqwestHttpClient::with_timeout(config.request_timeout())),
            Arc::new(UuidTransactions),
        )
    }

    pub fn with_client(
        config: &JanusConfig,
        http: Arc<dyn HttpClient>,
        ids: Arc<dyn TransactionIds>,
    ) -> Self {
        Self {
            host: config.host.clone(),
            secret: config.secret.clone(),
            http,
            ids,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Fresh id from the configured source.
    pub fn new_transaction(&self) -> String {
        self.ids.next_id()
    }

    /// Stamp the command with the API secret, and with a transaction id
    /// unless the caller already chose one.
    pub fn prepare(&self, mut command: Command) -> Command {
        if command.transaction.is_none() {
            command.transaction = Some(self.new_transaction());
        }
        command.apisecret = Some(self.secret.clone());
        command
    }

    pub async fn post(&self, path: &str, command: Command) -> Result<Envelope, JanusError> {
        let command = self.prepare(command);
        let url = build_url(&self.host, path);
        let body = serde_json::to_value(&command)
            .map_err(|e| TransportError::Decode(format!("failed to encode request: {e}")))?;

        tracing::trace!(
            url = %url,
            janus = command.janus,
            transaction = command.transaction.as_deref().unwrap_or_default(),
            "POST"
        );
        let value = self.http.post_json(&url, &body).await?;
        Envelope::from_value(value)
    }

    pub async fn get(&self, path: &str) -> Result<Envelope, JanusError> {
        let url = self.get_url(path)?;
        tracing::trace!(url = %build_url(&self.host, path), "GET");
        let value = self.http.get_json(&url).await?;
        Envelope::from_value(value)
    }

    /// Long-poll URL with the secret carried as a query parameter.
    pub fn get_url(&self, path: &str) -> Result<String, TransportError> {
        let base = build_url(&self.host, path);
        let url = reqwest::Url::parse_with_params(&base, &[("apisecret", self.secret.as_str())])
            .map_err(|e| TransportError::InvalidUrl(format!("{base}: {e}")))?;
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(&'static str);

    impl TransactionIds for Fixed {
        fn next_id(&self) -> String {
            self.0.to_string()
        }
    }

    fn transport(host: &str, secret: &str) -> Transport {
        Transport::with_client(
            &JanusConfig::new(host, secret),
            Arc::new(ReqwestHttpClient::new()),
            Arc::new(Fixed("tx-fixed")),
        )
    }

    #[test]
    fn build_url_prefixes_scheme_and_route() {
        assert_eq!(build_url("10.0.0.1:8088", ""), "http://10.0.0.1:8088/janus/");
        assert_eq!(build_url("10.0.0.1:8088", "123/456"), "http://10.0.0.1:8088/janus/123/456");
    }

    #[test]
    fn prepare_injects_secret_and_transaction() {
        let t = transport("janus:8088", "s3cret");
        let cmd = t.prepare(Command::create_session());
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"janus": "create", "transaction": "tx-fixed", "apisecret": "s3cret"})
        );
    }

    #[test]
    fn prepare_keeps_caller_transaction() {
        let t = transport("janus:8088", "s3cret");
        let cmd = t.prepare(Command::message(json!({"request": "watch"})).with_transaction("mine"));
        assert_eq!(cmd.transaction.as_deref(), Some("mine"));
        assert_eq!(cmd.apisecret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn get_url_carries_encoded_secret() {
        let t = transport("janus:8088", "a b&c");
        assert_eq!(
            t.get_url("123").unwrap(),
            "http://janus:8088/janus/123?apisecret=a+b%26c"
        );
    }

    #[test]
    fn uuid_transactions_are_unique() {
        let ids = UuidTransactions;
        assert_ne!(ids.next_id(), ids.next_id());
    }
}
