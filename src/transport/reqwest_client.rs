//! [`reqwest`]-backed implementation of [`HttpClient`].

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::HttpClient;
use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }

    /// Client with a per-request timeout. Long-polls are held open by the
    /// gateway, so `timeout` must exceed its hold time.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn decode(resp: reqwest::Response) -> Result<Value, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            url: resp.url().to_string(),
        });
    }
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
}

impl HttpClient for ReqwestHttpClient {
    fn post_json<'a>(
        &'a self,
        url: &'a str,
        body: &'a Value,
    ) -> BoxFuture<'a, Result<Value, TransportError>> {
        async move {
            let resp = self.inner.post(url).json(body).send().await?;
            decode(resp).await
        }
        .boxed()
    }

    fn get_json<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Value, TransportError>> {
        async move {
            let resp = self.inner.get(url).send().await?;
            decode(resp).await
        }
        .boxed()
    }
}
