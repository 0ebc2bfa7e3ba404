use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{Harness, StartResponse};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::stats::{ResultRecord, RunId};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// HTTP client for the stream-tester's JSON API.
///
/// Stateless apart from the pooled connection; clone freely.
#[derive(Debug, Clone)]
pub struct HarnessClient {
    client: Client,
    base: Url,
}

impl HarnessClient {
    /// Build a client for `address` (`host:port` or a full URL).
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        let base = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let base = Url::parse(&base)
            .map_err(|e| Error::InvalidConfig(format!("harness address '{address}': {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::RemoteUnavailable)?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::InvalidConfig(format!("harness endpoint '{path}': {e}")))
    }

    fn stats_url(&self, id: &RunId) -> Result<Url> {
        let mut url = self.endpoint("stats")?;
        url.set_query(Some("latencies"));
        url.query_pairs_mut()
            .append_pair("base_manifest_id", id.as_str());
        Ok(url)
    }
}

/// Check for a 200 and decode the JSON body.
async fn decode_ok<T: DeserializeOwned>(res: reqwest::Response) -> Result<T> {
    let status = res.status();
    if status != StatusCode::OK {
        return Err(Error::RemoteRejected(format!(
            "unable to make http request: {status}"
        )));
    }
    let body = res.bytes().await.map_err(Error::RemoteUnavailable)?;
    serde_json::from_slice(&body)
        .map_err(|e| Error::MalformedResponse(format!("unable to unmarshal response body: {e}")))
}

#[async_trait]
impl Harness for HarnessClient {
    async fn start_run(&self, config: &RunConfig) -> Result<RunId> {
        let url = self.endpoint("start_streams")?;
        debug!(%url, simultaneous = config.simultaneous, "requesting stream start");

        let res = self
            .client
            .post(url)
            .json(config)
            .send()
            .await
            .map_err(Error::RemoteUnavailable)?;

        let started: StartResponse = decode_ok(res).await?;
        if !started.success {
            return Err(Error::RemoteRejected(
                "server failed to start streams".to_string(),
            ));
        }
        if started.base_manifest_id.is_empty() {
            return Err(Error::MalformedResponse(
                "start response carries no base_manifest_id".to_string(),
            ));
        }
        Ok(RunId::new(started.base_manifest_id))
    }

    async fn fetch_status(&self, id: &RunId) -> Result<ResultRecord> {
        let url = self.stats_url(id)?;
        let res = self
            .client
            .get(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(Error::RemoteUnavailable)?;
        decode_ok(res).await
    }

    async fn stop_all(&self) -> Result<()> {
        let url = self.endpoint("stop")?;
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::StopFailed(e.to_string()))?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(Error::StopFailed(status.to_string()));
        }
        Ok(())
    }
}
