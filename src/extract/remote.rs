use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::error::{EtlError, Result};
use crate::extract::json::table_from_records;
use crate::table::Table;

/// Pause between retry attempts against a flaky remote.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Outbound HTTP port. The pipeline only ever issues GETs, so the surface
/// stays minimal; tests swap in a stub instead of a live client.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpGetResult>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Production [`RemoteClient`] backed by reqwest with a request timeout,
/// so a stalled peer cannot hang the whole batch.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpGetResult> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        Ok(HttpGetResult { status, body })
    }
}

/// Fetch a record list from a remote JSON API into a [`Table`].
///
/// Issues `GET {url}?limit={limit}` and reads the array under
/// `list_field` in the response body. Transport errors and 5xx responses
/// are retried up to `max_attempts` times total; 4xx responses fail
/// immediately since repeating the same request cannot fix them.
#[instrument(skip(client), fields(url = %url))]
pub async fn extract_remote(
    client: &dyn RemoteClient,
    url: &str,
    limit: u32,
    list_field: &str,
    max_attempts: u32,
) -> Result<Table> {
    let request_url = with_limit(url, limit);
    let attempts = max_attempts.max(1);

    let mut last_failure = String::new();
    for attempt in 1..=attempts {
        match client.get(&request_url).await {
            Ok(resp) if resp.is_success() => {
                return parse_body(&resp.body, &request_url, list_field)
            }
            Ok(resp) if resp.is_server_error() => {
                last_failure = format!("server returned status {}", resp.status);
            }
            Ok(resp) => {
                return Err(EtlError::remote(
                    &request_url,
                    format!("server returned status {}", resp.status),
                ));
            }
            Err(e) => {
                last_failure = e.to_string();
            }
        }
        if attempt < attempts {
            warn!(attempt, error = %last_failure, "remote fetch failed, retrying");
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }

    Err(EtlError::remote(
        &request_url,
        format!("giving up after {attempts} attempts: {last_failure}"),
    ))
}

fn parse_body(body: &[u8], url: &str, list_field: &str) -> Result<Table> {
    let doc: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| EtlError::parse(url, format!("response body is not JSON: {e}")))?;
    let records = doc
        .get(list_field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            EtlError::parse(url, format!("response has no '{list_field}' list field"))
        })?;
    table_from_records(records, url)
}

fn with_limit(url: &str, limit: u32) -> String {
    if url.contains('?') {
        format!("{url}&limit={limit}")
    } else {
        format!("{url}?limit={limit}")
    }
}
