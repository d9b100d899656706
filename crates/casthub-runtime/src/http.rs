//! HTTP client for third-party service polling.
//!
//! Extensions that mirror external APIs (song queues, alert feeds) poll
//! over HTTPS on their scheduler cadence. One shared client per runtime,
//! with a timeout well under the shortest poll interval so a hung request
//! cannot pile up behind the next fire.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Request timeout; polls are spaced minutes apart, so 10s is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared JSON-over-HTTPS client.
#[derive(Debug, Clone)]
pub struct PollClient {
    client: Client,
}

impl PollClient {
    /// Builds the client with the standard timeout.
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }

    /// GETs a JSON document. Non-2xx statuses are errors.
    pub async fn get_json(&self, url: &str, headers: &[(&str, &str)]) -> Result<Value> {
        debug!(url, "GET");
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// POSTs a JSON body and returns the JSON response.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<Value> {
        debug!(url, "POST");
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// DELETEs a resource, discarding the response body.
    pub async fn delete(&self, url: &str, headers: &[(&str, &str)]) -> Result<()> {
        debug!(url, "DELETE");
        let mut request = self.client.delete(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.send().await?.error_for_status()?;
        Ok(())
    }
}
