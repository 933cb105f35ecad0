//! Internet reachability check
//!
//! A successful portal login does not mean traffic flows yet, so the daemon
//! always confirms with a request to an outside host.

use crate::http::HttpClient;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

pub const DEFAULT_PROBE_URL: &str = "https://www.baidu.com";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait Reachability: Send + Sync {
    /// True iff the open internet answers right now
    async fn check(&self) -> bool;
}

pub struct InternetProbe {
    url: String,
    client: HttpClient,
}

impl InternetProbe {
    pub fn new(url: &str) -> reqwest::Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: HttpClient::new(PROBE_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl Reachability for InternetProbe {
    async fn check(&self) -> bool {
        match self.client.get_status(&self.url).await {
            Ok(status) => {
                tracing::debug!("Probe {} answered {}", self.url, status);
                status == StatusCode::OK
            }
            Err(e) => {
                tracing::debug!("Probe {} failed: {}", self.url, e);
                false
            }
        }
    }
}
