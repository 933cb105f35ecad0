//! HTTP client with fixed timeouts and browser-like headers
//!
//! The portal rejects requests that do not look like they come from a
//! browser, so every client carries a desktop User-Agent. Nothing here
//! retries: the daemon's polling cadence is the only retry mechanism.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Client, Response};
use std::time::Duration;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";

pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    /// Build a client whose every request is bounded by `timeout`
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { inner: client })
    }

    /// GET `url` and return the status code alone, discarding the body
    pub async fn get_status(&self, url: &str) -> reqwest::Result<reqwest::StatusCode> {
        let resp = self.inner.get(url).send().await?;
        Ok(resp.status())
    }

    /// GET `url` with a Referer header and return the body as text.
    ///
    /// The status code is not checked: the portal sometimes answers errors
    /// with an HTML page, which the caller reports as a parse failure.
    pub async fn get_text(&self, url: &str, referer: &str) -> reqwest::Result<String> {
        let mut req = self.inner.get(url);
        if let Ok(value) = HeaderValue::from_str(referer) {
            req = req.header(REFERER, value);
        }
        req.send().await?.text().await
    }

    pub async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> reqwest::Result<Response> {
        self.inner
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
    }
}

/// Append `params` to `base` as a percent-encoded query string
pub fn build_url(base: &str, params: &[(&str, String)]) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    if query.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, query)
    }
}
