//! Dr.COM ePortal client
//!
//! Speaks the GET + JSONP protocol under `/eportal/portal/`. Parameter names
//! and fixed values are those a browser sends from the portal's login page.

use crate::error::PortalError;
use crate::http::{build_url, HttpClient};
use crate::models::{LoginOutcome, StatusRecord, UserInfoResponse};
use crate::parser;
use crate::portal::PortalApi;
use async_trait::async_trait;
use rand::Rng;
use std::net::UdpSocket;
use std::sync::OnceLock;
use std::time::Duration;

const PORTAL_TIMEOUT: Duration = Duration::from_secs(5);
const JS_VERSION: &str = "4.2.1";
const ZERO_MAC: &str = "000000000000";
/// Public address used only to let the OS pick the outbound interface
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

/// Account prefix the portal's login page adds to `user_account`
pub const DEFAULT_ACCOUNT_PREFIX: &str = ",`,";

/// Credentials and portal location, fixed for the lifetime of a client
#[derive(Debug, Clone)]
pub struct Session {
    pub host: String,
    pub username: String,
    pub password: String,
    /// Prepended to the account on login only
    pub account_prefix: String,
}

impl Session {
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            account_prefix: DEFAULT_ACCOUNT_PREFIX.to_string(),
        }
    }

    pub fn with_account_prefix(mut self, prefix: &str) -> Self {
        self.account_prefix = prefix.to_string();
        self
    }
}

pub struct DrcomPortal {
    session: Session,
    client: HttpClient,
    local_ip: OnceLock<String>,
}

impl DrcomPortal {
    pub fn new(session: Session) -> Result<Self, PortalError> {
        Ok(Self {
            session,
            client: HttpClient::new(PORTAL_TIMEOUT)?,
            local_ip: OnceLock::new(),
        })
    }

    /// Use a fixed address instead of detecting it
    pub fn with_local_ip(self, ip: &str) -> Self {
        if !ip.is_empty() {
            let _ = self.local_ip.set(ip.to_string());
        }
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Source address the OS would use for outbound traffic.
    ///
    /// Resolved once and cached; a failed lookup returns "" and is retried
    /// on the next call.
    pub fn local_ip(&self) -> String {
        if let Some(ip) = self.local_ip.get() {
            return ip.clone();
        }
        match detect_local_ip() {
            Ok(ip) => self.local_ip.get_or_init(|| ip).clone(),
            Err(e) => {
                tracing::warn!("Failed to detect local IP: {}", e);
                String::new()
            }
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/eportal/portal/{}", self.session.host, path)
    }

    pub fn login_url(&self) -> String {
        build_url(
            &self.endpoint("login"),
            &[
                ("callback", callback_name()),
                ("login_method", "1".to_string()),
                (
                    "user_account",
                    format!("{}{}", self.session.account_prefix, self.session.username),
                ),
                ("user_password", self.session.password.clone()),
                ("wlan_user_ip", self.local_ip()),
                ("wlan_user_mac", ZERO_MAC.to_string()),
                ("jsVersion", JS_VERSION.to_string()),
                ("terminal_type", "1".to_string()),
                ("lang", "zh-cn".to_string()),
                ("v", cache_buster()),
            ],
        )
    }

    pub fn logout_url(&self) -> String {
        build_url(
            &self.endpoint("logout"),
            &[
                ("callback", callback_name()),
                ("user_account", self.session.username.clone()),
                ("wlan_user_ip", self.local_ip()),
                ("jsVersion", JS_VERSION.to_string()),
                ("v", cache_buster()),
            ],
        )
    }

    pub fn status_url(&self) -> String {
        build_url(
            &self.endpoint("custom/loadUserInfo"),
            &[
                ("callback", callback_name()),
                ("wlan_user_ip", self.local_ip()),
                ("is_login", "0".to_string()),
                ("jsVersion", JS_VERSION.to_string()),
                ("v", cache_buster()),
                ("lang", "zh".to_string()),
            ],
        )
    }

    async fn fetch(&self, url: &str) -> Result<String, PortalError> {
        tracing::debug!("GET {}", redact_password(url));
        let referer = format!("{}/", self.session.host);
        Ok(self.client.get_text(url, &referer).await?)
    }
}

#[async_trait]
impl PortalApi for DrcomPortal {
    async fn login(&self) -> Result<LoginOutcome, PortalError> {
        let body = self.fetch(&self.login_url()).await?;
        parser::parse_jsonp(&body)
    }

    async fn logout(&self) -> Result<(), PortalError> {
        let body = self.fetch(&self.logout_url()).await?;
        parser::parse_jsonp::<serde_json::Value>(&body)?;
        Ok(())
    }

    async fn status(&self) -> Result<StatusRecord, PortalError> {
        let body = self.fetch(&self.status_url()).await?;
        let resp: UserInfoResponse = parser::parse_jsonp(&body)?;
        resp.normalize(&self.session.username).ok_or_else(|| {
            tracing::debug!(
                "loadUserInfo carried no data (code: {:?}, msg: {:?})",
                resp.code,
                resp.msg
            );
            PortalError::EmptyStatus
        })
    }
}

/// Connect a UDP socket to read the chosen source address; nothing is sent
fn detect_local_ip() -> std::io::Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(ROUTE_PROBE_ADDR)?;
    Ok(socket.local_addr()?.ip().to_string())
}

fn callback_name() -> String {
    format!("dr{}", rand::thread_rng().gen_range(1000..10000))
}

fn cache_buster() -> String {
    rand::thread_rng().gen_range(0..9999).to_string()
}

fn redact_password(url: &str) -> String {
    match url.find("user_password=") {
        Some(start) => {
            let value_start = start + "user_password=".len();
            let end = url[value_start..]
                .find('&')
                .map(|i| value_start + i)
                .unwrap_or(url.len());
            format!("{}***{}", &url[..value_start], &url[end..])
        }
        None => url.to_string(),
    }
}
