//! Data models for the Dr.COM portal protocol

use serde::{Deserialize, Deserializer};

/// Message the portal returns when the device is already authenticated
pub const ALREADY_ONLINE: &str = "已经在线";

/// Treat an explicit `null` like a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A field the portal sends either as a JSON number or as a numeric string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Lenient {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl Lenient {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Lenient::Number(n) => Some(*n),
            Lenient::Text(s) => s.trim().parse().ok(),
            Lenient::Other(_) => None,
        }
    }
}

/// Result code of a login response: `1`, `"1"`, or anything else
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResultCode {
    Number(i64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        match self {
            ResultCode::Number(n) => *n == 1,
            ResultCode::Float(n) => *n == 1.0,
            ResultCode::Text(s) => s.trim() == "1",
            ResultCode::Other(_) => false,
        }
    }
}

impl Default for ResultCode {
    fn default() -> Self {
        ResultCode::Other(serde_json::Value::Null)
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCode::Number(n) => write!(f, "{}", n),
            ResultCode::Float(n) => write!(f, "{}", n),
            ResultCode::Text(s) => write!(f, "{}", s),
            ResultCode::Other(v) => write!(f, "{}", v),
        }
    }
}

/// Response from /eportal/portal/login
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginOutcome {
    #[serde(default)]
    pub result: ResultCode,

    #[serde(default, deserialize_with = "null_as_default")]
    pub msg: String,

    #[serde(default)]
    pub ret_code: Option<Lenient>,
}

impl LoginOutcome {
    /// Whether the device ended up authenticated, including the
    /// "already online" answer the portal gives on a redundant login
    pub fn is_connected(&self) -> bool {
        self.result.is_success() || self.msg.contains(ALREADY_ONLINE)
    }
}

/// Response from /eportal/portal/custom/loadUserInfo.
///
/// Deployments answer with one of two shapes: a `data` list of sessions, or
/// a single `user_info` object with string-encoded numbers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfoResponse {
    #[serde(default)]
    pub code: Option<Lenient>,

    #[serde(default)]
    pub msg: Option<String>,

    #[serde(default)]
    pub data: Option<Vec<SessionData>>,

    #[serde(default)]
    pub user_info: Option<UserInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionData {
    /// Used traffic in MB
    #[serde(rename = "USERFLOW")]
    pub user_flow: Option<Lenient>,

    #[serde(rename = "USERMONEY")]
    pub user_money: Option<Lenient>,

    /// Online time in minutes
    #[serde(rename = "USERTIME")]
    pub user_time: Option<Lenient>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_account: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_name: String,
    #[serde(default)]
    pub user_balance: Option<Lenient>,
    /// Used traffic in KB
    #[serde(default)]
    pub user_flow: Option<Lenient>,
}

/// Normalized account status
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub username: String,
    pub flow_mb: f64,
    pub balance: f64,
    pub used_minutes: Option<i64>,
}

impl StatusRecord {
    pub fn flow_gb(&self) -> f64 {
        self.flow_mb / 1024.0
    }
}

impl UserInfoResponse {
    /// Normalize whichever schema is populated, preferring the session list.
    ///
    /// `account` fills the username when the session list is used, since
    /// that schema does not carry one.
    pub fn normalize(&self, account: &str) -> Option<StatusRecord> {
        if let Some(first) = self.data.as_deref().and_then(<[SessionData]>::first) {
            let num = |v: &Option<Lenient>| v.as_ref().and_then(Lenient::as_f64);
            return Some(StatusRecord {
                username: account.to_string(),
                flow_mb: num(&first.user_flow).unwrap_or(0.0),
                balance: num(&first.user_money).unwrap_or(0.0),
                used_minutes: num(&first.user_time).map(|m| m as i64),
            });
        }

        let info = self.user_info.as_ref()?;
        let flow_kb = match &info.user_flow {
            Some(Lenient::Text(s)) if s.trim().is_empty() => return None,
            Some(flow) => flow.as_f64().unwrap_or(0.0),
            None => return None,
        };
        let username = [&info.user_name, &info.user_account]
            .into_iter()
            .find(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| account.to_string());

        Some(StatusRecord {
            username,
            flow_mb: flow_kb / 1024.0,
            balance: info
                .user_balance
                .as_ref()
                .and_then(Lenient::as_f64)
                .unwrap_or(0.0),
            used_minutes: None,
        })
    }
}
