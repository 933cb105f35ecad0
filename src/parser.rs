//! JSONP unwrapping for portal responses

use crate::error::PortalError;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

fn envelope() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^[A-Za-z_$][\w$.]*\s*\((.*)\)\s*;?$").ok())
        .as_ref()
}

/// Strip a `callback(...)` or `callback(...);` envelope.
///
/// Bodies without an envelope are returned unchanged so that endpoints
/// answering plain JSON go through the same path.
pub fn unwrap_jsonp(body: &str) -> &str {
    let trimmed = body.trim();
    match envelope()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
    {
        Some(inner) => inner.as_str(),
        None => body,
    }
}

/// Unwrap and deserialize a portal response.
///
/// The error carries the raw body, which is usually an HTML page when the
/// portal is unhappy.
pub fn parse_jsonp<T: DeserializeOwned>(body: &str) -> Result<T, PortalError> {
    serde_json::from_str(unwrap_jsonp(body)).map_err(|e| PortalError::Protocol {
        reason: e.to_string(),
        body: body.to_string(),
    })
}
