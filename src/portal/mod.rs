//! Captive portal abstraction layer
//!
//! The daemon talks to the portal only through the `PortalApi` trait, so the
//! connectivity loop can run against any implementation (and against fakes
//! in tests).

pub mod drcom;

pub use drcom::{DrcomPortal, Session};

use crate::error::PortalError;
use crate::models::{LoginOutcome, StatusRecord};
use async_trait::async_trait;

/// Operations a captive portal client supports
#[async_trait]
pub trait PortalApi: Send + Sync {
    /// Authenticate this device
    async fn login(&self) -> Result<LoginOutcome, PortalError>;

    /// Drop the portal session. Only the response format is validated.
    async fn logout(&self) -> Result<(), PortalError>;

    /// Fetch the normalized account status
    async fn status(&self) -> Result<StatusRecord, PortalError>;
}
