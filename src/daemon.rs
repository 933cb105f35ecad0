//! Connectivity loop
//!
//! Each tick probes the internet, logs back in through the portal when the
//! probe fails, and periodically checks the account's traffic against the
//! alert threshold. Only two timestamps survive between ticks.

use crate::config::Config;
use crate::models::StatusRecord;
use crate::notify::Notifier;
use crate::portal::PortalApi;
use crate::probe::Reachability;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Time the portal needs to open the NAT rule after accepting a login
const SETTLE_DELAY: Duration = Duration::from_secs(1);
const STATUS_INTERVAL: Duration = Duration::from_secs(10 * 60);
const ALERT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub interval: Duration,
    pub settle_delay: Duration,
    pub status_interval: Duration,
    pub alert_cooldown: Duration,
    /// GB; zero or negative disables traffic alerts
    pub traffic_threshold: f64,
    pub alerts_enabled: bool,
}

impl DaemonSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: cfg.check_interval(),
            settle_delay: SETTLE_DELAY,
            status_interval: STATUS_INTERVAL,
            alert_cooldown: ALERT_COOLDOWN,
            traffic_threshold: cfg.alert.traffic_threshold,
            alerts_enabled: !cfg.alert.webhook_url.trim().is_empty(),
        }
    }
}

/// State carried across ticks. `None` means "never", so the first tick
/// always logs status and may alert.
#[derive(Debug, Default, Clone)]
pub struct DaemonState {
    pub last_alert: Option<Instant>,
    pub last_status_log: Option<Instant>,
}

impl DaemonState {
    fn status_due(&self, now: Instant, every: Duration) -> bool {
        elapsed_more_than(self.last_status_log, now, every)
    }

    fn alert_due(&self, now: Instant, cooldown: Duration) -> bool {
        elapsed_more_than(self.last_alert, now, cooldown)
    }
}

fn elapsed_more_than(since: Option<Instant>, now: Instant, window: Duration) -> bool {
    since.map_or(true, |t| now.saturating_duration_since(t) > window)
}

/// What the reconnection half of a tick concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Internet was reachable, nothing to do
    Online,
    /// Logged in and confirmed reachable
    Reconnected,
    /// Portal accepted the login but traffic still does not flow
    Unusable,
    /// Portal rejected the credentials
    Rejected,
    /// Login request failed or returned garbage
    LoginFailed,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        matches!(self, Connectivity::Online | Connectivity::Reconnected)
    }
}

pub struct Daemon {
    portal: Arc<dyn PortalApi>,
    probe: Arc<dyn Reachability>,
    notifier: Arc<dyn Notifier>,
    settings: DaemonSettings,
    state: DaemonState,
}

impl Daemon {
    pub fn new(
        portal: Arc<dyn PortalApi>,
        probe: Arc<dyn Reachability>,
        notifier: Arc<dyn Notifier>,
        settings: DaemonSettings,
    ) -> Self {
        Self {
            portal,
            probe,
            notifier,
            settings,
            state: DaemonState::default(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    /// Run ticks every `interval` until `shutdown` is cancelled.
    ///
    /// Cancellation may land in the middle of a tick; the next start simply
    /// begins a fresh one.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        tracing::info!(
            "Daemon started (check interval: {}s)",
            self.settings.interval.as_secs()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.tick() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        tracing::info!("Daemon stopped");
    }

    pub async fn tick(&mut self) -> Connectivity {
        self.tick_at(Instant::now()).await
    }

    /// One iteration, with `now` as the reference time for the status and
    /// alert windows
    pub async fn tick_at(&mut self, now: Instant) -> Connectivity {
        let reachable = self.probe.check().await;
        let verdict = if reachable {
            Connectivity::Online
        } else {
            self.reconnect().await
        };

        // Outages always record status so the log shows the account state
        if !reachable || self.state.status_due(now, self.settings.status_interval) {
            self.check_traffic(now, verdict.is_online()).await;
        }

        verdict
    }

    async fn reconnect(&self) -> Connectivity {
        tracing::warn!("Network unreachable, attempting portal login...");

        let outcome = match self.portal.login().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Login request failed: {}", e);
                return Connectivity::LoginFailed;
            }
        };

        if !outcome.is_connected() {
            tracing::error!(
                "Login failed: {} (result: {}, ret_code: {:?})",
                outcome.msg,
                outcome.result,
                outcome.ret_code
            );
            return Connectivity::Rejected;
        }

        tracing::info!("Portal accepted login: {}", outcome.msg);
        tokio::time::sleep(self.settings.settle_delay).await;

        if !self.probe.check().await {
            tracing::warn!("Portal reports success but the internet is still unreachable");
            return Connectivity::Unusable;
        }

        tracing::info!("Reconnected");
        self.notify(&format!("Network reconnected: {}", outcome.msg))
            .await;
        Connectivity::Reconnected
    }

    async fn check_traffic(&mut self, now: Instant, online: bool) {
        let record = match self.portal.status().await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Status check failed: {}", e);
                return;
            }
        };

        if online {
            log_status(&record);
        }
        self.state.last_status_log = Some(now);

        let flow_gb = record.flow_gb();
        let threshold = self.settings.traffic_threshold;
        if self.settings.alerts_enabled
            && threshold > 0.0
            && flow_gb >= threshold
            && self.state.alert_due(now, self.settings.alert_cooldown)
        {
            tracing::warn!("Traffic {:.2} GB reached threshold {:.2} GB", flow_gb, threshold);
            self.notify(&format!(
                "Traffic warning: {:.2} GB used, threshold is {:.2} GB",
                flow_gb, threshold
            ))
            .await;
            self.state.last_alert = Some(now);
        }
    }

    async fn notify(&self, message: &str) {
        if let Err(e) = self.notifier.send(message).await {
            tracing::warn!("Webhook delivery failed: {}", e);
        }
    }
}

fn log_status(record: &StatusRecord) {
    tracing::info!(
        "Status: {} used {:.2} GB, balance {:.2}",
        record.username,
        record.flow_gb(),
        record.balance
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NotifyError, PortalError};
    use crate::models::{LoginOutcome, ResultCode};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type LoginFn = Box<dyn Fn() -> Result<LoginOutcome, PortalError> + Send + Sync>;
    type StatusFn = Box<dyn Fn() -> Result<StatusRecord, PortalError> + Send + Sync>;

    struct FakePortal {
        login: LoginFn,
        status: StatusFn,
        login_calls: AtomicUsize,
        status_calls: AtomicUsize,
    }

    impl FakePortal {
        fn new(login: LoginFn, flow_gb: f64) -> Arc<Self> {
            Arc::new(Self {
                login,
                status: Box::new(move || Ok(record(flow_gb))),
                login_calls: AtomicUsize::new(0),
                status_calls: AtomicUsize::new(0),
            })
        }

        fn with_status(login: LoginFn, status: StatusFn) -> Arc<Self> {
            Arc::new(Self {
                login,
                status,
                login_calls: AtomicUsize::new(0),
                status_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PortalApi for FakePortal {
        async fn login(&self) -> Result<LoginOutcome, PortalError> {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            (self.login)()
        }

        async fn logout(&self) -> Result<(), PortalError> {
            Ok(())
        }

        async fn status(&self) -> Result<StatusRecord, PortalError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            (self.status)()
        }
    }

    /// Answers from a script, repeating the last answer once exhausted
    struct FakeProbe {
        answers: Mutex<VecDeque<bool>>,
        last: Mutex<bool>,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(answers: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                last: Mutex::new(false),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Reachability for FakeProbe {
        async fn check(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.answers.lock().unwrap().pop_front() {
                *last = next;
            }
            *last
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn send(&self, message: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    impl FakeNotifier {
        fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    /// Counts attempts and refuses every delivery
    #[derive(Default)]
    struct FailingNotifier {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _message: &str) -> Result<(), NotifyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR))
        }
    }

    fn record(flow_gb: f64) -> StatusRecord {
        StatusRecord {
            username: "alice".to_string(),
            flow_mb: flow_gb * 1024.0,
            balance: 10.0,
            used_minutes: None,
        }
    }

    fn outcome(result: ResultCode, msg: &str) -> LoginOutcome {
        LoginOutcome {
            result,
            msg: msg.to_string(),
            ret_code: None,
        }
    }

    fn login_ok() -> LoginFn {
        Box::new(|| Ok(outcome(ResultCode::Number(1), "认证成功")))
    }

    fn settings() -> DaemonSettings {
        DaemonSettings {
            interval: Duration::from_millis(10),
            settle_delay: Duration::ZERO,
            status_interval: STATUS_INTERVAL,
            alert_cooldown: ALERT_COOLDOWN,
            traffic_threshold: 80.0,
            alerts_enabled: true,
        }
    }

    fn daemon(
        portal: &Arc<FakePortal>,
        probe: &Arc<FakeProbe>,
        notifier: &Arc<FakeNotifier>,
    ) -> Daemon {
        Daemon::new(portal.clone(), probe.clone(), notifier.clone(), settings())
    }

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[tokio::test]
    async fn test_online_skips_login() {
        let portal = FakePortal::new(login_ok(), 10.0);
        let probe = FakeProbe::new(&[true]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        let now = Instant::now();
        assert_eq!(d.tick_at(now).await, Connectivity::Online);
        assert_eq!(portal.login_calls.load(Ordering::SeqCst), 0);
        assert_eq!(portal.status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(d.state().last_status_log, Some(now));
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_confirmed() {
        let portal = FakePortal::new(login_ok(), 10.0);
        let probe = FakeProbe::new(&[false, true]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        assert_eq!(d.tick_at(Instant::now()).await, Connectivity::Reconnected);
        assert_eq!(portal.login_calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("认证成功"));
    }

    #[tokio::test]
    async fn test_login_accepted_but_unreachable() {
        let portal = FakePortal::new(login_ok(), 10.0);
        let probe = FakeProbe::new(&[false, false]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        assert_eq!(d.tick_at(Instant::now()).await, Connectivity::Unusable);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_already_online_counts_as_connected() {
        let login: LoginFn = Box::new(|| {
            Ok(outcome(
                ResultCode::Text("0".to_string()),
                "IP: 10.1.2.3 已经在线！",
            ))
        });
        let portal = FakePortal::new(login, 10.0);
        let probe = FakeProbe::new(&[false, true]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        assert_eq!(d.tick_at(Instant::now()).await, Connectivity::Reconnected);
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let login: LoginFn = Box::new(|| Ok(outcome(ResultCode::Number(0), "密码错误")));
        let portal = FakePortal::new(login, 10.0);
        let probe = FakeProbe::new(&[false]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        assert_eq!(d.tick_at(Instant::now()).await, Connectivity::Rejected);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_login_transport_failure() {
        let login: LoginFn = Box::new(|| {
            Err(PortalError::Protocol {
                reason: "expected value".to_string(),
                body: "<html>".to_string(),
            })
        });
        let portal = FakePortal::new(login, 10.0);
        let probe = FakeProbe::new(&[false]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        assert_eq!(d.tick_at(Instant::now()).await, Connectivity::LoginFailed);
        assert_eq!(portal.login_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_cadence_when_online() {
        let portal = FakePortal::new(login_ok(), 10.0);
        let probe = FakeProbe::new(&[true]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        let t0 = Instant::now();
        d.tick_at(t0).await;
        d.tick_at(t0 + minutes(1)).await;
        d.tick_at(t0 + minutes(10)).await;
        assert_eq!(portal.status_calls.load(Ordering::SeqCst), 1);

        d.tick_at(t0 + minutes(11)).await;
        assert_eq!(portal.status_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_outage_always_checks_status() {
        let login: LoginFn = Box::new(|| Ok(outcome(ResultCode::Number(0), "denied")));
        let portal = FakePortal::new(login, 10.0);
        let probe = FakeProbe::new(&[false]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        let t0 = Instant::now();
        d.tick_at(t0).await;
        d.tick_at(t0 + minutes(1)).await;
        d.tick_at(t0 + minutes(2)).await;
        assert_eq!(portal.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_traffic_alert_debounced() {
        let portal = FakePortal::new(login_ok(), 200.0);
        let probe = FakeProbe::new(&[true]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        let t0 = Instant::now();
        d.tick_at(t0).await;
        assert_eq!(notifier.messages().len(), 1);
        assert!(notifier.messages()[0].contains("200.00 GB"));
        assert_eq!(d.state().last_alert, Some(t0));

        // Status is re-read but the hour has not passed
        d.tick_at(t0 + minutes(30)).await;
        d.tick_at(t0 + minutes(55)).await;
        assert_eq!(portal.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.messages().len(), 1);

        d.tick_at(t0 + minutes(66)).await;
        assert_eq!(notifier.messages().len(), 2);
        assert_eq!(d.state().last_alert, Some(t0 + minutes(66)));
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let portal = FakePortal::new(login_ok(), 80.0);
        let probe = FakeProbe::new(&[true]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);
        d.tick_at(Instant::now()).await;
        assert_eq!(notifier.messages().len(), 1);

        let portal = FakePortal::new(login_ok(), 79.99);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);
        d.tick_at(Instant::now()).await;
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_no_traffic_alert_without_webhook() {
        let portal = FakePortal::new(login_ok(), 200.0);
        let probe = FakeProbe::new(&[true]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut s = settings();
        s.alerts_enabled = false;
        let mut d = Daemon::new(portal.clone(), probe.clone(), notifier.clone(), s);

        d.tick_at(Instant::now()).await;
        assert!(notifier.messages().is_empty());
        assert_eq!(d.state().last_alert, None);
    }

    #[tokio::test]
    async fn test_status_error_is_skipped() {
        let status: StatusFn = Box::new(|| Err(PortalError::EmptyStatus));
        let portal = FakePortal::with_status(login_ok(), status);
        let probe = FakeProbe::new(&[true]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        let t0 = Instant::now();
        d.tick_at(t0).await;
        assert_eq!(d.state().last_status_log, None);

        // Not recorded, so the next tick tries again
        d.tick_at(t0 + minutes(1)).await;
        assert_eq!(portal.status_calls.load(Ordering::SeqCst), 2);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let portal = FakePortal::new(login_ok(), 10.0);
        let probe = FakeProbe::new(&[true]);
        let notifier = Arc::new(FakeNotifier::default());
        let mut d = daemon(&portal, &probe, &notifier);

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), d.run(shutdown))
            .await
            .expect("daemon should stop after cancellation");
        assert!(probe.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_webhook_failure_does_not_disturb_loop() {
        let portal = FakePortal::new(login_ok(), 200.0);
        let probe = FakeProbe::new(&[false, true]);
        let notifier = Arc::new(FailingNotifier::default());
        let mut d = Daemon::new(portal.clone(), probe.clone(), notifier.clone(), settings());

        // Reconnect notice and traffic alert both fail to deliver
        let t0 = Instant::now();
        assert_eq!(d.tick_at(t0).await, Connectivity::Reconnected);
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(d.state().last_alert, Some(t0));
        assert_eq!(d.state().last_status_log, Some(t0));

        // Still debounced after the failed delivery
        assert_eq!(d.tick_at(t0 + minutes(11)).await, Connectivity::Online);
        assert_eq!(portal.status_calls.load(Ordering::SeqCst), 2);
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 2);

        assert_eq!(d.tick_at(t0 + minutes(62)).await, Connectivity::Online);
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(d.state().last_alert, Some(t0 + minutes(62)));
    }

    #[test]
    fn test_windows_are_strict() {
        let t0 = Instant::now();
        assert!(elapsed_more_than(None, t0, ALERT_COOLDOWN));
        assert!(!elapsed_more_than(Some(t0), t0 + ALERT_COOLDOWN, ALERT_COOLDOWN));
        assert!(elapsed_more_than(
            Some(t0),
            t0 + ALERT_COOLDOWN + Duration::from_secs(1),
            ALERT_COOLDOWN
        ));
    }

    #[test]
    fn test_settings_from_config() {
        let mut cfg = Config::default();
        let s = DaemonSettings::from_config(&cfg);
        assert_eq!(s.interval, Duration::from_secs(60));
        assert_eq!(s.traffic_threshold, 80.0);
        assert!(!s.alerts_enabled);

        cfg.alert.webhook_url = "https://hooks.example/x".to_string();
        assert!(DaemonSettings::from_config(&cfg).alerts_enabled);
    }
}
