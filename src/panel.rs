//! Text panel for the `status` command

use crate::models::StatusRecord;

const BAR_WIDTH: usize = 25;
const RULE: &str = "-----------------------------------";

/// Render the account status against a traffic threshold in GB.
///
/// A non-positive threshold falls back to 80 GB for display.
pub fn render(record: &StatusRecord, threshold: f64) -> String {
    let threshold = if threshold > 0.0 { threshold } else { 80.0 };
    let flow_gb = record.flow_gb();

    let tag = if flow_gb > threshold * 0.9 {
        " [DANGER]"
    } else if flow_gb > threshold * 0.7 {
        " [WARN]"
    } else {
        ""
    };

    let mut lines = vec![
        "Dr.COM status".to_string(),
        RULE.to_string(),
        format!("Account: {}", record.username),
        format!("Balance: {:.2}", record.balance),
        format!("Traffic: {:.2} GB{}", flow_gb, tag),
    ];
    if let Some(minutes) = record.used_minutes {
        lines.push(format!("Online:  {}h {:02}m", minutes / 60, minutes % 60));
    }
    lines.push(progress_bar(flow_gb, threshold));

    if flow_gb >= threshold {
        lines.push(format!("Warning: traffic limit reached (threshold {:.2} GB)", threshold));
    } else if flow_gb > threshold * 0.8 {
        lines.push(format!("Notice: traffic close to limit (threshold {:.2} GB)", threshold));
    }
    lines.push(RULE.to_string());

    lines.join("\n")
}

fn progress_bar(current: f64, total: f64) -> String {
    let ratio = (current / total).clamp(0.0, 1.0);
    let filled = (BAR_WIDTH as f64 * ratio) as usize;
    format!(
        "[{}{}] {:.0}%",
        "=".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        current / total * 100.0
    )
}
