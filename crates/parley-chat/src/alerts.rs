//! Failure reports for support staff and "no reply" alerts for agents.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parley_core::types::Unit;
use tracing::warn;

use crate::phone::{jid_to_display, parse_agents};
use crate::ports::Outbound;

/// Cut `s` to at most `max` characters, marking the cut with `…`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// One-line digest of a batch: `T1="hola" | IMG2:menu`.
pub fn summarize_units(units: &[Unit]) -> String {
    units
        .iter()
        .enumerate()
        .map(|(i, unit)| match unit {
            Unit::Text { text } => format!("T{}=\"{}\"", i + 1, truncate(text, 120)),
            Unit::Image { caption, .. } => {
                let caption = truncate(caption, 80);
                if caption.is_empty() {
                    format!("IMG{}", i + 1)
                } else {
                    format!("IMG{}:{}", i + 1, caption)
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn user_line(user: &str, display_name: Option<&str>) -> String {
    match display_name {
        Some(name) if !name.is_empty() => format!("User: {} ({})", name, user),
        _ => format!("User: {}", user),
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Details of an assistant run that ended without a reply.
#[derive(Debug, Clone)]
pub struct RunFailure<'a> {
    pub user: &'a str,
    pub display_name: Option<&'a str>,
    pub thread_id: Option<&'a str>,
    pub run_id: Option<&'a str>,
    pub run_status: &'a str,
    pub run_error: Option<&'a str>,
    pub units: &'a [Unit],
}

/// Support report for a run that ended without a reply.
pub fn run_failure_report(failure: &RunFailure<'_>) -> String {
    let batch = summarize_units(failure.units);
    [
        "🚨 Assistant did not reply".to_string(),
        user_line(failure.user, failure.display_name),
        format!("Run status: {}", failure.run_status),
        format!("Error: {}", failure.run_error.unwrap_or("n/a")),
        format!(
            "Thread: {} | Run: {}",
            failure.thread_id.unwrap_or("n/a"),
            failure.run_id.unwrap_or("n/a")
        ),
        format!("Batch: {}", if batch.is_empty() { "n/a" } else { batch.as_str() }),
        format!("Date: {}", timestamp()),
    ]
    .join("\n")
}

/// Support report for an infrastructure error in the message pipeline.
pub fn infra_error_report(
    title: &str,
    phase: &str,
    user: &str,
    display_name: Option<&str>,
    error: &dyn std::fmt::Display,
) -> String {
    [
        title.to_string(),
        user_line(user, display_name),
        format!("Phase: {}", phase),
        format!("Error: {}", error),
        format!("Date: {}", timestamp()),
    ]
    .join("\n")
}

/// Fans reports and alerts out to support staff and attention agents.
///
/// Delivery is best effort: failures are logged and never returned.
pub struct Notifier {
    outbound: Arc<dyn Outbound>,
    support: Vec<String>,
    agents: Vec<String>,
}

impl Notifier {
    /// `support` and `agents` accept raw phone numbers or JIDs.
    pub fn new<S: AsRef<str>>(outbound: Arc<dyn Outbound>, support: &[S], agents: &[S]) -> Self {
        Self {
            outbound,
            support: parse_agents(support),
            agents: parse_agents(agents),
        }
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn is_agent(&self, jid: &str) -> bool {
        self.agents.iter().any(|a| a == jid)
    }

    /// Send `report` to every support recipient.
    pub async fn notify_support(&self, report: &str) {
        if report.is_empty() {
            return;
        }
        for to in &self.support {
            if let Err(e) = self.outbound.send(to, report).await {
                warn!(to = %to, error = %e, "Failed to deliver support report");
            }
        }
    }

    /// Tell every attention agent that `chat_id` got no reply.
    pub async fn alert_agents(&self, chat_id: &str) {
        let text = format!(
            "🚨 *Alert!*\nUser {} did not get a reply from the bot. Please review the conversation.",
            jid_to_display(chat_id)
        );
        for to in &self.agents {
            if let Err(e) = self.outbound.send(to, &text).await {
                warn!(to = %to, error = %e, "Failed to deliver agent alert");
            }
        }
    }
}
