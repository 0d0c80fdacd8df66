//! Daily refresh of the current-date line in the assistant instructions.
//!
//! The instructions carry a `Fecha actual [<weekday> <yyyy-mm-dd>]` marker so
//! the assistant knows what "today" is. [`DateStamper`] rewrites it at every
//! local midnight.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use regex::{Captures, Regex};
use tokio::sync::Notify;
use tracing::{error, info};

use crate::error::ChatError;
use crate::ports::Assistant;

static DATE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(Fecha\s*actual\s*\[)[^\]]*(\])").expect("valid date marker regex")
});

const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Past-midnight margin so the wall clock has surely rolled over on wake-up.
const MIDNIGHT_SLACK: Duration = Duration::from_secs(5);

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "lunes",
        Weekday::Tue => "martes",
        Weekday::Wed => "miércoles",
        Weekday::Thu => "jueves",
        Weekday::Fri => "viernes",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

/// Label written into the marker, e.g. `martes 2025-08-26`.
pub fn date_label(date: NaiveDate) -> String {
    format!("{} {}", weekday_name(date.weekday()), date.format("%Y-%m-%d"))
}

/// Offset east of UTC, or `None` when out of range.
pub fn fixed_offset(minutes: i32) -> Option<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
}

/// Put `label` inside every `Fecha actual [...]` marker.
///
/// Only the first marker on a line is rewritten. Line endings come back as
/// `\n`. Without any marker, a `# Fecha actual [label]` line is prepended and
/// the rest is left untouched.
pub fn replace_bracketed_date(instructions: &str, label: &str) -> String {
    let mut found = false;
    let lines: Vec<String> = instructions
        .split('\n')
        .map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if !DATE_MARKER.is_match(line) {
                return line.to_string();
            }
            found = true;
            DATE_MARKER
                .replacen(line, 1, |caps: &Captures| {
                    format!("{}{}{}", &caps[1], label, &caps[2])
                })
                .into_owned()
        })
        .collect();

    if !found {
        return format!("# Fecha actual [{}]\n{}", label, instructions);
    }
    lines.join("\n")
}

/// Time from `now` until the next midnight at `offset`.
pub fn until_next_midnight(now: DateTime<Utc>, offset: FixedOffset) -> Duration {
    let local = now.with_timezone(&offset);
    local
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(offset).single())
        .and_then(|next| (next - local).to_std().ok())
        .unwrap_or(ONE_DAY)
}

/// Rewrite the assistant's date marker with `label`.
///
/// Returns `false` when the instructions already carried that date.
pub async fn refresh_instructions(assistant: &dyn Assistant, label: &str) -> Result<bool, ChatError> {
    let before = assistant.instructions().await?;
    let after = replace_bracketed_date(&before, label);
    if after == before {
        return Ok(false);
    }
    assistant.update_instructions(&after).await?;
    Ok(true)
}

/// Background job that refreshes the date marker at every local midnight.
pub struct DateStamper {
    assistant: Arc<dyn Assistant>,
    offset: FixedOffset,
    shutdown: Arc<Notify>,
}

impl DateStamper {
    pub fn new(assistant: Arc<dyn Assistant>, offset: FixedOffset) -> Self {
        Self {
            assistant,
            offset,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Today's label at the configured offset.
    pub fn today_label(&self) -> String {
        date_label(Utc::now().with_timezone(&self.offset).date_naive())
    }

    pub async fn refresh_once(&self) -> Result<bool, ChatError> {
        let label = self.today_label();
        let changed = refresh_instructions(self.assistant.as_ref(), &label).await?;
        if changed {
            info!(label = %label, "Assistant instructions dated");
        } else {
            info!(label = %label, "Assistant instructions already current");
        }
        Ok(changed)
    }

    /// Sleep until each local midnight and refresh. Returns on shutdown.
    pub async fn run(&self) {
        info!(offset = %self.offset, "Date refresh scheduled for local midnight");
        loop {
            let delay = until_next_midnight(Utc::now(), self.offset) + MIDNIGHT_SLACK;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = self.refresh_once().await {
                        error!(error = %e, "Failed to refresh the assistant date");
                    }
                }
                _ = self.shutdown.notified() => return,
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::EchoAssistant;
    use chrono::TimeZone;

    fn caracas() -> FixedOffset {
        fixed_offset(-4 * 60).unwrap()
    }

    #[test]
    fn test_date_label() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 26).unwrap();
        assert_eq!(date_label(date), "martes 2025-08-26");
        let date = NaiveDate::from_ymd_opt(2025, 8, 27).unwrap();
        assert_eq!(date_label(date), "miércoles 2025-08-27");
    }

    #[test]
    fn test_replace_existing_marker() {
        let instructions = "Eres un asistente.\nFecha actual [lunes 2025-08-25]\nSé breve.";
        assert_eq!(
            replace_bracketed_date(instructions, "martes 2025-08-26"),
            "Eres un asistente.\nFecha actual [martes 2025-08-26]\nSé breve."
        );
    }

    #[test]
    fn test_replace_is_case_insensitive_and_mid_line() {
        let instructions = "## Contexto: fecha  ACTUAL [] (zona Caracas)";
        assert_eq!(
            replace_bracketed_date(instructions, "jueves 2025-08-28"),
            "## Contexto: fecha  ACTUAL [jueves 2025-08-28] (zona Caracas)"
        );
    }

    #[test]
    fn test_replace_every_line_but_first_marker_per_line() {
        let instructions = "Fecha actual [x] y Fecha actual [y]\r\nFecha actual [z]";
        assert_eq!(
            replace_bracketed_date(instructions, "hoy"),
            "Fecha actual [hoy] y Fecha actual [y]\nFecha actual [hoy]"
        );
    }

    #[test]
    fn test_missing_marker_is_prepended() {
        assert_eq!(
            replace_bracketed_date("Sé breve.", "lunes 2025-08-25"),
            "# Fecha actual [lunes 2025-08-25]\nSé breve."
        );
        assert_eq!(
            replace_bracketed_date("", "lunes 2025-08-25"),
            "# Fecha actual [lunes 2025-08-25]\n"
        );
    }

    #[test]
    fn test_label_with_dollar_is_literal() {
        assert_eq!(replace_bracketed_date("Fecha actual []", "$1"), "Fecha actual [$1]");
    }

    #[test]
    fn test_until_next_midnight() {
        // 2025-08-26 03:30 UTC is 23:30 on the 25th in Caracas.
        let now = Utc.with_ymd_and_hms(2025, 8, 26, 3, 30, 0).unwrap();
        assert_eq!(until_next_midnight(now, caracas()), Duration::from_secs(30 * 60));

        // 04:00 UTC is exactly midnight there; the next one is a day away.
        let now = Utc.with_ymd_and_hms(2025, 8, 26, 4, 0, 0).unwrap();
        assert_eq!(until_next_midnight(now, caracas()), ONE_DAY);
    }

    #[test]
    fn test_fixed_offset_range() {
        assert_eq!(fixed_offset(-240).unwrap().local_minus_utc(), -4 * 3600);
        assert!(fixed_offset(24 * 60).is_none());
        assert!(fixed_offset(i32::MAX).is_none());
    }

    #[tokio::test]
    async fn test_refresh_instructions_updates_once() {
        let assistant = EchoAssistant::new();
        assistant
            .update_instructions("Fecha actual [viejo]\nSé breve.")
            .await
            .unwrap();

        assert!(refresh_instructions(&assistant, "martes 2025-08-26").await.unwrap());
        assert_eq!(
            assistant.instructions().await.unwrap(),
            "Fecha actual [martes 2025-08-26]\nSé breve."
        );
        assert!(!refresh_instructions(&assistant, "martes 2025-08-26").await.unwrap());
    }

    #[tokio::test]
    async fn test_stamper_refresh_once_uses_today() {
        let assistant = Arc::new(EchoAssistant::new());
        let stamper = DateStamper::new(assistant.clone(), caracas());
        assert!(stamper.refresh_once().await.unwrap());

        let instructions = assistant.instructions().await.unwrap();
        assert_eq!(instructions, format!("# Fecha actual [{}]\n", stamper.today_label()));
    }

    #[tokio::test]
    async fn test_stamper_shutdown() {
        let stamper = DateStamper::new(Arc::new(EchoAssistant::new()), caracas());
        stamper.shutdown();
        tokio::time::timeout(Duration::from_secs(2), stamper.run())
            .await
            .expect("date stamper should stop on shutdown");
    }
}
