//! Admin commands sent by attention agents over chat.
//!
//! Grammar (case-insensitive, optional leading `/`):
//! - `bot on` | `bot off`
//! - `user on <phone>` | `user off <phone>`
//! - `status`
//!
//! Anything else gets the help text.

use std::sync::{Arc, LazyLock};

use parley_storage::{SettingsRepository, UserRepository};
use regex::Regex;
use tracing::info;

use crate::error::ChatError;
use crate::phone::{ensure_jid_with_ve_fallback, is_user_jid, jid_to_display};
use crate::ports::Outbound;

static BOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/?\s*bot\s+(on|off)\b").expect("valid bot command regex"));

static USER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^/?\s*user\s+(on|off)\s+(.+)$").expect("valid user command regex")
});

static STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^/?\s*status\b").expect("valid status command regex"));

pub const HELP_TEXT: &str = "🛠 Commands:\n  • bot on | bot off\n  • user on <phone> | user off <phone>\n  • status";

/// A parsed admin command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Turn the bot on or off for everyone.
    Bot { enabled: bool },
    /// Mute or unmute the bot for one user. `target` is the raw argument.
    User { enabled: bool, target: String },
    Status,
    Help,
}

impl AdminCommand {
    /// Parse a message body. Returns `None` for blank text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(caps) = BOT_RE.captures(text) {
            return Some(AdminCommand::Bot {
                enabled: caps[1].eq_ignore_ascii_case("on"),
            });
        }
        if let Some(caps) = USER_RE.captures(text) {
            return Some(AdminCommand::User {
                enabled: caps[1].eq_ignore_ascii_case("on"),
                target: caps[2].trim().to_string(),
            });
        }
        if STATUS_RE.is_match(text) {
            return Some(AdminCommand::Status);
        }
        Some(AdminCommand::Help)
    }
}

/// Executes admin commands and answers the agent.
pub struct AdminHandler {
    settings: Arc<SettingsRepository>,
    users: Arc<UserRepository>,
    outbound: Arc<dyn Outbound>,
}

impl AdminHandler {
    pub fn new(
        settings: Arc<SettingsRepository>,
        users: Arc<UserRepository>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            settings,
            users,
            outbound,
        }
    }

    /// Run the command in `text` from agent `from` and send the reply.
    ///
    /// Returns the reply text, or `None` when the message was blank.
    pub async fn handle(&self, from: &str, text: &str) -> Result<Option<String>, ChatError> {
        let Some(command) = AdminCommand::parse(text) else {
            return Ok(None);
        };
        info!(from = %from, command = ?command, "Admin command");

        let reply = self.execute(&command)?;
        self.outbound.send(from, &reply).await?;
        Ok(Some(reply))
    }

    fn execute(&self, command: &AdminCommand) -> Result<String, ChatError> {
        let reply = match command {
            AdminCommand::Bot { enabled } => {
                self.settings.set_bot_active(*enabled)?;
                format!("✅ Bot {}.", if *enabled { "enabled" } else { "disabled" })
            }
            AdminCommand::User { enabled, target } => {
                match ensure_jid_with_ve_fallback(target).filter(|jid| is_user_jid(jid)) {
                    Some(jid) => {
                        self.users.set_bot_enabled(&jid, *enabled)?;
                        format!(
                            "✅ User {} {}.",
                            jid_to_display(&jid),
                            if *enabled { "enabled" } else { "disabled" }
                        )
                    }
                    None => "⚠️ Invalid number. Use formats like 0424XXXXXXX, 58XXXXXXXXXX or +58XXXXXXXXXX".to_string(),
                }
            }
            AdminCommand::Status => {
                let active = self.settings.is_bot_active()?;
                format!("ℹ️ Bot status: {}", if active { "ON" } else { "OFF" })
            }
            AdminCommand::Help => HELP_TEXT.to_string(),
        };
        Ok(reply)
    }
}
