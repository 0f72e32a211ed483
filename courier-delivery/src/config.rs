use std::time::Duration;

use courier_smtp::Credentials;
use serde::{Deserialize, Serialize};

/// Per-command timeouts for SMTP sessions
///
/// Exceeding any of these is a transport-class failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Default: 30 seconds
    #[serde(default = "defaults::connect")]
    pub connect_secs: u64,

    /// EHLO/HELO. Default: 30 seconds
    #[serde(default = "defaults::ehlo")]
    pub ehlo_secs: u64,

    /// STARTTLS command and TLS upgrade. Default: 30 seconds
    #[serde(default = "defaults::starttls")]
    pub starttls_secs: u64,

    /// Whole AUTH exchange. Default: 30 seconds
    #[serde(default = "defaults::auth")]
    pub auth_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::mail_from")]
    pub mail_from_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "defaults::rcpt_to")]
    pub rcpt_to_secs: u64,

    /// DATA command and message transmission.
    ///
    /// Longer than the others to accommodate large messages.
    /// Default: 120 seconds
    #[serde(default = "defaults::data")]
    pub data_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "defaults::quit")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect(),
            ehlo_secs: defaults::ehlo(),
            starttls_secs: defaults::starttls(),
            auth_secs: defaults::auth(),
            mail_from_secs: defaults::mail_from(),
            rcpt_to_secs: defaults::rcpt_to(),
            data_secs: defaults::data(),
            quit_secs: defaults::quit(),
        }
    }
}

impl SmtpTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn ehlo(&self) -> Duration {
        Duration::from_secs(self.ehlo_secs)
    }

    #[must_use]
    pub const fn starttls(&self) -> Duration {
        Duration::from_secs(self.starttls_secs)
    }

    #[must_use]
    pub const fn auth(&self) -> Duration {
        Duration::from_secs(self.auth_secs)
    }

    #[must_use]
    pub const fn mail_from(&self) -> Duration {
        Duration::from_secs(self.mail_from_secs)
    }

    #[must_use]
    pub const fn rcpt_to(&self) -> Duration {
        Duration::from_secs(self.rcpt_to_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TlsMode {
    /// Plain text for the whole session
    None,
    /// Upgrade with STARTTLS; fail the session if the server cannot
    #[default]
    StartTls,
}

/// One outgoing mail account
#[allow(
    clippy::struct_excessive_bools,
    reason = "Configuration flags are intentionally bool-heavy"
)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpAccountConfig {
    pub name: String,

    /// Address this account sends as; senders matching it pick this account
    pub email: String,

    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default)]
    pub tls: TlsMode,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Fallback when nothing more specific matches
    #[serde(default)]
    pub default_outgoing: bool,

    /// Reference doctypes routed through this account
    #[serde(default)]
    pub use_for_doctypes: Vec<String>,

    /// Embed an open-tracking pixel in messages
    #[serde(default)]
    pub track_email_status: bool,

    #[serde(default)]
    pub append_to_sent_folder: bool,

    /// Skip certificate verification on STARTTLS
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl SmtpAccountConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

mod defaults {
    pub const fn connect() -> u64 {
        30
    }

    pub const fn ehlo() -> u64 {
        30
    }

    pub const fn starttls() -> u64 {
        30
    }

    pub const fn auth() -> u64 {
        30
    }

    pub const fn mail_from() -> u64 {
        30
    }

    pub const fn rcpt_to() -> u64 {
        30
    }

    pub const fn data() -> u64 {
        120 // 2 minutes
    }

    pub const fn quit() -> u64 {
        10
    }

    pub const fn port() -> u16 {
        587
    }
}
