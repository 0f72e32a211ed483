use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unclassified failures tolerated before a record becomes terminal
pub const MAX_RETRY_COUNT: u32 = 3;

/// Deployment-wide switches consulted on every send attempt.
///
/// These are threaded explicitly into the dispatcher rather than read from
/// process state, so a test can flip `dry_run` without touching globals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Configuration flags are intentionally bool-heavy"
)]
pub struct DeliverySettings {
    /// Suppress all outgoing mail
    #[serde(default)]
    pub emails_muted: bool,

    /// Keep records queued without attempting delivery
    #[serde(default)]
    pub hold_queue: bool,

    /// Render and record bookkeeping but never hand messages to a transport
    #[serde(default)]
    pub dry_run: bool,

    /// Whether the public site is served over TLS; open tracking needs it
    #[serde(default)]
    pub use_ssl: bool,

    /// Public host name used to build tracking and unsubscribe links
    #[serde(default = "defaults::site")]
    pub site: String,

    /// Default: [`MAX_RETRY_COUNT`]
    #[serde(default = "defaults::max_retry_count")]
    pub max_retry_count: u32,

    /// Hard budget for a single send attempt, in seconds.
    ///
    /// Default: 300 seconds
    #[serde(default = "defaults::job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Records sent in parallel by a batch flush.
    ///
    /// Default: 4
    #[serde(default = "defaults::max_concurrent_sends")]
    pub max_concurrent_sends: usize,

    #[serde(default = "defaults::tracking_path")]
    pub tracking_path: String,

    #[serde(default = "defaults::unsubscribe_path")]
    pub unsubscribe_path: String,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            emails_muted: false,
            hold_queue: false,
            dry_run: false,
            use_ssl: false,
            site: defaults::site(),
            max_retry_count: defaults::max_retry_count(),
            job_timeout_secs: defaults::job_timeout_secs(),
            max_concurrent_sends: defaults::max_concurrent_sends(),
            tracking_path: defaults::tracking_path(),
            unsubscribe_path: defaults::unsubscribe_path(),
        }
    }
}

impl DeliverySettings {
    #[must_use]
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Scheme-qualified base URL of the public site
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.site.trim_end_matches('/'))
    }

    /// Whether batch flushing should do anything at all
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.emails_muted || self.hold_queue
    }
}

mod defaults {
    pub fn site() -> String {
        "localhost".to_string()
    }

    pub const fn max_retry_count() -> u32 {
        super::MAX_RETRY_COUNT
    }

    pub const fn job_timeout_secs() -> u64 {
        300 // 5 minutes
    }

    pub const fn max_concurrent_sends() -> usize {
        4
    }

    pub fn tracking_path() -> String {
        "/api/email/open".to_string()
    }

    pub fn unsubscribe_path() -> String {
        "/api/email/unsubscribe".to_string()
    }
}
