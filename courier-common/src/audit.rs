//! Audit trail for queue record delivery
//!
//! Structured events emitted alongside the regular logs so operators can
//! reconstruct what happened to a record without trawling debug output.
//!
//! ## Audit Events
//!
//! - `SendAttempt`: A send session acquired its transport and started
//! - `RecipientSent`: One recipient was handed to the transport
//! - `SendFinalised`: The session committed its final status
//!
//! Addresses can be redacted via [`AuditConfig`].

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact sender addresses from audit events
    #[serde(default)]
    pub redact_sender: bool,

    /// Redact recipient addresses from audit events
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_sender: false,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Install the audit configuration; later calls are ignored
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Keep the domain, hide the local part
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if !redact {
        return email.to_string();
    }

    email
        .split_once('@')
        .map_or_else(|| "[REDACTED]".to_string(), |(_, domain)| format!("[REDACTED]@{domain}"))
}

/// Logged once per session, after the transport is open.
///
/// # Fields
/// - `queue_id`: Record identifier
/// - `sender`: Envelope sender (redacted if configured)
/// - `account`: Outgoing account used for the attempt
/// - `pending`: Recipients still to be sent
/// - `retry`: Retry count at the start of the attempt
pub fn log_send_attempt(queue_id: &str, sender: &str, account: &str, pending: usize, retry: u32) {
    let config = config();
    if !config.enabled {
        return;
    }

    let sender = redact_email(sender, config.redact_sender);

    tracing::event!(
        tracing::Level::INFO,
        event = "SendAttempt",
        queue_id = %queue_id,
        sender = %sender,
        account = %account,
        pending = pending,
        retry = retry,
        "Audit: Send attempt"
    );
}

pub fn log_recipient_sent(queue_id: &str, recipient: &str) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = redact_email(recipient, config.redact_recipients);

    tracing::event!(
        tracing::Level::INFO,
        event = "RecipientSent",
        queue_id = %queue_id,
        recipient = %recipient,
        "Audit: Recipient sent"
    );
}

/// Logged when the session commits its final status.
///
/// Failed attempts are raised at WARN with the error attached.
pub fn log_send_finalised(queue_id: &str, status: &str, retry: u32, error: Option<&str>) {
    let config = config();
    if !config.enabled {
        return;
    }

    match error {
        Some(error) => tracing::event!(
            tracing::Level::WARN,
            event = "SendFinalised",
            queue_id = %queue_id,
            status = %status,
            retry = retry,
            error = %error,
            "Audit: Send finalised with failure"
        ),
        None => tracing::event!(
            tracing::Level::INFO,
            event = "SendFinalised",
            queue_id = %queue_id,
            status = %status,
            retry = retry,
            "Audit: Send finalised"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_email() {
        assert_eq!(
            redact_email("user@example.com", true),
            "[REDACTED]@example.com"
        );
        assert_eq!(redact_email("user@example.com", false), "user@example.com");
        assert_eq!(redact_email("invalid", true), "[REDACTED]");
    }

    #[test]
    fn test_default_config() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert!(!config.redact_sender);
        assert!(!config.redact_recipients);
    }

    #[test]
    fn test_events_do_not_panic() {
        log_send_attempt("01ARZ3NDEKTSV4RRFFQ69G5FAV", "a@x.com", "default", 2, 0);
        log_recipient_sent("01ARZ3NDEKTSV4RRFFQ69G5FAV", "b@x.com");
        log_send_finalised("01ARZ3NDEKTSV4RRFFQ69G5FAV", "Sent", 0, None);
        log_send_finalised(
            "01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "Not Sent",
            1,
            Some("connection refused"),
        );
    }
}
