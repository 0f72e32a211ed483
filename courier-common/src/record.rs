//! The persisted queue record and its recipient rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ADMINISTRATOR, Attachment, DeliverySettings, ExposeRecipients, PermissionError, QueueId,
    QueueStatus, RecipientStatus,
};

/// A single target address of a queue record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    #[serde(default)]
    pub status: RecipientStatus,
}

impl Recipient {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            status: RecipientStatus::NotSent,
        }
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.status == RecipientStatus::Sent
    }
}

/// Input for [`QueueRecord::new`]; mirrors what an upstream enqueue step hands over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewQueueRecord {
    pub sender: String,
    pub recipients: Vec<String>,
    pub message: String,
    pub priority: i32,
    pub send_after: Option<DateTime<Utc>>,
    pub reference_doctype: Option<String>,
    pub reference_name: Option<String>,
    pub communication: Option<String>,
    pub add_unsubscribe_link: bool,
    pub unsubscribe_method: Option<String>,
    pub unsubscribe_params: BTreeMap<String, String>,
    pub expose_recipients: ExposeRecipients,
    pub append_to_sent_folder: bool,
    pub show_as_cc: Option<String>,
    pub attachments: Vec<Attachment>,
    pub email_account: Option<String>,
}

/// One logical outbound email and its delivery state
#[allow(
    clippy::struct_excessive_bools,
    reason = "Record flags map one-to-one onto stored columns"
)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: QueueId,
    pub sender: String,
    /// Raw message, including headers and placeholder markers
    pub message: String,
    pub status: QueueStatus,
    pub retry: u32,
    pub priority: i32,
    pub creation: DateTime<Utc>,
    pub send_after: Option<DateTime<Utc>>,
    pub reference_doctype: Option<String>,
    pub reference_name: Option<String>,
    pub communication: Option<String>,
    pub add_unsubscribe_link: bool,
    pub unsubscribe_method: Option<String>,
    pub unsubscribe_params: BTreeMap<String, String>,
    pub expose_recipients: ExposeRecipients,
    pub append_to_sent_folder: bool,
    /// Comma-joined addresses shown as Cc
    pub show_as_cc: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Outgoing account that last delivered this record
    pub email_account: Option<String>,
    pub recipients: Vec<Recipient>,
}

impl QueueRecord {
    /// Build a fresh, unsaved record.
    ///
    /// Returns `None` when there is nobody to send to.
    #[must_use]
    pub fn new(data: NewQueueRecord) -> Option<Self> {
        if data.recipients.iter().all(|r| r.trim().is_empty()) {
            return None;
        }

        let mut record = Self {
            id: QueueId::generate(),
            sender: data.sender,
            message: data.message,
            status: QueueStatus::NotSent,
            retry: 0,
            priority: data.priority,
            creation: Utc::now(),
            send_after: data.send_after,
            reference_doctype: data.reference_doctype,
            reference_name: data.reference_name,
            communication: data.communication,
            add_unsubscribe_link: data.add_unsubscribe_link,
            unsubscribe_method: data.unsubscribe_method,
            unsubscribe_params: data.unsubscribe_params,
            expose_recipients: data.expose_recipients,
            append_to_sent_folder: data.append_to_sent_folder,
            show_as_cc: data.show_as_cc,
            attachments: data.attachments,
            email_account: data.email_account,
            recipients: Vec::new(),
        };
        record.set_recipients(data.recipients);

        Some(record)
    }

    /// Replace the recipient rows wholesale.
    ///
    /// Every row starts as `NotSent`; repeated addresses collapse to one row.
    pub fn set_recipients<I, S>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.recipients.clear();
        for address in addresses {
            let address = address.as_ref().trim();
            if address.is_empty() || self.recipients.iter().any(|r| r.address == address) {
                continue;
            }
            self.recipients.push(Recipient::new(address));
        }
    }

    /// Addresses shown as Cc
    #[must_use]
    pub fn cc(&self) -> Vec<&str> {
        self.show_as_cc
            .as_deref()
            .map(|cc| {
                cc.split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recipient rows that are not Cc
    #[must_use]
    pub fn to(&self) -> Vec<&str> {
        let cc = self.cc();
        self.recipients
            .iter()
            .map(|r| r.address.as_str())
            .filter(|a| !cc.contains(a))
            .collect()
    }

    /// Addresses already delivered, in row order
    #[must_use]
    pub fn sent_addresses(&self) -> Vec<String> {
        self.recipients
            .iter()
            .filter(|r| r.is_sent())
            .map(|r| r.address.clone())
            .collect()
    }

    /// Whether the scheduler is allowed to attempt this record right now.
    #[must_use]
    pub const fn is_eligible_to_send(&self, settings: &DeliverySettings) -> bool {
        self.status.is_to_be_sent() && !settings.emails_muted && !settings.hold_queue
    }

    /// Whether `send_after` has passed (or was never set)
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.send_after.is_none_or(|after| after <= now)
    }

    /// An unsaved copy addressed to a different set of recipients.
    ///
    /// The copy gets a new identifier and starts from a clean delivery state.
    #[must_use]
    pub fn duplicate_for_recipients<I, S>(&self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut duplicate = self.clone();
        duplicate.id = QueueId::generate();
        duplicate.status = QueueStatus::NotSent;
        duplicate.retry = 0;
        duplicate.creation = Utc::now();
        duplicate.set_recipients(addresses);
        duplicate
    }

    /// Reset an errored record for another round of automatic sending.
    ///
    /// Returns `false` and leaves the record untouched unless the status is
    /// `Error` or `PartiallyErrored`.
    pub fn reset_for_retry(&mut self) -> bool {
        if !self.status.is_retryable() {
            return false;
        }

        self.status = QueueStatus::NotSent;
        for recipient in &mut self.recipients {
            if recipient.status != RecipientStatus::Sent {
                recipient.status = RecipientStatus::NotSent;
            }
        }
        true
    }

    /// Deletion is reserved for the administrator identity.
    pub fn ensure_deletable(&self, principal: &str) -> Result<(), PermissionError> {
        if principal == ADMINISTRATOR {
            Ok(())
        } else {
            Err(PermissionError::DeleteNotAllowed {
                principal: principal.to_string(),
                required: ADMINISTRATOR,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn record(recipients: &[&str]) -> QueueRecord {
        QueueRecord::new(NewQueueRecord {
            sender: "sender@example.com".to_string(),
            recipients: recipients.iter().map(ToString::to_string).collect(),
            message: "Subject: Hi\r\n\r\nHello".to_string(),
            ..Default::default()
        })
        .expect("record with recipients")
    }

    #[test]
    fn test_new_requires_recipients() {
        assert!(QueueRecord::new(NewQueueRecord::default()).is_none());
        assert!(
            QueueRecord::new(NewQueueRecord {
                recipients: vec!["  ".to_string()],
                ..Default::default()
            })
            .is_none()
        );
    }

    #[test]
    fn test_new_record_defaults() {
        let record = record(&["a@x.com"]);
        assert_eq!(record.status, QueueStatus::NotSent);
        assert_eq!(record.retry, 0);
        assert_eq!(record.recipients, vec![Recipient::new("a@x.com")]);
    }

    #[test]
    fn test_set_recipients_collapses_duplicates() {
        let mut record = record(&["a@x.com"]);
        record.recipients[0].status = RecipientStatus::Sent;

        record.set_recipients(["b@x.com", "c@x.com", "b@x.com", " c@x.com "]);

        assert_eq!(
            record.recipients,
            vec![Recipient::new("b@x.com"), Recipient::new("c@x.com")]
        );
    }

    #[test]
    fn test_to_and_cc() {
        let mut record = record(&["a@x.com", "b@x.com", "c@x.com"]);
        record.show_as_cc = Some("c@x.com, d@x.com".to_string());

        assert_eq!(record.cc(), vec!["c@x.com", "d@x.com"]);
        assert_eq!(record.to(), vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_eligibility_respects_settings() {
        let mut record = record(&["a@x.com"]);
        let settings = DeliverySettings::default();
        assert!(record.is_eligible_to_send(&settings));

        let muted = DeliverySettings {
            emails_muted: true,
            ..Default::default()
        };
        assert!(!record.is_eligible_to_send(&muted));

        let held = DeliverySettings {
            hold_queue: true,
            ..Default::default()
        };
        assert!(!record.is_eligible_to_send(&held));

        record.status = QueueStatus::PartiallySent;
        assert!(record.is_eligible_to_send(&settings));

        record.status = QueueStatus::Sending;
        assert!(!record.is_eligible_to_send(&settings));
    }

    #[test]
    fn test_is_due() {
        let mut record = record(&["a@x.com"]);
        let now = Utc::now();
        assert!(record.is_due(now));

        record.send_after = Some(now + chrono::Duration::minutes(5));
        assert!(!record.is_due(now));
        assert!(record.is_due(now + chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_duplicate_for_recipients() {
        let mut original = record(&["a@x.com", "b@x.com"]);
        original.status = QueueStatus::PartiallyErrored;
        original.retry = 3;
        original.add_unsubscribe_link = true;
        original.recipients[0].status = RecipientStatus::Sent;

        let duplicate = original.duplicate_for_recipients(["b@x.com"]);

        assert_ne!(duplicate.id, original.id);
        assert_eq!(duplicate.sender, original.sender);
        assert_eq!(duplicate.message, original.message);
        assert!(duplicate.add_unsubscribe_link);
        assert_eq!(duplicate.status, QueueStatus::NotSent);
        assert_eq!(duplicate.retry, 0);
        assert_eq!(duplicate.recipients, vec![Recipient::new("b@x.com")]);

        // The original is untouched
        assert_eq!(original.recipients.len(), 2);
        assert_eq!(original.status, QueueStatus::PartiallyErrored);
    }

    #[test]
    fn test_reset_for_retry() {
        let mut record = record(&["a@x.com", "b@x.com"]);
        record.recipients[0].status = RecipientStatus::Sent;

        record.status = QueueStatus::Sent;
        assert!(!record.reset_for_retry());
        assert_eq!(record.status, QueueStatus::Sent);

        record.status = QueueStatus::PartiallyErrored;
        assert!(record.reset_for_retry());
        assert_eq!(record.status, QueueStatus::NotSent);
        assert_eq!(record.recipients[0].status, RecipientStatus::Sent);
        assert_eq!(record.recipients[1].status, RecipientStatus::NotSent);
    }

    #[test]
    fn test_delete_guard() {
        let record = record(&["a@x.com"]);
        assert!(record.ensure_deletable(ADMINISTRATOR).is_ok());
        assert_eq!(
            record.ensure_deletable("guest@example.com"),
            Err(PermissionError::DeleteNotAllowed {
                principal: "guest@example.com".to_string(),
                required: ADMINISTRATOR,
            })
        );
    }
}
