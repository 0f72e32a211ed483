use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::{QueueId, QueueRecord, QueueStatus, RecipientStatus};

use crate::Result;

/// A partial update applied atomically to one queue record.
///
/// Unset fields are left untouched. `email_account` is doubly optional so
/// callers can clear the column as well as set it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldUpdate {
    pub status: Option<QueueStatus>,
    pub retry: Option<u32>,
    pub email_account: Option<Option<String>>,
}

impl FieldUpdate {
    #[must_use]
    pub fn status(status: QueueStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn with_email_account(mut self, account: Option<String>) -> Self {
        self.email_account = Some(account);
        self
    }

    /// Apply onto an in-memory copy
    pub fn apply(&self, record: &mut QueueRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(retry) = self.retry {
            record.retry = retry;
        }
        if let Some(account) = &self.email_account {
            record.email_account.clone_from(account);
        }
    }
}

/// Selection criteria for [`RecordStore::count`], [`RecordStore::list`] and
/// [`RecordStore::find_one_by`]. Every populated criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Any of these statuses; empty matches every status
    pub statuses: Vec<QueueStatus>,
    /// `send_after` unset or not later than this instant
    pub due_at: Option<DateTime<Utc>>,
    pub reference: Option<(String, String)>,
    pub communication: Option<String>,
}

impl RecordFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a batch flush should pick up at `now`
    #[must_use]
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            statuses: vec![QueueStatus::NotSent, QueueStatus::PartiallySent],
            due_at: Some(now),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: QueueStatus) -> Self {
        self.statuses.push(status);
        self
    }

    #[must_use]
    pub fn for_reference(mut self, doctype: impl Into<String>, name: impl Into<String>) -> Self {
        self.reference = Some((doctype.into(), name.into()));
        self
    }

    #[must_use]
    pub fn for_communication(mut self, communication: impl Into<String>) -> Self {
        self.communication = Some(communication.into());
        self
    }

    #[must_use]
    pub fn matches(&self, record: &QueueRecord) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }

        if let Some(now) = self.due_at
            && !record.is_due(now)
        {
            return false;
        }

        if let Some((doctype, name)) = &self.reference
            && (record.reference_doctype.as_ref() != Some(doctype)
                || record.reference_name.as_ref() != Some(name))
        {
            return false;
        }

        if let Some(communication) = &self.communication
            && record.communication.as_ref() != Some(communication)
        {
            return false;
        }

        true
    }
}

/// Flush order: highest priority first, then oldest first.
///
/// Ties fall back to the identifier so listings are stable.
#[must_use]
pub fn flush_order(a: &QueueRecord, b: &QueueRecord) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.creation.cmp(&b.creation))
        .then_with(|| a.id.cmp(&b.id))
}

/// Repository for queue records.
///
/// Implementations must make each call atomic for the record it touches.
/// `commit = true` means the change is durable before the call returns.
#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    /// Load the current committed state of a record
    async fn get(&self, id: &QueueId) -> Result<QueueRecord>;

    /// Persist a new record; fails if the identifier is taken
    async fn insert(&self, record: &QueueRecord) -> Result<()>;

    /// Replace an existing record wholesale, recipient rows included
    async fn save(&self, record: &QueueRecord) -> Result<()>;

    async fn set_fields(&self, id: &QueueId, fields: &FieldUpdate, commit: bool) -> Result<()>;

    /// Mark the record `Sending` if, and only if, it is still `NotSent` or
    /// `PartiallySent`. Committed before returning.
    ///
    /// Returns `false` when another attempt got there first or the record
    /// has already reached a different status.
    async fn claim_for_sending(&self, id: &QueueId) -> Result<bool>;

    async fn set_recipient_status(
        &self,
        id: &QueueId,
        recipient: &str,
        status: RecipientStatus,
        commit: bool,
    ) -> Result<()>;

    async fn count(&self, filter: &RecordFilter) -> Result<usize>;

    /// Matching records in [`flush_order`], at most `limit` of them
    async fn list(&self, filter: &RecordFilter, limit: Option<usize>) -> Result<Vec<QueueRecord>>;

    async fn find_one_by(&self, filter: &RecordFilter) -> Result<Option<QueueRecord>> {
        Ok(self.list(filter, Some(1)).await?.into_iter().next())
    }

    async fn delete(&self, id: &QueueId) -> Result<()>;

    /// Discard uncommitted work. Stores without transactions have nothing to do.
    async fn rollback(&self) {}
}

/// Aggregate delivery state of a communication across its queue records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Error,
}

impl DeliveryStatus {
    /// Any errored record wins, then anything still in flight.
    ///
    /// Returns `None` when there are no records.
    pub fn aggregate<I>(statuses: I) -> Option<Self>
    where
        I: IntoIterator<Item = QueueStatus>,
    {
        statuses
            .into_iter()
            .map(|status| match status {
                QueueStatus::Error | QueueStatus::PartiallyErrored => Self::Error,
                QueueStatus::Sent => Self::Sent,
                QueueStatus::NotSent | QueueStatus::Sending | QueueStatus::PartiallySent => {
                    Self::Sending
                }
            })
            .max_by_key(|status| match status {
                Self::Sent => 0,
                Self::Sending => 1,
                Self::Error => 2,
            })
    }
}

/// Keeps a communication's delivery-status projection in step with its queue records
#[async_trait]
pub trait CommunicationStatus: Send + Sync + std::fmt::Debug {
    async fn refresh_delivery_status(&self, communication: &str, commit: bool) -> Result<()>;
}
