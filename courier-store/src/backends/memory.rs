use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use courier_common::{QueueId, QueueRecord, QueueStatus, RecipientStatus};

use crate::{
    FieldUpdate, RecordFilter, RecordStore, StoreError,
    store::flush_order,
};

/// In-memory record store
///
/// Records live in a `HashMap` behind an `RwLock`. Every write is visible
/// immediately, so `commit` has no extra effect. Intended for tests and for
/// short-lived processes that do not need records to survive a restart.
///
/// An optional capacity bounds the number of records; inserts beyond it fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<QueueId, QueueRecord>>>,
    capacity: Option<usize>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Recovers gracefully if the lock is poisoned
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modify<F>(&self, id: &QueueId, f: F) -> crate::Result<()>
    where
        F: FnOnce(&mut QueueRecord) -> crate::Result<()>,
    {
        let mut records = self.records.write()?;
        let record = records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        f(record)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, id: &QueueId) -> crate::Result<QueueRecord> {
        self.records
            .read()?
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    async fn insert(&self, record: &QueueRecord) -> crate::Result<()> {
        let mut records = self.records.write()?;

        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }

        if let Some(cap) = self.capacity
            && records.len() >= cap
        {
            return Err(StoreError::Internal(format!(
                "Memory store capacity exceeded: {}/{cap} records",
                records.len()
            )));
        }

        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn save(&self, record: &QueueRecord) -> crate::Result<()> {
        self.modify(&record.id, |stored| {
            stored.clone_from(record);
            Ok(())
        })
    }

    async fn set_fields(
        &self,
        id: &QueueId,
        fields: &FieldUpdate,
        _commit: bool,
    ) -> crate::Result<()> {
        self.modify(id, |record| {
            fields.apply(record);
            Ok(())
        })
    }

    async fn claim_for_sending(&self, id: &QueueId) -> crate::Result<bool> {
        let mut claimed = false;
        self.modify(id, |record| {
            if record.status.is_to_be_sent() {
                record.status = QueueStatus::Sending;
                claimed = true;
            }
            Ok(())
        })?;
        Ok(claimed)
    }

    async fn set_recipient_status(
        &self,
        id: &QueueId,
        recipient: &str,
        status: RecipientStatus,
        _commit: bool,
    ) -> crate::Result<()> {
        self.modify(id, |record| {
            let row = record
                .recipients
                .iter_mut()
                .find(|r| r.address == recipient)
                .ok_or_else(|| StoreError::RecipientNotFound {
                    id: *id,
                    recipient: recipient.to_string(),
                })?;
            row.status = status;
            Ok(())
        })
    }

    async fn count(&self, filter: &RecordFilter) -> crate::Result<usize> {
        Ok(self
            .records
            .read()?
            .values()
            .filter(|r| filter.matches(r))
            .count())
    }

    async fn list(
        &self,
        filter: &RecordFilter,
        limit: Option<usize>,
    ) -> crate::Result<Vec<QueueRecord>> {
        let mut records: Vec<_> = self
            .records
            .read()?
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        records.sort_by(flush_order);
        if let Some(limit) = limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        self.records
            .write()?
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(*id))
    }
}
