use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use courier_common::internal;

use crate::{CommunicationStatus, DeliveryStatus, RecordFilter, RecordStore};

/// Delivery-status projection derived from the record store.
///
/// Each refresh re-reads every queue record linked to the communication and
/// stores the aggregate.
#[derive(Debug, Clone)]
pub struct ProjectedCommunications {
    store: Arc<dyn RecordStore>,
    statuses: Arc<RwLock<HashMap<String, DeliveryStatus>>>,
}

impl ProjectedCommunications {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            statuses: Arc::default(),
        }
    }

    #[must_use]
    pub fn delivery_status(&self, communication: &str) -> Option<DeliveryStatus> {
        self.statuses
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(communication)
            .copied()
    }
}

#[async_trait]
impl CommunicationStatus for ProjectedCommunications {
    async fn refresh_delivery_status(&self, communication: &str, _commit: bool) -> crate::Result<()> {
        let records = self
            .store
            .list(&RecordFilter::new().for_communication(communication), None)
            .await?;

        let aggregate = DeliveryStatus::aggregate(records.iter().map(|r| r.status));

        let mut statuses = self.statuses.write()?;
        match aggregate {
            Some(status) => {
                internal!(
                    level = DEBUG,
                    "Communication {communication} delivery status is now {status:?}"
                );
                statuses.insert(communication.to_string(), status);
            }
            None => {
                statuses.remove(communication);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use courier_common::{NewQueueRecord, QueueRecord, QueueStatus};

    use super::*;
    use crate::{FieldUpdate, MemoryRecordStore};

    #[tokio::test]
    async fn test_refresh_tracks_linked_records() {
        let store = Arc::new(MemoryRecordStore::new());
        let communications = ProjectedCommunications::new(store.clone());

        let mut ids = Vec::new();
        for recipient in ["a@x.com", "b@x.com"] {
            let record = QueueRecord::new(NewQueueRecord {
                recipients: vec![recipient.to_string()],
                communication: Some("COMM-1".to_string()),
                ..Default::default()
            })
            .expect("record");
            store.insert(&record).await.expect("insert");
            ids.push(record.id);
        }

        communications
            .refresh_delivery_status("COMM-1", true)
            .await
            .expect("refresh");
        assert_eq!(
            communications.delivery_status("COMM-1"),
            Some(DeliveryStatus::Sending)
        );

        for id in &ids {
            store
                .set_fields(id, &FieldUpdate::status(QueueStatus::Sent), true)
                .await
                .expect("set");
        }
        communications
            .refresh_delivery_status("COMM-1", true)
            .await
            .expect("refresh");
        assert_eq!(
            communications.delivery_status("COMM-1"),
            Some(DeliveryStatus::Sent)
        );

        communications
            .refresh_delivery_status("COMM-unknown", true)
            .await
            .expect("refresh");
        assert_eq!(communications.delivery_status("COMM-unknown"), None);
    }
}
