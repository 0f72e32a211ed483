#![allow(dead_code)]

pub mod mock_server;

use std::sync::{
    Arc, Mutex, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use courier_common::{NewQueueRecord, QueueId, QueueRecord, QueueStatus, RecipientStatus};
use courier_delivery::{
    AccountQuery, AccountResolver, ConfiguredAccounts, DeliveryAccount, DeliveryError, Dispatcher,
    DispatcherBuilder, FsBlobStore, MessageRenderer, SendError, SendOverride, SentFolder,
    SmtpAccountConfig, SmtpTimeouts, TlsMode,
};
use courier_store::{
    CommunicationStatus, FieldUpdate, MemoryRecordStore, RecordFilter, RecordStore, StoreError,
};

pub const TEMPLATE: &str = "Subject: Hello\r\n\r\nHi <!--recipient-->\r\n";

pub fn account(port: u16) -> SmtpAccountConfig {
    SmtpAccountConfig {
        name: "Relay".to_string(),
        email: "noreply@example.com".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        tls: TlsMode::None,
        credentials: None,
        default_outgoing: true,
        use_for_doctypes: Vec::new(),
        track_email_status: false,
        append_to_sent_folder: false,
        accept_invalid_certs: false,
    }
}

pub fn accounts(config: SmtpAccountConfig) -> ConfiguredAccounts {
    let timeouts = SmtpTimeouts {
        connect_secs: 5,
        ehlo_secs: 5,
        auth_secs: 5,
        mail_from_secs: 5,
        rcpt_to_secs: 5,
        data_secs: 5,
        quit_secs: 1,
        ..SmtpTimeouts::default()
    };

    ConfiguredAccounts::new(vec![config], timeouts, "courier.test")
}

pub fn renderer() -> MessageRenderer {
    MessageRenderer::new(Arc::new(FsBlobStore::new(std::env::temp_dir())))
}

pub fn dispatcher(store: Arc<dyn RecordStore>, accounts: ConfiguredAccounts) -> DispatcherBuilder {
    Dispatcher::builder(store, Arc::new(accounts), renderer())
}

pub fn new_record(recipients: &[&str]) -> NewQueueRecord {
    NewQueueRecord {
        sender: "Example <noreply@example.com>".to_string(),
        recipients: recipients.iter().map(ToString::to_string).collect(),
        message: TEMPLATE.to_string(),
        ..Default::default()
    }
}

/// Keeps every appended message
#[derive(Debug, Default)]
pub struct RecordingSentFolder {
    pub appended: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SentFolder for RecordingSentFolder {
    async fn append(&self, account: &str, message: &str) -> Result<(), DeliveryError> {
        self.appended
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((account.to_string(), message.to_string()));
        Ok(())
    }
}

/// Accepts every recipient except the ones listed
#[derive(Debug, Default)]
pub struct RejectingOverride {
    pub reject: Vec<String>,
    pub transmitted: Mutex<Vec<String>>,
    /// Removed from the registry on first use when set
    pub remove_account: Option<ConfiguredAccounts>,
}

#[async_trait]
impl SendOverride for RejectingOverride {
    async fn transmit(
        &self,
        _record: &QueueRecord,
        _sender: &str,
        recipient: &str,
        _message: &str,
    ) -> Result<(), DeliveryError> {
        if let Some(accounts) = &self.remove_account {
            accounts.remove("Relay");
        }

        if self.reject.iter().any(|r| r == recipient) {
            return Err(SendError::Override(format!("{recipient} rejected")).into());
        }

        self.transmitted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(recipient.to_string());
        Ok(())
    }
}

/// Puts the queue on hold whenever an account is resolved
#[derive(Debug)]
pub struct HoldingResolver {
    pub accounts: ConfiguredAccounts,
    pub dispatcher: OnceLock<Dispatcher>,
}

#[async_trait]
impl AccountResolver for HoldingResolver {
    async fn resolve(
        &self,
        query: AccountQuery<'_>,
    ) -> Result<Arc<dyn DeliveryAccount>, DeliveryError> {
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.update_settings(|settings| settings.hold_queue = true);
        }
        self.accounts.resolve(query).await
    }
}

/// Puts the queue on hold whenever a communication is refreshed
#[derive(Debug, Default)]
pub struct HoldingCommunications {
    pub dispatcher: OnceLock<Dispatcher>,
}

#[async_trait]
impl CommunicationStatus for HoldingCommunications {
    async fn refresh_delivery_status(
        &self,
        _communication: &str,
        _commit: bool,
    ) -> courier_store::Result<()> {
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.update_settings(|settings| settings.hold_queue = true);
        }
        Ok(())
    }
}

/// Memory store whose first write of a `Sent` status fails
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub records: MemoryRecordStore,
    pub failed: AtomicBool,
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(&self, id: &QueueId) -> courier_store::Result<QueueRecord> {
        self.records.get(id).await
    }

    async fn insert(&self, record: &QueueRecord) -> courier_store::Result<()> {
        self.records.insert(record).await
    }

    async fn save(&self, record: &QueueRecord) -> courier_store::Result<()> {
        self.records.save(record).await
    }

    async fn set_fields(
        &self,
        id: &QueueId,
        fields: &FieldUpdate,
        commit: bool,
    ) -> courier_store::Result<()> {
        if fields.status == Some(QueueStatus::Sent) && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Internal("write lost".to_string()));
        }
        self.records.set_fields(id, fields, commit).await
    }

    async fn claim_for_sending(&self, id: &QueueId) -> courier_store::Result<bool> {
        self.records.claim_for_sending(id).await
    }

    async fn set_recipient_status(
        &self,
        id: &QueueId,
        recipient: &str,
        status: RecipientStatus,
        commit: bool,
    ) -> courier_store::Result<()> {
        self.records
            .set_recipient_status(id, recipient, status, commit)
            .await
    }

    async fn count(&self, filter: &RecordFilter) -> courier_store::Result<usize> {
        self.records.count(filter).await
    }

    async fn list(
        &self,
        filter: &RecordFilter,
        limit: Option<usize>,
    ) -> courier_store::Result<Vec<QueueRecord>> {
        self.records.list(filter, limit).await
    }

    async fn delete(&self, id: &QueueId) -> courier_store::Result<()> {
        self.records.delete(id).await
    }
}
