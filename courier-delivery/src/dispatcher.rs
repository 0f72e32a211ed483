//! Identifier-addressed entry points into the send pipeline.
//!
//! The [`Dispatcher`] is what a scheduler, CLI or API handler talks to. Every
//! operation loads the record fresh from the store, so invoking one twice for
//! the same record is safe.

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::Utc;
use courier_common::{
    DeliverySettings, NewQueueRecord, QueueId, QueueRecord, QueueStatus, internal,
};
use courier_store::{CommunicationStatus, RecordFilter, RecordStore};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    account::{AccountResolver, SentFolder},
    error::{DeliveryError, TransportError},
    render::MessageRenderer,
    session::{SendSession, log_failure},
    transport::{SendOverride, SentMailCapture},
};

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) communications: Option<Arc<dyn CommunicationStatus>>,
    pub(crate) resolver: Arc<dyn AccountResolver>,
    pub(crate) renderer: MessageRenderer,
    settings: RwLock<Arc<DeliverySettings>>,
    pub(crate) send_override: Option<Arc<dyn SendOverride>>,
    pub(crate) sent_folder: Option<Arc<dyn SentFolder>>,
    pub(crate) capture: SentMailCapture,
}

impl Inner {
    /// Current settings, including changes made after an attempt started
    pub(crate) fn current_settings(&self) -> Arc<DeliverySettings> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Refresh the linked communication, if any. Failures are only logged.
    pub(crate) async fn refresh_communication(&self, record: &QueueRecord) {
        let (Some(communication), Some(communications)) =
            (record.communication.as_deref(), &self.communications)
        else {
            return;
        };

        if let Err(e) = communications
            .refresh_delivery_status(communication, true)
            .await
        {
            internal!(
                level = WARN,
                "Could not refresh delivery status of {communication} for {}: {e}",
                record.id
            );
        }
    }
}

/// Outcome counts of a batch flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Final status of every record that was attempted
    pub statuses: BTreeMap<QueueStatus, usize>,
    /// Records that were no longer eligible once loaded
    pub skipped: usize,
    /// Records whose attempt could not start
    pub failed: usize,
}

impl FlushSummary {
    #[must_use]
    pub fn count(&self, status: QueueStatus) -> usize {
        self.statuses.get(&status).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn attempted(&self) -> usize {
        self.statuses.values().sum()
    }
}

#[derive(Debug)]
pub struct DispatcherBuilder {
    store: Arc<dyn RecordStore>,
    resolver: Arc<dyn AccountResolver>,
    renderer: MessageRenderer,
    settings: DeliverySettings,
    communications: Option<Arc<dyn CommunicationStatus>>,
    send_override: Option<Arc<dyn SendOverride>>,
    sent_folder: Option<Arc<dyn SentFolder>>,
    capture: SentMailCapture,
}

impl DispatcherBuilder {
    #[must_use]
    pub fn settings(mut self, settings: DeliverySettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn communications(mut self, communications: Arc<dyn CommunicationStatus>) -> Self {
        self.communications = Some(communications);
        self
    }

    /// Replace the transport call for every recipient
    #[must_use]
    pub fn send_override(mut self, send_override: Arc<dyn SendOverride>) -> Self {
        self.send_override = Some(send_override);
        self
    }

    #[must_use]
    pub fn sent_folder(mut self, sent_folder: Arc<dyn SentFolder>) -> Self {
        self.sent_folder = Some(sent_folder);
        self
    }

    /// Share a capture sink with the caller; one is created otherwise
    #[must_use]
    pub fn capture(mut self, capture: SentMailCapture) -> Self {
        self.capture = capture;
        self
    }

    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            inner: Arc::new(Inner {
                store: self.store,
                communications: self.communications,
                resolver: self.resolver,
                renderer: self.renderer,
                settings: RwLock::new(Arc::new(self.settings)),
                send_override: self.send_override,
                sent_folder: self.sent_folder,
                capture: self.capture,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    #[must_use]
    pub fn builder(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn AccountResolver>,
        renderer: MessageRenderer,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            store,
            resolver,
            renderer,
            settings: DeliverySettings::default(),
            communications: None,
            send_override: None,
            sent_folder: None,
            capture: SentMailCapture::default(),
        }
    }

    /// Snapshot of the settings.
    ///
    /// An attempt renders with the snapshot it started with, but re-reads
    /// `emails_muted` and `hold_queue` before claiming the record and again
    /// before its send loop.
    #[must_use]
    pub fn settings(&self) -> Arc<DeliverySettings> {
        self.inner.current_settings()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut DeliverySettings)) {
        let mut settings = self
            .inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(Arc::make_mut(&mut settings));
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    /// Messages rendered while running dry
    #[must_use]
    pub fn capture(&self) -> &SentMailCapture {
        &self.inner.capture
    }

    /// Persist a new record.
    ///
    /// Returns `None` without touching the store when there are no recipients.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn enqueue(&self, data: NewQueueRecord) -> Result<Option<QueueId>, DeliveryError> {
        let Some(record) = QueueRecord::new(data) else {
            internal!(level = DEBUG, "Not enqueueing a message without recipients");
            return Ok(None);
        };

        self.inner.store.insert(&record).await?;
        self.inner.refresh_communication(&record).await;
        internal!(
            level = DEBUG,
            "Enqueued {} for {} recipient(s)",
            record.id,
            record.recipients.len()
        );

        Ok(Some(record.id))
    }

    /// Drive one record through a send attempt.
    ///
    /// Returns `Ok(None)` when the record is not eligible, otherwise the
    /// status committed at the end of the attempt. Failures during the
    /// attempt are absorbed into that status; only failures before the record
    /// is marked `Sending` are returned.
    ///
    /// # Errors
    /// Store failures while loading, and account or transport failures while
    /// opening the session.
    #[tracing::instrument(level = "debug", skip_all, fields(queue_id = %id, background = background))]
    pub async fn send(
        &self,
        id: &QueueId,
        background: bool,
    ) -> Result<Option<QueueStatus>, DeliveryError> {
        let settings = self.settings();
        let record = self.inner.store.get(id).await?;

        if !record.is_eligible_to_send(&settings) {
            self.inner.store.rollback().await;
            internal!(
                level = DEBUG,
                "Skipping {id}: status {}, muted {}, held {}",
                record.status,
                settings.emails_muted,
                settings.hold_queue
            );
            return Ok(None);
        }

        let mut session =
            match SendSession::acquire(&self.inner, settings.clone(), record, background).await {
                Ok(Some(session)) => session,
                Ok(None) => return Ok(None),
                Err(e) => {
                    log_failure(id, background, &e);
                    return Err(e);
                }
            };

        let limit = settings.job_timeout();
        let outcome = tokio::time::timeout(limit, session.run())
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Timeout(format!(
                    "Send attempt exceeded the job timeout of {limit:?}"
                ))
                .into())
            });

        Ok(Some(session.finalize(outcome).await))
    }

    /// Foreground send, skipping the scheduler
    ///
    /// # Errors
    /// See [`Dispatcher::send`].
    pub async fn send_now(&self, id: &QueueId) -> Result<Option<QueueStatus>, DeliveryError> {
        self.send(id, false).await
    }

    /// Revive an errored record.
    ///
    /// Returns `false`, leaving the record untouched, unless its status is
    /// `Error` or `PartiallyErrored`.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn retry(&self, id: &QueueId) -> Result<bool, DeliveryError> {
        let mut record = self.inner.store.get(id).await?;

        if !record.reset_for_retry() {
            internal!(
                level = DEBUG,
                "Not retrying {id}: status is {}",
                record.status
            );
            return Ok(false);
        }

        self.inner.store.save(&record).await?;
        self.inner.refresh_communication(&record).await;
        Ok(true)
    }

    /// Queue a copy of a record addressed to other recipients.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn resend_to<I, S>(
        &self,
        id: &QueueId,
        recipients: I,
    ) -> Result<Option<QueueId>, DeliveryError>
    where
        I: IntoIterator<Item = S> + Send,
        S: AsRef<str>,
    {
        let record = self.inner.store.get(id).await?;
        let duplicate = record.duplicate_for_recipients(recipients);

        if duplicate.recipients.is_empty() {
            return Ok(None);
        }

        self.inner.store.insert(&duplicate).await?;
        self.inner.refresh_communication(&duplicate).await;
        Ok(Some(duplicate.id))
    }

    /// Administrator-only removal
    ///
    /// # Errors
    /// [`DeliveryError::Permission`] for any other principal; the record is
    /// left as it was.
    pub async fn delete(&self, id: &QueueId, principal: &str) -> Result<(), DeliveryError> {
        let record = self.inner.store.get(id).await?;
        record.ensure_deletable(principal)?;

        self.inner.store.delete(id).await?;
        self.inner.refresh_communication(&record).await;
        Ok(())
    }

    /// Send every due record, highest priority first.
    ///
    /// At most `max_concurrent_sends` records are in flight at once; each is
    /// sent as a background attempt.
    ///
    /// # Errors
    /// Only if the pending records cannot be listed.
    pub async fn flush(&self, limit: Option<usize>) -> Result<FlushSummary, DeliveryError> {
        let settings = self.settings();
        let mut summary = FlushSummary::default();

        if settings.is_paused() {
            internal!(level = DEBUG, "Queue is muted or held, not flushing");
            return Ok(summary);
        }

        let records = self
            .inner
            .store
            .list(&RecordFilter::pending(Utc::now()), limit)
            .await?;
        internal!(level = DEBUG, "Flushing {} record(s)", records.len());

        let permits = Arc::new(Semaphore::new(settings.max_concurrent_sends.max(1)));
        let mut tasks = JoinSet::new();

        for record in records {
            let dispatcher = self.clone();
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                dispatcher.send(&record.id, true).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(status))) => *summary.statuses.entry(status).or_default() += 1,
                Ok(Ok(None)) => summary.skipped += 1,
                // Already logged against the record
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    tracing::error!("Send task panicked or was cancelled: {e}");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}
