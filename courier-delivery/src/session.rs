//! One send attempt for one queue record.
//!
//! [`SendSession::acquire`] resolves the account, opens the transport and
//! claims the record by marking it `Sending`. [`SendSession::run`] walks the
//! unsent recipients. [`SendSession::finalize`] consumes the session, closes the
//! transport and commits the outcome; the dispatcher calls it on every path
//! once acquisition succeeded, so `Sending` is never left behind.

use std::sync::Arc;

use courier_common::{
    DeliverySettings, QueueId, QueueRecord, QueueStatus, RecipientStatus, audit, internal,
    logging::{BACKGROUND_TARGET, FOREGROUND_TARGET},
};
use courier_store::FieldUpdate;

use crate::{
    account::{AccountQuery, DeliveryAccount},
    dispatcher::Inner,
    error::{AccountError, DeliveryError, TransportError},
    transport::{CapturedMail, TransportSession},
};

/// Log a failed attempt against its record.
///
/// Background and foreground failures go to different targets so a flush
/// can be monitored apart from direct sends.
pub(crate) fn log_failure(id: &QueueId, background: bool, error: &DeliveryError) {
    match (background, error.is_transport()) {
        (true, true) => tracing::warn!(target: BACKGROUND_TARGET, queue_id = %id, "{error}"),
        (true, false) => tracing::error!(target: BACKGROUND_TARGET, queue_id = %id, "{error}"),
        (false, true) => tracing::warn!(target: FOREGROUND_TARGET, queue_id = %id, "{error}"),
        (false, false) => tracing::error!(target: FOREGROUND_TARGET, queue_id = %id, "{error}"),
    }
}

pub(crate) struct SendSession<'a> {
    inner: &'a Inner,
    settings: Arc<DeliverySettings>,
    record: QueueRecord,
    account: Arc<dyn DeliveryAccount>,
    transport: Option<Box<dyn TransportSession>>,
    sent_to: Vec<String>,
    background: bool,
}

impl<'a> SendSession<'a> {
    /// Nothing is written to the record unless every step up to the
    /// `Sending` claim succeeds.
    ///
    /// Returns `None`, with no side effects, when sending was paused while
    /// the transport was opening or another attempt claimed the record first.
    pub(crate) async fn acquire(
        inner: &'a Inner,
        settings: Arc<DeliverySettings>,
        record: QueueRecord,
        background: bool,
    ) -> Result<Option<Self>, DeliveryError> {
        let account = match inner.resolver.resolve(AccountQuery::for_record(&record)).await {
            // The stamped account was removed; route as if it was never set
            Err(DeliveryError::Account(AccountError::NotFound(name))) => {
                internal!(
                    level = WARN,
                    "Account {name} for {} no longer exists, resolving by sender",
                    record.id
                );
                inner
                    .resolver
                    .resolve(AccountQuery::Outgoing {
                        sender: &record.sender,
                        doctype: record.reference_doctype.as_deref(),
                    })
                    .await?
            }
            resolved => resolved?,
        };

        let mut transport = if settings.dry_run || inner.send_override.is_some() {
            None
        } else {
            Some(account.open_transport().await?)
        };

        let claimed = if inner.current_settings().is_paused() {
            internal!(
                level = DEBUG,
                "Sending paused while opening the transport for {}",
                record.id
            );
            Ok(false)
        } else {
            inner.store.claim_for_sending(&record.id).await
        };

        let (id, previous) = (record.id, record.status);
        let claimed_ok = matches!(claimed, Ok(true));
        let record = match claimed {
            Ok(true) => inner.store.get(&id).await,
            Ok(false) => {
                internal!(
                    level = DEBUG,
                    "{id} is no longer eligible, leaving it to its current attempt"
                );
                if let Some(transport) = transport.as_mut() {
                    transport.quit().await;
                }
                inner.store.rollback().await;
                return Ok(None);
            }
            Err(e) => Err(e),
        };

        let mut record = match record {
            Ok(record) => record,
            Err(e) => {
                if let Some(transport) = transport.as_mut() {
                    transport.quit().await;
                }
                if claimed_ok {
                    // Hand the claim back so a later attempt can pick the record up
                    let release = FieldUpdate::status(previous);
                    if let Err(e) = inner.store.set_fields(&id, &release, true).await {
                        log_failure(&id, background, &e.into());
                    }
                }
                return Err(e.into());
            }
        };
        record.status = QueueStatus::Sending;
        inner.refresh_communication(&record).await;

        let sent_to = record.sent_addresses();
        audit::log_send_attempt(
            &record.id.to_string(),
            &record.sender,
            account.name(),
            record.recipients.len().saturating_sub(sent_to.len()),
            record.retry,
        );

        Ok(Some(Self {
            inner,
            settings,
            record,
            account,
            transport,
            sent_to,
            background,
        }))
    }

    /// Send to every recipient not yet marked `Sent`.
    ///
    /// Each success is committed before the next recipient is attempted, so
    /// a later failure never loses it.
    pub(crate) async fn run(&mut self) -> Result<(), DeliveryError> {
        if self.inner.current_settings().is_paused() {
            internal!(
                level = DEBUG,
                "Sending paused, leaving {} for later",
                self.record.id
            );
            return Ok(());
        }

        let pending: Vec<String> = self
            .record
            .recipients
            .iter()
            .filter(|r| !r.is_sent() && !self.sent_to.contains(&r.address))
            .map(|r| r.address.clone())
            .collect();

        let track_email_status = self.account.track_email_status();
        let mut last_message = None;

        for recipient in pending {
            let message = self
                .inner
                .renderer
                .render(&self.record, &self.settings, track_email_status, &recipient)
                .await?;

            if self.settings.dry_run {
                self.inner.capture.push(CapturedMail {
                    queue_id: self.record.id,
                    recipient: recipient.clone(),
                    message: message.clone(),
                });
            }

            if let Some(send_override) = &self.inner.send_override {
                send_override
                    .transmit(&self.record, &self.record.sender, &recipient, &message)
                    .await?;
            } else if !self.settings.dry_run {
                let Some(transport) = self.transport.as_mut() else {
                    return Err(TransportError::Disconnected(
                        "No open transport session".to_string(),
                    )
                    .into());
                };
                transport
                    .send(&self.record.sender, &recipient, &message)
                    .await?;
            }

            self.inner
                .store
                .set_recipient_status(&self.record.id, &recipient, RecipientStatus::Sent, true)
                .await?;
            audit::log_recipient_sent(&self.record.id.to_string(), &recipient);
            self.sent_to.push(recipient);
            last_message = Some(message);
        }

        if self.settings.dry_run
            || !(self.record.append_to_sent_folder || self.account.append_to_sent_folder())
        {
            return Ok(());
        }

        if let (Some(folder), Some(message)) = (&self.inner.sent_folder, last_message)
            && let Err(e) = folder.append(self.account.name(), &message).await
        {
            internal!(
                level = WARN,
                "Could not append {} to the sent folder of {}: {e}",
                self.record.id,
                self.account.name()
            );
        }

        Ok(())
    }

    /// Close the transport and commit the outcome of the attempt.
    ///
    /// Never fails; store errors at this point are logged and the status
    /// that was meant to be written is returned.
    pub(crate) async fn finalize(mut self, outcome: Result<(), DeliveryError>) -> QueueStatus {
        if let Some(mut transport) = self.transport.take() {
            transport.quit().await;
        }

        let id = self.record.id;
        let any_sent = !self.sent_to.is_empty();
        let in_progress = if any_sent {
            QueueStatus::PartiallySent
        } else {
            QueueStatus::NotSent
        };

        let update = match &outcome {
            Err(error) => {
                log_failure(&id, self.background, error);

                if error.is_transport() {
                    FieldUpdate::status(in_progress)
                } else if self.record.retry < self.settings.max_retry_count {
                    FieldUpdate::status(in_progress).with_retry(self.record.retry + 1)
                } else if any_sent {
                    FieldUpdate::status(QueueStatus::PartiallyErrored)
                } else {
                    FieldUpdate::status(QueueStatus::Error)
                }
            }
            Ok(()) => {
                let sent_to_all = self
                    .record
                    .recipients
                    .iter()
                    .all(|r| self.sent_to.contains(&r.address));

                let status = if sent_to_all {
                    QueueStatus::Sent
                } else {
                    in_progress
                };

                let account = self
                    .account
                    .exists_in_store()
                    .await
                    .then(|| self.account.name().to_string());

                FieldUpdate::status(status).with_email_account(account)
            }
        };

        update.apply(&mut self.record);
        if let Err(e) = self.inner.store.set_fields(&id, &update, true).await {
            log_failure(&id, self.background, &e.into());

            // A record left `Sending` is never picked up again
            if let Err(e) = self.inner.store.set_fields(&id, &update, true).await {
                log_failure(&id, self.background, &e.into());
            }
        }
        self.inner.refresh_communication(&self.record).await;

        let error = outcome.err().map(|e| e.to_string());
        audit::log_send_finalised(
            &id.to_string(),
            self.record.status.as_str(),
            self.record.retry,
            error.as_deref(),
        );

        self.record.status
    }
}
