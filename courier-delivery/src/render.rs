//! Per-recipient message rendering.
//!
//! Stored messages carry literal marker comments that are replaced for each
//! recipient, always in this order: tracker, unsubscribe link, cc footer,
//! recipient address. Attachments that were not embedded at enqueue time
//! are fetched and appended afterwards.

use std::sync::Arc;

use courier_common::{Attachment, DeliverySettings, ExposeRecipients, QueueRecord};
use url::Url;

use crate::{
    attachments::{self, BlobService, PrintFormatter},
    error::RenderError,
};

pub const TRACKER_MARKER: &str = "<!--email open check-->";
pub const UNSUBSCRIBE_MARKER: &str = "<!--unsubscribe url-->";
pub const CC_MARKER: &str = "<!--cc message-->";
pub const RECIPIENT_MARKER: &str = "<!--recipient-->";

/// Builds the unsubscribe link for one recipient of a record
pub trait UnsubscribeLinks: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// [`RenderError::UnsubscribeLink`] when no valid URL can be built.
    fn url(
        &self,
        record: &QueueRecord,
        recipient: &str,
        settings: &DeliverySettings,
    ) -> Result<String, RenderError>;
}

/// Unsigned links of the form `<site><path>?email=..&doctype=..&name=..`.
///
/// The path is the record's `unsubscribe_method` when set, otherwise the
/// configured `unsubscribe_path`. Extra record parameters are appended.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryUnsubscribeLinks;

impl UnsubscribeLinks for QueryUnsubscribeLinks {
    fn url(
        &self,
        record: &QueueRecord,
        recipient: &str,
        settings: &DeliverySettings,
    ) -> Result<String, RenderError> {
        let path = record
            .unsubscribe_method
            .as_deref()
            .unwrap_or(&settings.unsubscribe_path);

        let mut url = Url::parse(&settings.base_url())
            .and_then(|base| base.join(path))
            .map_err(|e| RenderError::UnsubscribeLink(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("email", recipient);
            query.append_pair("doctype", record.reference_doctype.as_deref().unwrap_or(""));
            query.append_pair("name", record.reference_name.as_deref().unwrap_or(""));
            for (key, value) in &record.unsubscribe_params {
                query.append_pair(key, value);
            }
        }

        Ok(url.into())
    }
}

#[derive(Debug, Clone)]
pub struct MessageRenderer {
    blobs: Arc<dyn BlobService>,
    print: Option<Arc<dyn PrintFormatter>>,
    unsubscribe: Arc<dyn UnsubscribeLinks>,
}

impl MessageRenderer {
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobService>) -> Self {
        Self {
            blobs,
            print: None,
            unsubscribe: Arc::new(QueryUnsubscribeLinks),
        }
    }

    #[must_use]
    pub fn with_print_formatter(mut self, print: Arc<dyn PrintFormatter>) -> Self {
        self.print = Some(print);
        self
    }

    #[must_use]
    pub fn with_unsubscribe_links(mut self, unsubscribe: Arc<dyn UnsubscribeLinks>) -> Self {
        self.unsubscribe = unsubscribe;
        self
    }

    /// Final wire text for one recipient.
    ///
    /// `track_email_status` is the resolved account's open-tracking flag.
    ///
    /// # Errors
    /// Fails if the unsubscribe link cannot be built, an attachment cannot be
    /// fetched, or the message cannot be parsed.
    pub async fn render(
        &self,
        record: &QueueRecord,
        settings: &DeliverySettings,
        track_email_status: bool,
        recipient: &str,
    ) -> Result<String, RenderError> {
        if record.message.is_empty() {
            return Ok(String::new());
        }

        let message = self.substitute(record, settings, track_email_status, recipient)?;
        self.include_attachments(record, message).await
    }

    /// Marker replacement only
    ///
    /// # Errors
    /// Fails if the unsubscribe link cannot be built.
    pub fn substitute(
        &self,
        record: &QueueRecord,
        settings: &DeliverySettings,
        track_email_status: bool,
        recipient: &str,
    ) -> Result<String, RenderError> {
        let tracker = tracker(record, settings, track_email_status);
        let unsubscribe = self.unsubscribe_link(record, recipient, settings)?;

        Ok(record
            .message
            .replace(TRACKER_MARKER, &tracker)
            .replace(UNSUBSCRIBE_MARKER, &unsubscribe)
            .replace(CC_MARKER, &receivers(record))
            .replace(RECIPIENT_MARKER, recipient_str(record, recipient)))
    }

    fn unsubscribe_link(
        &self,
        record: &QueueRecord,
        recipient: &str,
        settings: &DeliverySettings,
    ) -> Result<String, RenderError> {
        if !record.add_unsubscribe_link || record.reference_doctype.is_none() {
            return Ok(String::new());
        }

        let url = self.unsubscribe.url(record, recipient, settings)?;
        Ok(quoted_printable::encode_to_str(url))
    }

    async fn include_attachments(
        &self,
        record: &QueueRecord,
        message: String,
    ) -> Result<String, RenderError> {
        let mut files = Vec::new();

        for attachment in &record.attachments {
            match attachment {
                // Embedded when the record was enqueued
                Attachment::Inline { .. } => {}
                Attachment::File(file) => files.push(self.blobs.fetch(file).await?),
                Attachment::PrintFormat(request) => {
                    let print = self.print.as_ref().ok_or_else(|| RenderError::PrintFormat {
                        doctype: request.doctype.clone(),
                        name: request.name.clone(),
                        reason: "no print formatter registered".to_string(),
                    })?;
                    files.push(print.render(request).await?);
                }
            }
        }

        if files.is_empty() {
            return Ok(message);
        }

        attachments::attach(&message, &files, &record.id)
    }
}

/// Quoted-printable open-tracking pixel, or nothing.
///
/// Opens are reported against the linked communication; a record without
/// one gets no pixel even when TLS and open tracking are on.
fn tracker(record: &QueueRecord, settings: &DeliverySettings, track_email_status: bool) -> String {
    let Some(communication) = record.communication.as_deref() else {
        return String::new();
    };
    if !settings.use_ssl || !track_email_status {
        return String::new();
    }

    let src = Url::parse(&settings.base_url())
        .and_then(|base| base.join(&settings.tracking_path))
        .map(|mut url| {
            url.query_pairs_mut().append_pair("name", communication);
            String::from(url)
        })
        .unwrap_or_else(|_| {
            format!(
                "{}{}?name={communication}",
                settings.base_url(),
                settings.tracking_path
            )
        });

    quoted_printable::encode_to_str(format!("<img src=\"{src}\"/>"))
}

fn receivers(record: &QueueRecord) -> String {
    if record.expose_recipients != ExposeRecipients::Footer {
        return String::new();
    }

    let to = record.to().join(", ");
    let cc = record.cc().join(", ");

    if cc.is_empty() {
        format!("This email was sent to {to}")
    } else {
        format!("This email was sent to {to} and copied to {cc}")
    }
}

fn recipient_str<'a>(record: &QueueRecord, recipient: &'a str) -> &'a str {
    if record.expose_recipients == ExposeRecipients::Header {
        ""
    } else {
        recipient
    }
}
