//! Outgoing transports.
//!
//! A [`TransportSession`] is one open connection, reused for every recipient
//! of a queue record. [`SmtpTransport`] is the SMTP implementation; it wraps
//! every protocol step in its own timeout and classifies failures so the
//! session can tell infrastructure faults from refusals.

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use courier_common::{QueueId, QueueRecord};
use courier_smtp::{AuthMechanism, SmtpClient};

use crate::{
    account::bare_address,
    config::{SmtpAccountConfig, SmtpTimeouts, TlsMode},
    error::{DeliveryError, SendError, TransportError},
};

/// A connection able to hand messages to a mail server
#[async_trait]
pub trait TransportSession: Send {
    async fn send(&mut self, from: &str, to: &str, message: &str) -> Result<(), DeliveryError>;

    /// Close the connection. Best effort; failures are only logged.
    async fn quit(&mut self);
}

/// Replaces the transport call for every recipient when registered.
///
/// Recipient bookkeeping still happens around it.
#[async_trait]
pub trait SendOverride: Send + Sync + std::fmt::Debug {
    async fn transmit(
        &self,
        record: &QueueRecord,
        sender: &str,
        recipient: &str,
        message: &str,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedMail {
    pub queue_id: QueueId,
    pub recipient: String,
    pub message: String,
}

/// Sink for messages rendered while running dry
#[derive(Debug, Clone, Default)]
pub struct SentMailCapture {
    mails: Arc<Mutex<Vec<CapturedMail>>>,
}

impl SentMailCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, mail: CapturedMail) {
        self.mails
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(mail);
    }

    /// The most recently captured message
    #[must_use]
    pub fn last(&self) -> Option<CapturedMail> {
        self.mails
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .last()
            .cloned()
    }

    #[must_use]
    pub fn all(&self) -> Vec<CapturedMail> {
        self.mails
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.mails
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

async fn step<T, F>(limit: Duration, name: &str, fut: F) -> Result<T, DeliveryError>
where
    F: Future<Output = courier_smtp::Result<T>> + Send,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout(format!("{name} timed out after {limit:?}")))?
        .map_err(DeliveryError::from)
}

/// SMTP session against a configured relay
#[derive(Debug)]
pub struct SmtpTransport {
    client: SmtpClient,
    server: String,
    timeouts: SmtpTimeouts,
}

impl SmtpTransport {
    /// Connect, greet, negotiate TLS and authenticate.
    ///
    /// # Errors
    /// Every failure here is transport-class.
    #[tracing::instrument(level = "debug", skip_all, fields(account = %account.name, server = %account.address()))]
    pub async fn open(
        account: &SmtpAccountConfig,
        timeouts: &SmtpTimeouts,
        helo_domain: &str,
    ) -> Result<Self, DeliveryError> {
        let server = account.address();

        if account.accept_invalid_certs {
            tracing::warn!(
                server = %server,
                "SECURITY WARNING: TLS certificate validation is disabled for this account"
            );
        }

        let client = tokio::time::timeout(
            timeouts.connect(),
            SmtpClient::connect(&server, account.host.clone()),
        )
        .await
        .map_err(|_| {
            TransportError::Timeout(format!(
                "Connecting to {server} timed out after {:?}",
                timeouts.connect()
            ))
        })?
        .map_err(|e| TransportError::Connect(format!("Failed to connect to {server}: {e}")))?
        .accept_invalid_certs(account.accept_invalid_certs);

        let mut transport = Self {
            client,
            server,
            timeouts: timeouts.clone(),
        };

        let greeting = step(
            transport.timeouts.ehlo(),
            "Greeting",
            transport.client.read_greeting(),
        )
        .await?;
        if !greeting.is_success() {
            return Err(TransportError::Connect(format!(
                "{} rejected connection: {}",
                transport.server,
                greeting.message()
            ))
            .into());
        }

        transport.hello(helo_domain).await?;

        if account.tls == TlsMode::StartTls {
            transport.starttls(helo_domain).await?;
        }

        if let Some(credentials) = &account.credentials {
            let mechanism = transport
                .client
                .capabilities()
                .auth_mechanisms()
                .first()
                .copied()
                .unwrap_or(AuthMechanism::Plain);

            let response = step(
                transport.timeouts.auth(),
                "AUTH",
                transport.client.authenticate(credentials, mechanism),
            )
            .await?;

            if response.code != 235 {
                return Err(TransportError::Authentication(format!(
                    "{} {}",
                    response.code,
                    response.message()
                ))
                .into());
            }
        }

        Ok(transport)
    }

    /// EHLO, falling back to HELO for servers that only speak RFC 821
    async fn hello(&mut self, helo_domain: &str) -> Result<(), DeliveryError> {
        let ehlo = step(self.timeouts.ehlo(), "EHLO", self.client.ehlo(helo_domain)).await?;
        if ehlo.is_success() {
            return Ok(());
        }

        let helo = step(self.timeouts.ehlo(), "HELO", self.client.helo(helo_domain)).await?;
        if helo.is_success() {
            Ok(())
        } else {
            Err(TransportError::Handshake(format!(
                "{} rejected HELO: {}",
                self.server,
                helo.message()
            ))
            .into())
        }
    }

    async fn starttls(&mut self, helo_domain: &str) -> Result<(), DeliveryError> {
        if !self.client.capabilities().supports_starttls() {
            return Err(TransportError::Handshake(format!(
                "{} does not advertise STARTTLS",
                self.server
            ))
            .into());
        }

        let response = step(self.timeouts.starttls(), "STARTTLS", self.client.starttls()).await?;
        if !response.is_success() {
            return Err(TransportError::Handshake(format!(
                "{} rejected STARTTLS: {}",
                self.server,
                response.message()
            ))
            .into());
        }

        // Capabilities must be re-read over the encrypted channel
        self.hello(helo_domain).await
    }
}

#[async_trait]
impl TransportSession for SmtpTransport {
    async fn send(&mut self, from: &str, to: &str, message: &str) -> Result<(), DeliveryError> {
        let from = bare_address(from);
        let response = step(
            self.timeouts.mail_from(),
            "MAIL FROM",
            self.client.mail_from(from, Some(message.len())),
        )
        .await?;
        if !response.is_success() {
            return Err(SendError::SenderRefused(format!(
                "{from}: {} {}",
                response.code,
                response.message()
            ))
            .into());
        }

        let response = step(self.timeouts.rcpt_to(), "RCPT TO", self.client.rcpt_to(to)).await?;
        if !response.is_success() {
            return Err(TransportError::RecipientsRefused {
                recipient: to.to_string(),
                code: response.code,
                message: response.message(),
            }
            .into());
        }

        let response = step(self.timeouts.data(), "DATA", self.client.data()).await?;
        if response.code != 354 {
            return Err(SendError::DataRejected(format!(
                "DATA: {} {}",
                response.code,
                response.message()
            ))
            .into());
        }

        let response = step(
            self.timeouts.data(),
            "Message transmission",
            self.client.send_data(message),
        )
        .await?;
        if !response.is_success() {
            return Err(SendError::DataRejected(format!(
                "{} {}",
                response.code,
                response.message()
            ))
            .into());
        }

        tracing::debug!(server = %self.server, recipient = %to, "Message accepted");
        Ok(())
    }

    async fn quit(&mut self) {
        if let Err(e) = step(self.timeouts.quit(), "QUIT", self.client.quit()).await {
            tracing::warn!(server = %self.server, "QUIT failed: {e}");
        }
    }
}
