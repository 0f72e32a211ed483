//! Outgoing account resolution.
//!
//! An account decides which relay a queue record goes through and hands out
//! transport sessions for it. [`ConfiguredAccounts`] is the resolver backed
//! by the `accounts` section of the configuration file.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use courier_common::{QueueRecord, internal};

use crate::{
    config::{SmtpAccountConfig, SmtpTimeouts},
    error::{AccountError, DeliveryError},
    transport::{SmtpTransport, TransportSession},
};

/// A resolved outgoing account
#[async_trait]
pub trait DeliveryAccount: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Address the account sends as
    fn email(&self) -> &str;

    fn track_email_status(&self) -> bool;

    fn append_to_sent_folder(&self) -> bool;

    async fn open_transport(&self) -> Result<Box<dyn TransportSession>, DeliveryError>;

    /// Whether the account is still defined; it may have been removed since
    /// it was resolved.
    async fn exists_in_store(&self) -> bool;
}

/// What to look an account up by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountQuery<'a> {
    /// An account stamped on the record or chosen by the caller
    Named(&'a str),
    Outgoing {
        sender: &'a str,
        doctype: Option<&'a str>,
    },
}

impl<'a> AccountQuery<'a> {
    #[must_use]
    pub fn for_record(record: &'a QueueRecord) -> Self {
        record.email_account.as_deref().map_or(
            Self::Outgoing {
                sender: record.sender.as_str(),
                doctype: record.reference_doctype.as_deref(),
            },
            Self::Named,
        )
    }
}

#[async_trait]
pub trait AccountResolver: Send + Sync + std::fmt::Debug {
    async fn resolve(
        &self,
        query: AccountQuery<'_>,
    ) -> Result<Arc<dyn DeliveryAccount>, DeliveryError>;
}

/// Mailbox that keeps a copy of what an account sent
#[async_trait]
pub trait SentFolder: Send + Sync + std::fmt::Debug {
    async fn append(&self, account: &str, message: &str) -> Result<(), DeliveryError>;
}

/// Accounts loaded from configuration.
///
/// Clones share the same registry, so removing an account is visible to
/// accounts that were resolved before the removal.
#[derive(Debug, Clone)]
pub struct ConfiguredAccounts {
    accounts: Arc<RwLock<Vec<SmtpAccountConfig>>>,
    timeouts: SmtpTimeouts,
    helo_domain: String,
}

impl ConfiguredAccounts {
    #[must_use]
    pub fn new(
        accounts: Vec<SmtpAccountConfig>,
        timeouts: SmtpTimeouts,
        helo_domain: impl Into<String>,
    ) -> Self {
        Self {
            accounts: Arc::new(RwLock::new(accounts)),
            timeouts,
            helo_domain: helo_domain.into(),
        }
    }

    /// Add an account, replacing any existing one with the same name
    pub fn insert(&self, account: SmtpAccountConfig) {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        accounts.retain(|a| a.name != account.name);
        accounts.push(account);
    }

    /// Returns whether an account was removed
    pub fn remove(&self, name: &str) -> bool {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        let before = accounts.len();
        accounts.retain(|a| a.name != name);
        accounts.len() != before
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|a| a.name == name)
    }

    /// Pick the account for a query.
    ///
    /// Outgoing lookups try, in order: an account sending as the sender
    /// address, one routing the reference doctype, then the default.
    ///
    /// # Errors
    /// [`AccountError::NotFound`] for an unknown name,
    /// [`AccountError::NoOutgoingAccount`] when nothing matches.
    pub fn find(&self, query: AccountQuery<'_>) -> Result<SmtpAccountConfig, AccountError> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);

        match query {
            AccountQuery::Named(name) => accounts
                .iter()
                .find(|a| a.name == name)
                .cloned()
                .ok_or_else(|| AccountError::NotFound(name.to_string())),
            AccountQuery::Outgoing { sender, doctype } => {
                let sender_address = bare_address(sender);

                accounts
                    .iter()
                    .find(|a| a.email.eq_ignore_ascii_case(sender_address))
                    .or_else(|| {
                        doctype.and_then(|doctype| {
                            accounts
                                .iter()
                                .find(|a| a.use_for_doctypes.iter().any(|d| d == doctype))
                        })
                    })
                    .or_else(|| accounts.iter().find(|a| a.default_outgoing))
                    .cloned()
                    .ok_or_else(|| AccountError::NoOutgoingAccount {
                        sender: sender.to_string(),
                    })
            }
        }
    }
}

/// `Name <user@host>` to `user@host`
pub(crate) fn bare_address(sender: &str) -> &str {
    match (sender.rfind('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if start < end => sender[start + 1..end].trim(),
        _ => sender.trim(),
    }
}

#[async_trait]
impl AccountResolver for ConfiguredAccounts {
    async fn resolve(
        &self,
        query: AccountQuery<'_>,
    ) -> Result<Arc<dyn DeliveryAccount>, DeliveryError> {
        let config = self.find(query)?;
        internal!(level = DEBUG, "Resolved {query:?} to account {}", config.name);

        Ok(Arc::new(SmtpAccount {
            config,
            registry: self.clone(),
        }))
    }
}

/// An account from [`ConfiguredAccounts`], speaking SMTP to its relay
#[derive(Debug)]
pub struct SmtpAccount {
    config: SmtpAccountConfig,
    registry: ConfiguredAccounts,
}

#[async_trait]
impl DeliveryAccount for SmtpAccount {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn email(&self) -> &str {
        &self.config.email
    }

    fn track_email_status(&self) -> bool {
        self.config.track_email_status
    }

    fn append_to_sent_folder(&self) -> bool {
        self.config.append_to_sent_folder
    }

    async fn open_transport(&self) -> Result<Box<dyn TransportSession>, DeliveryError> {
        let transport = SmtpTransport::open(
            &self.config,
            &self.registry.timeouts,
            &self.registry.helo_domain,
        )
        .await?;

        Ok(Box::new(transport))
    }

    async fn exists_in_store(&self) -> bool {
        self.registry.contains(&self.config.name)
    }
}
