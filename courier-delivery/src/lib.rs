//! Send pipeline for queued mail.
//!
//! A [`Dispatcher`] loads a queue record, checks it may be sent, and drives
//! it through a send session: resolve the outgoing account, open a transport,
//! render and transmit the message for every outstanding recipient, then
//! commit a classified status. Transport-class failures leave the retry
//! count alone; anything else spends one retry until the record errors out.

pub mod account;
pub mod attachments;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod render;
mod session;
pub mod transport;

pub use account::{
    AccountQuery, AccountResolver, ConfiguredAccounts, DeliveryAccount, SentFolder, SmtpAccount,
};
pub use attachments::{BlobService, FsBlobStore, PrintFormatter, StoredFile};
pub use config::{SmtpAccountConfig, SmtpTimeouts, TlsMode};
pub use dispatcher::{Dispatcher, DispatcherBuilder, FlushSummary};
pub use error::{AccountError, DeliveryError, RenderError, SendError, TransportError};
pub use render::{MessageRenderer, QueryUnsubscribeLinks, UnsubscribeLinks};
pub use transport::{CapturedMail, SendOverride, SentMailCapture, SmtpTransport, TransportSession};
