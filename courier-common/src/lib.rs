pub mod attachment;
pub mod audit;
pub mod error;
pub mod logging;
pub mod record;
pub mod settings;
pub mod status;
pub mod types;

pub use attachment::{Attachment, FileRef, PrintFormatRequest};
pub use error::PermissionError;
pub use record::{NewQueueRecord, QueueRecord, Recipient};
pub use settings::{DeliverySettings, MAX_RETRY_COUNT};
pub use status::{ExposeRecipients, QueueStatus, RecipientStatus};
pub use tracing;
pub use types::QueueId;

/// The principal allowed to delete queue records.
pub const ADMINISTRATOR: &str = "Administrator";
