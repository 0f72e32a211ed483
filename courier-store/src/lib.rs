pub mod backends;
pub mod communication;
pub mod config;
pub mod error;
pub mod store;

pub use backends::{FileRecordStore, MemoryRecordStore};
pub use communication::ProjectedCommunications;
pub use config::{MemoryConfig, StoreConfig};
pub use courier_common::QueueId;
pub use error::{Result, SerializationError, StoreError};
pub use store::{
    CommunicationStatus, DeliveryStatus, FieldUpdate, RecordFilter, RecordStore, flush_order,
};
