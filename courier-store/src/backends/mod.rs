//! Record store implementations
//!
//! - `memory`: In-memory storage for tests and transient queues
//! - `file`: One bincode file per record for production use

pub mod file;
pub mod memory;

pub use file::FileRecordStore;
pub use memory::MemoryRecordStore;
