pub mod archive;
pub mod config;
pub mod device;
pub mod storage;

pub use archive::ArchiveWriter;
pub use archive::memory::MemoryArchive;
pub use archive::sqlite::SqliteArchive;
pub use config::{ArchiveConfig, Config, SnapshotConfig, StorageConfig};
pub use device::{DeviceError, DeviceFleet, DeviceHandle};
pub use storage::memory::MemoryStore;
pub use storage::sqlite::SqliteStore;
pub use storage::{EventJournal, SnapshotLoad, SnapshotStore};
