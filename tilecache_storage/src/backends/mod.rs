mod filesystem;
mod http_document;
mod kv_store;
mod sqlite_per_level;
mod sqlite_single;

pub use filesystem::FilesystemStorage;
pub use http_document::HttpDocumentStorage;
pub use kv_store::DistributedKvStorage;
pub use sqlite_per_level::SqlitePerLevelStorage;
pub use sqlite_single::SqliteSingleFileStorage;
