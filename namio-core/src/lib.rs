//! Namio Core - naming server engine for a distributed filesystem
//!
//! The naming server maps hierarchical file paths to the storage nodes that
//! host their contents. This crate holds the metadata engine:
//! - an immutable path value with prefix and ordering queries
//! - hierarchical reader/writer locks over paths, FIFO fair
//! - the in-memory directory tree and its storage-node mapping
//! - the service and registration facades layered over tree and locks
//! - the outbound directive transport used to create/delete files on nodes

pub mod error;
pub mod lock;
pub mod path;
pub mod service;
pub mod transport;
pub mod tree;

pub use error::{NamioError, Result};
pub use lock::LockManager;
pub use path::DfsPath;
pub use service::NamingService;
pub use transport::{DirectiveTransport, HttpDirectiveTransport};
pub use tree::{
    CommandHandle, DeletePlan, DirectoryTree, SiteId, StorageHandle, StorageSite, TreeStats,
};
