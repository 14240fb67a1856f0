pub mod config;
pub mod error;
pub mod fs;
pub mod fuse;
pub mod lock;
pub mod metadata;
pub mod posix;
pub mod storage;

pub use config::MountConfig;
pub use error::{FsError, Result};
pub use fs::ObjectFs;
pub use fuse::FuseAdapter;
pub use metadata::{MetadataStore, MetadataTree};
pub use posix::{Entry, EntryKind};
pub use storage::{LocalObjectStore, MemoryObjectStore, ObjectMeta, ObjectStore};
