//! facefind-index — Gallery scan and cached face representations.
//!
//! Every searchable photo under a folder is represented once (detection +
//! embedding) and stored in SQLite, keyed by path and content fingerprint.
//! Later searches only re-analyze files that were added or changed.

pub mod gallery;
pub mod store;
pub mod sync;

pub use gallery::{resolve_root, scan, GalleryError, GalleryFile};
pub use store::{IndexStore, IndexedImage, StoreError};
pub use sync::{refresh, FaceSource, RefreshSummary, SourceError, SyncError};
