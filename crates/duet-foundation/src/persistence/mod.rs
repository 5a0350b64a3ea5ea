//! Key/value persistence
//!
//! Backends for [`duet_kernel::storage::KeyValueStore`]. The model cache, the
//! failed telemetry buffer and the cached device id are stored through them.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          KeyValueStore (duet-kernel)         │
//! └──────────────────────────────────────────────┘
//!            │                        │
//!            ▼                        ▼
//! ┌────────────────────┐   ┌──────────────────────┐
//! │ MemoryStore        │   │ FileStore            │
//! │ (dashmap, tests)   │   │ (one file per key)   │
//! └────────────────────┘   └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use duet_foundation::persistence::FileStore;
//!
//! let store = FileStore::open(".duet/cache").await?;
//! store.put("duet_device_id", "abc".into()).await?;
//! ```

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
