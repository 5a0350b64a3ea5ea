//! Key/value persistence seam
//!
//! The model metadata cache, the voice model list cache, the failed telemetry
//! buffer and the cached device id are all plain key → JSON blob entries. The
//! storage medium is a platform concern; implementations live in
//! `duet-foundation::persistence`.

use crate::error::StoreResult;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Async key → string blob store.
///
/// # Example
///
/// ```rust,ignore
/// use duet_kernel::storage::{KeyValueStore, load_json, save_json};
///
/// save_json(&store, "model_qwen3-0.6", &descriptor).await?;
/// let cached: Option<ModelDescriptor> = load_json(&store, "model_qwen3-0.6").await?;
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the blob stored under `key`.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous blob.
    async fn put(&self, key: &str, value: String) -> StoreResult<()>;

    /// Remove `key`.
    ///
    /// Returns `Ok(true)` if the key existed.
    async fn remove(&self, key: &str) -> StoreResult<bool>;
}

/// Read and deserialize a JSON blob.
pub async fn load_json<T, S>(store: &S, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize a value to JSON and store it.
pub async fn save_json<T, S>(store: &S, key: &str, value: &T) -> StoreResult<()>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    let raw = serde_json::to_string(value)?;
    store.put(key, raw).await
}
