use std::future::Future;

use crate::error::StoreError;

/// The slow, authoritative provider sitting behind the gateway.
///
/// Both operations may take arbitrarily long and may fail. The gateway never
/// retries on its own; a failed fetch is simply not remembered.
pub trait ResourceStore: Send + Sync + 'static {
    /// The resource payload handed back to callers.
    type Value: Clone + Send + Sync + 'static;

    /// Reads the resource stored under `key`.
    fn fetch(&self, key: &str) -> impl Future<Output = Result<Self::Value, StoreError>> + Send;

    /// Creates or replaces the resource stored under `key`.
    fn upsert(
        &self,
        key: &str,
        value: Self::Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
