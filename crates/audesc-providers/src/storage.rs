//! Object storage capability.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ProviderResult;

/// Blob storage the pipeline reads sources from and writes artifacts to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a payload, returning its locator.
    async fn put(&self, payload: Bytes) -> ProviderResult<String>;

    /// Fetch a payload by locator.
    async fn get(&self, locator: &str) -> ProviderResult<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_storage_contract_round_trip() {
        let mut storage = MockStorage::new();
        storage
            .expect_put()
            .returning(|_| Ok("mem://blob-1".to_string()));
        storage
            .expect_get()
            .withf(|locator| locator == "mem://blob-1")
            .returning(|_| Ok(Bytes::from_static(b"fragment text")));

        let locator = storage.put(Bytes::from_static(b"fragment text")).await.unwrap();
        let payload = storage.get(&locator).await.unwrap();
        assert_eq!(payload, Bytes::from_static(b"fragment text"));
    }
}
