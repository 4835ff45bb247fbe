//! Contract for the durable blob store the host supplies.
//!
//! The engine treats the backend as an opaque, eventually-durable key-value
//! store and only requires single-key read/write atomicity. Read and write
//! failures propagate to the caller; they are the one class of error this
//! engine does not absorb.

use std::collections::HashMap;

use async_trait::async_trait;

/// Host-provided key-value blob store.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, store: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, store: &str, key: &str, value: &[u8]) -> anyhow::Result<()>;
}

/// In-process backend for tests and embedded hosts.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: std::sync::Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, store: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(&(store.to_string(), key.to_string())).cloned())
    }

    async fn set(&self, store: &str, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.insert((store.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        assert!(kv.get("memory", "snapshot").await.unwrap().is_none());

        kv.set("memory", "snapshot", b"blob").await.unwrap();
        assert_eq!(kv.get("memory", "snapshot").await.unwrap().unwrap(), b"blob");

        // Keys are scoped per store.
        assert!(kv.get("other", "snapshot").await.unwrap().is_none());
    }
}
