//! In-process shared store
//!
//! Every handle cloned from one `MemoryStore` sees the same keys and channels,
//! which lets several sync instances run side by side in one process.

use super::{SharedStore, StoreError, Subscription};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    values: RwLock<HashMap<String, Vec<u8>>>,
    channels: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscribers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .read()
            .get(channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        let mut channels = self.inner.channels.write();
        if let Some(senders) = channels.get_mut(channel) {
            // Drop subscribers whose receiver is gone
            senders.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.values.write().insert(key.to_string(), value);
        Ok(())
    }
}
