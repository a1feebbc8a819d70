//! Shared key-value / pub-sub store abstraction
//!
//! Instances coordinate only through this store. It must offer:
//! - `publish` / `subscribe` on named channels, delivering every payload to
//!   every live subscriber
//! - `get` / `set` of opaque values, used for the authoritative snapshot
//!
//! [`MemoryStore`] implements it in-process; a Redis or Postgres adapter plugs
//! in through the same trait.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Payload stream of one channel subscription
pub type Subscription = mpsc::UnboundedReceiver<Vec<u8>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store connection closed")]
    Closed,
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Deliver `payload` to every subscriber of `channel`
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError>;

    /// Receive every payload published on `channel` from now on
    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}
