//! Job Broker Interface (C8, spec §4.8): durable enqueue/claim/ack with
//! delayed delivery and deduplication. Polymorphic over the capability
//! set — the only implementation shipped here is the SQLite-backed one,
//! but the Scheduler/Dispatcher depend on the trait, not the table.

pub mod sqlite;

use async_trait::async_trait;

use crate::error::BrokerError;

/// A claimed job handle. Opaque to callers beyond what `ack`/`nack` need.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
    pub queue: String,
}

/// Options accepted by `enqueue` (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub delay_ms: u64,
    pub dedup_key: Option<String>,
}

#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Durably enqueue `payload` on `queue`. A `dedup_key` collision
    /// within the dedup window is a no-op success (spec §4.8's
    /// double-materialization guard), not an error.
    async fn enqueue(&self, queue: &str, payload: &str, options: EnqueueOptions) -> Result<(), BrokerError>;

    /// Claim one visible job, if any, making it invisible to other
    /// claimers for `visibility_timeout_ms`.
    async fn claim(&self, queue: &str, visibility_timeout_ms: u64) -> Result<Option<(JobHandle, String)>, BrokerError>;

    async fn ack(&self, handle: &JobHandle) -> Result<(), BrokerError>;

    /// Release a claimed job back to the queue, visible again after
    /// `requeue_delay_ms` (spec §4.7's retry re-enqueue).
    async fn nack(&self, handle: &JobHandle, requeue_delay_ms: u64) -> Result<(), BrokerError>;
}
