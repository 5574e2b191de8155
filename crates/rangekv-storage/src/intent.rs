//! Resolution of abandoned write intents.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use rangekv_core::{CoreResult, Key, Timestamp};

use crate::engine::{Engine, TxnMeta};

/// Status of a transaction as recorded by its coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Pending,
    Committed(Timestamp),
    Aborted,
}

/// How an intent was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    Committed(Timestamp),
    Aborted,
}

/// Source of truth for transaction outcomes.
pub trait TxnStatusOracle: Send + Sync {
    /// Current status of `txn_id`. Unknown transactions are reported as aborted.
    fn status(&self, txn_id: Uuid) -> TxnStatus;

    /// Aborts a pending transaction and returns its final status. A transaction
    /// that already finished keeps its outcome.
    fn push_abort(&self, txn_id: Uuid) -> TxnStatus;
}

/// Resolves one write intent found by a scan.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve(&self, key: &Key, intent: &TxnMeta) -> CoreResult<IntentOutcome>;
}

/// In-memory transaction table.
#[derive(Debug, Default)]
pub struct TxnRegistry {
    txns: RwLock<HashMap<Uuid, TxnStatus>>,
}

impl TxnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending transaction.
    pub fn begin(&self, txn_id: Uuid) {
        self.txns.write().insert(txn_id, TxnStatus::Pending);
    }

    /// Marks a transaction committed at `timestamp`.
    pub fn commit(&self, txn_id: Uuid, timestamp: Timestamp) {
        self.txns
            .write()
            .insert(txn_id, TxnStatus::Committed(timestamp));
    }

    /// Marks a transaction aborted.
    pub fn abort(&self, txn_id: Uuid) {
        self.txns.write().insert(txn_id, TxnStatus::Aborted);
    }
}

impl TxnStatusOracle for TxnRegistry {
    fn status(&self, txn_id: Uuid) -> TxnStatus {
        self.txns
            .read()
            .get(&txn_id)
            .copied()
            .unwrap_or(TxnStatus::Aborted)
    }

    fn push_abort(&self, txn_id: Uuid) -> TxnStatus {
        let mut txns = self.txns.write();
        let status = txns.entry(txn_id).or_insert(TxnStatus::Aborted);
        if *status == TxnStatus::Pending {
            *status = TxnStatus::Aborted;
        }
        *status
    }
}

/// Resolves intents directly against the engine using a transaction oracle.
///
/// Only intents older than the scan's age threshold reach the resolver, so a
/// still-pending owner is considered abandoned and is push-aborted.
pub struct EngineIntentResolver<E: Engine> {
    engine: Arc<E>,
    oracle: Arc<dyn TxnStatusOracle>,
}

impl<E: Engine> EngineIntentResolver<E> {
    pub fn new(engine: Arc<E>, oracle: Arc<dyn TxnStatusOracle>) -> Self {
        Self { engine, oracle }
    }
}

#[async_trait]
impl<E: Engine> IntentResolver for EngineIntentResolver<E> {
    async fn resolve(&self, key: &Key, intent: &TxnMeta) -> CoreResult<IntentOutcome> {
        let status = match self.oracle.status(intent.txn_id) {
            TxnStatus::Pending => self.oracle.push_abort(intent.txn_id),
            status => status,
        };

        let outcome = match status {
            TxnStatus::Committed(timestamp) => IntentOutcome::Committed(timestamp),
            TxnStatus::Aborted | TxnStatus::Pending => IntentOutcome::Aborted,
        };
        let commit_ts = match outcome {
            IntentOutcome::Committed(timestamp) => Some(timestamp),
            IntentOutcome::Aborted => None,
        };

        self.engine
            .resolve_intent(key, intent.txn_id, commit_ts)?;
        tracing::debug!(
            key = %key,
            txn_id = %intent.txn_id,
            outcome = ?outcome,
            "Resolved write intent"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rangekv_core::{NodeId, RangeDescriptor, RangeId, Replica, StoreId};

    use crate::engine::MemoryEngine;

    fn setup() -> (Arc<MemoryEngine>, Arc<TxnRegistry>, EngineIntentResolver<MemoryEngine>) {
        let engine = Arc::new(MemoryEngine::new());
        let range_id = RangeId::new(1);
        engine
            .track_range(&RangeDescriptor::new(
                range_id,
                Key::MIN,
                Key::MAX,
                vec![Replica::new(NodeId::new(1), StoreId::new(1), range_id)],
            ))
            .unwrap();
        let registry = Arc::new(TxnRegistry::new());
        let resolver = EngineIntentResolver::new(Arc::clone(&engine), registry.clone());
        (engine, registry, resolver)
    }

    fn write_intent(engine: &MemoryEngine, key: &Key) -> TxnMeta {
        let txn = TxnMeta {
            txn_id: Uuid::new_v4(),
            timestamp: Timestamp::from_nanos(10),
        };
        engine
            .put_intent(key, txn, Some(Bytes::from("value")))
            .unwrap();
        txn
    }

    #[test]
    fn test_registry_push_abort() {
        let registry = TxnRegistry::new();
        let pending = Uuid::new_v4();
        let committed = Uuid::new_v4();
        registry.begin(pending);
        registry.commit(committed, Timestamp::from_nanos(3));

        assert_eq!(registry.push_abort(pending), TxnStatus::Aborted);
        assert_eq!(
            registry.push_abort(committed),
            TxnStatus::Committed(Timestamp::from_nanos(3))
        );
        assert_eq!(registry.status(Uuid::new_v4()), TxnStatus::Aborted);
    }

    #[tokio::test]
    async fn test_committed_transaction_commits_intent() {
        let (engine, registry, resolver) = setup();
        let key = Key::from("k");
        let txn = write_intent(&engine, &key);
        registry.commit(txn.txn_id, Timestamp::from_nanos(20));

        let outcome = resolver.resolve(&key, &txn).await.unwrap();
        assert_eq!(outcome, IntentOutcome::Committed(Timestamp::from_nanos(20)));
        assert_eq!(
            engine.get(&key, Timestamp::from_nanos(20)).unwrap(),
            Some(Bytes::from("value"))
        );
    }

    #[tokio::test]
    async fn test_pending_transaction_is_push_aborted() {
        let (engine, registry, resolver) = setup();
        let key = Key::from("k");
        let txn = write_intent(&engine, &key);
        registry.begin(txn.txn_id);

        let outcome = resolver.resolve(&key, &txn).await.unwrap();
        assert_eq!(outcome, IntentOutcome::Aborted);
        assert_eq!(registry.status(txn.txn_id), TxnStatus::Aborted);
        assert!(engine.versions(&key).is_empty());
    }
}
