//! Populates an in-memory store with ranges that need maintenance.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::Utc;
use clap::Args;
use uuid::Uuid;

use rangekv_core::{
    validate_coverage, ClusterId, Key, NodeId, RangeDescriptor, RangeId, Replica, ScanQueueConfig,
    StoreId, Timestamp,
};
use rangekv_storage::{
    EngineIntentResolver, IntentResolver, MemoryEngine, Store, TxnMeta, TxnRegistry,
};

const SEC: i64 = 1_000_000_000;
const HOUR: i64 = 3_600 * SEC;
const DAY: i64 = 24 * HOUR;

/// Shape of the generated data set.
#[derive(Args, Debug, Clone)]
pub struct SeedArgs {
    /// Number of adjacent ranges covering the key space
    #[arg(long, default_value_t = 8)]
    pub ranges: u64,

    /// Keys written per range
    #[arg(long, default_value_t = 64)]
    pub keys_per_range: u64,

    /// Versions written per key, one minute apart
    #[arg(long, default_value_t = 3)]
    pub versions: u64,

    /// Age in days of the newest version of every key
    #[arg(long, default_value_t = 2)]
    pub age_days: i64,

    /// Value size in bytes
    #[arg(long, default_value_t = 1024)]
    pub value_size: usize,

    /// Leave an abandoned write intent on every Nth key (0 disables)
    #[arg(long, default_value_t = 0)]
    pub intent_every: u64,

    /// Days since every range was last scanned (never scanned if unset)
    #[arg(long)]
    pub last_scan_days: Option<i64>,

    /// Damage the newest version of this key
    #[arg(long)]
    pub corrupt_key: Option<String>,
}

/// A seeded store and the resolver its scans should use.
pub struct Seeded {
    pub store: Arc<Store<MemoryEngine>>,
    pub resolver: Arc<dyn IntentResolver>,
}

fn range_key(range: u64) -> Key {
    Key::new(format!("range-{range:04}"))
}

fn data_key(range: u64, key: u64) -> Key {
    Key::new(format!("range-{range:04}/key-{key:05}"))
}

/// Builds the store described by `args`.
pub fn seed_store(args: &SeedArgs, config: &ScanQueueConfig) -> Result<Seeded> {
    anyhow::ensure!(args.ranges > 0, "--ranges must be at least 1");
    anyhow::ensure!(args.versions > 0, "--versions must be at least 1");

    let engine = Arc::new(MemoryEngine::new());
    let store = Arc::new(Store::new(
        ClusterId::new(),
        NodeId::new(1),
        StoreId::new(1),
        Arc::clone(&engine),
        config.gc_ttl_seconds,
    ));
    let registry = Arc::new(TxnRegistry::new());
    let resolver: Arc<dyn IntentResolver> =
        Arc::new(EngineIntentResolver::new(Arc::clone(&engine), registry.clone()));

    let bound = |i: u64| match i {
        0 => Key::MIN,
        i if i == args.ranges => Key::MAX,
        i => range_key(i),
    };
    let descs: Vec<RangeDescriptor> = (0..args.ranges)
        .map(|i| {
            let range_id = RangeId::new(i + 1);
            RangeDescriptor::new(
                range_id,
                bound(i),
                bound(i + 1),
                vec![Replica::new(NodeId::new(1), StoreId::new(1), range_id)],
            )
        })
        .collect();
    validate_coverage(&descs).context("generated ranges do not cover the key space")?;
    for desc in descs {
        store.add_range(desc)?;
    }

    let now = Timestamp::from_datetime(Utc::now()).wall_time;
    let newest = now - args.age_days * DAY;
    let value = Bytes::from(vec![0x5a; args.value_size]);
    let mut written = 0u64;

    for range in 0..args.ranges {
        for k in 0..args.keys_per_range {
            let key = data_key(range, k);
            for v in (0..args.versions).rev() {
                let at = Timestamp::from_nanos(newest - v as i64 * 60 * SEC);
                engine.put(&key, at, value.clone())?;
            }
            written += 1;

            if args.intent_every > 0 && written % args.intent_every == 0 {
                let txn = TxnMeta {
                    txn_id: Uuid::new_v4(),
                    timestamp: Timestamp::from_nanos(newest + SEC),
                };
                registry.begin(txn.txn_id);
                engine.put_intent(&key, txn, Some(value.clone()))?;
            }
        }
    }

    if let Some(days) = args.last_scan_days {
        for range in store.ranges() {
            range.update_scan_metadata(|meta| meta.last_scan_nanos = now - days * DAY);
        }
    }

    if let Some(key) = &args.corrupt_key {
        let key = Key::new(key.clone());
        engine
            .corrupt_version(&key, Timestamp::from_nanos(newest))
            .with_context(|| format!("cannot corrupt key {key}"))?;
    }

    tracing::info!(
        ranges = args.ranges,
        keys = written,
        versions = args.versions,
        "Seeded in-memory store"
    );

    Ok(Seeded { store, resolver })
}
