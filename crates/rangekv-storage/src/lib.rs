//! Range storage and background range maintenance.

pub mod engine;
pub mod error;
pub mod gc;
pub mod intent;
pub mod queue;
pub mod range;
pub mod scan_queue;
pub mod store;

pub use engine::{
    Engine, GcKey, GcResult, KeyVersions, MemoryEngine, MvccStats, MvccVersion, RangeStat,
    Snapshot, TxnMeta,
};
pub use error::{Error, Result};
pub use gc::{GcDecision, GcPolicy};
pub use intent::{
    EngineIntentResolver, IntentOutcome, IntentResolver, TxnRegistry, TxnStatus, TxnStatusOracle,
};
pub use queue::{BaseQueue, ItemSource, QueueImpl, Queueable};
pub use range::Range;
pub use scan_queue::{
    compute_priority, new_scan_queue, score_range, ScanPriority, ScanProcessor, ScanQueue,
    ScanReport, SCAN_QUEUE_MAX_SIZE, SCAN_QUEUE_NAME,
};
pub use store::Store;
