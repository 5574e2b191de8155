//! Core domain types for rangekv range maintenance.

pub mod config;
pub mod error;
pub mod ids;
pub mod key;
pub mod metrics;
pub mod range;
pub mod scan;

pub use config::{LoggingConfig, RangeKvConfig, ScanQueueConfig};
pub use error::{CoreError, CoreResult};
pub use ids::{ClusterId, NodeId, RangeId, StoreId};
pub use key::{Key, Timestamp};
pub use range::{validate_coverage, RangeDescriptor, RangeMetadata, Replica};
pub use scan::{GcMetadata, ScanMetadata, DEFAULT_GC_TTL_SECONDS, GC_BUCKETS};
