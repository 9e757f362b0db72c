//! Murmur Query Cache
//!
//! Normalized, deduplicated query cache for client applications:
//!
//! - **Entry store**: one entry per endpoint and argument, with status,
//!   subscriber count and eviction timer
//! - **Tag index**: which entries depend on which invalidation tags
//! - **Orchestrator**: [`QueryClient`] issues shared requests, settles them in
//!   order and refetches entries after tag invalidation
//! - **Real-time**: push batches are merged into subscribed collections
//! - **Metadata**: client-only read state for notifications
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! keep_unused_for_secs = 60
//! event_queue_limit = 256
//! realtime_enabled = true
//! ```

mod client;
mod config;
mod endpoint;
mod error;
mod events;
mod keys;
pub(crate) mod lock;
mod metadata;
mod normalize;
mod realtime;
mod registry;
mod store;

pub use client::{
    CachePatch, Condition, QueryClient, QueryClientBuilder, QueryOptions, QueryResult,
    QuerySource, Subscription,
};
pub use config::CacheConfig;
pub use endpoint::{
    ApiDefinition, BuildRequest, EndpointDefinition, EndpointKind, EntryData, ResponseShape,
    TagsFn,
};
pub use error::CacheError;
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use keys::{CacheKey, Tag, TagId};
pub use metadata::{MetadataProjector, NotificationMetadata};
pub use normalize::{
    Comparator, Entity, EntityAdapter, NormalizedCollection, Record, RecordError,
    field_descending,
};
pub use realtime::{PushSink, RealtimeEngine, StreamHandle, parse_frame};
pub use registry::TagIndex;
pub use store::{CacheEntry, Completion, EntrySnapshot, EntryStore, QueryStatus};
