//! NCR-State: records, collaborator traits and SurrealDB backends for NCR Sync
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: record identity, optimistic concurrency, event-sourced state.
//!
//! ## Key Components
//!
//! - `Record` / `RecordRef` / `VersionToken`: the node model and its etag
//! - `Context`: immutable run context (tenant, operation flags)
//! - `KindRegistry`: which kinds exist and what they implement
//! - `Repository`, `SearchIndex`, `EventStore`, `AggregateResolver`: the
//!   collaborators a pipeline talks to, with in-memory fakes and SurrealDB
//!   implementations

pub mod aggregate;
pub mod context;
mod error;
pub mod events;
pub mod fakes;
mod handle;
mod migrations;
pub mod record;
pub mod registry;
mod schema;
pub mod storage_traits;
pub mod surreal_events;
pub mod surreal_repository;
pub mod surreal_search;

pub use aggregate::{EventSourcedAggregate, EventSourcedResolver};
pub use context::Context;
pub use error::{StateError, StorageError};
pub use events::{EventKind, RecordEvent};
pub use handle::{CloudConfig, SurrealHandle, DEFAULT_LOCAL_PATH};
pub use record::{Record, RecordKind, RecordRef, RecordStatus, VersionToken};
pub use registry::{Capability, KindDescriptor, KindRegistry, RecordKindSelector};
pub use storage_traits::{
    Aggregate, AggregateResolver, EventStore, RecordStream, Repository, SearchIndex,
    StorageResult,
};
pub use surreal_events::SurrealEventStore;
pub use surreal_repository::SurrealRepository;
pub use surreal_search::SurrealSearchIndex;

/// Result type for ncr-state setup operations
pub type Result<T> = std::result::Result<T, StateError>;
