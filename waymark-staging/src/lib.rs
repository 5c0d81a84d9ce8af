//! Staging ("middle") layer of an OSM import pipeline.
//!
//! Responsibilities:
//! - Absorb the node/way/relation event firehose into a relational staging
//!   store, streaming bulk inserts per table.
//! - Keep a layered node-coordinate cache (RAM, optional flat file, store)
//!   with read-through/write-through semantics.
//! - Track pending ways/relations discovered by change events and drive the
//!   second pass over them.
//!
//! Boundaries:
//! - The OSM file parser and the output stage are external collaborators;
//!   only the event and callback surfaces defined in `waymark-core` cross
//!   the boundary.
//! - No logger is installed here; progress goes through the `log` facade.

#![forbid(unsafe_code)]

pub mod codec;
pub mod flat_file;
pub mod middle;
pub mod ram_cache;
pub mod store;

pub use flat_file::PersistentNodeCache;
pub use middle::StagingMiddle;
pub use ram_cache::NodeRamCache;
pub use store::memory::MemoryStoreDriver;
pub use store::postgres::PgStoreDriver;
pub use store::{StoreConnection, StoreDriver};
