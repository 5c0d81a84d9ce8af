//! Facade crate for the Waymark OSM staging layer.
//!
//! This crate re-exports the domain types and capability traits from
//! `waymark-core` together with the staging-store implementation from
//! `waymark-staging`.

#![forbid(unsafe_code)]

pub use waymark_core::{
    CoordMode, IdTracker, Member, MemberType, Middle, MiddleConfig, MiddleError, MiddleQuery,
    NodeRecord, NullMiddle, NullOutput, OsmId, OsmNode, Output, Relation, ResolvedWay, Tags,
    ID_NONE,
};

pub use waymark_staging::{
    NodeRamCache, PersistentNodeCache, PgStoreDriver, StagingMiddle, StoreConnection, StoreDriver,
};
