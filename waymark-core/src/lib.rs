//! Core domain types and capability traits for the Waymark staging layer.
//!
//! The staging ("middle") layer of an OSM import pipeline absorbs the
//! node/way/relation event stream into a relational staging store and serves
//! random-access lookups to the output stage. This crate defines the types
//! that cross that boundary and the [`Middle`]/[`MiddleQuery`] traits the
//! store implementations fulfil; the production implementation lives in
//! `waymark-staging`.

#![forbid(unsafe_code)]

mod config;
mod error;
mod id_tracker;
mod middle;
mod null;
mod osm;

pub use config::{
    CoordMode, MiddleConfig, ALLOC_DENSE, ALLOC_DENSE_CHUNK, ALLOC_LOSSY, ALLOC_SPARSE,
};
pub use error::MiddleError;
pub use id_tracker::IdTracker;
pub use middle::{Middle, MiddleQuery, Output};
pub use null::{NullMiddle, NullOutput};
pub use osm::{
    double_to_fix, fix_to_double, tag_value, Member, MemberType, NodeRecord, OsmId, OsmNode,
    Relation, ResolvedWay, Tags, ID_NONE,
};
