//! Capability traits of the staging middle layer.
//!
//! [`MiddleQuery`] is the random-access read surface the output stage uses
//! while building geometries; [`Middle`] adds the ingest, change-propagation
//! and lifecycle operations the diff applier drives. Alternative backends
//! (no-op, RAM-only) implement the same traits so integration harnesses can
//! swap the store out.

use crate::config::MiddleConfig;
use crate::error::MiddleError;
use crate::osm::{Member, NodeRecord, OsmId, OsmNode, Relation, ResolvedWay, Tags};

/// Callbacks invoked by the second pass over pending entities.
///
/// `exists` signals that the entity may already be present in the output
/// tables and must be handled as an upsert.
pub trait Output {
    fn pending_way(&mut self, id: OsmId, tags: &Tags, nodes: &[OsmNode], exists: bool);
    fn pending_relation(&mut self, id: OsmId, members: &[Member], tags: &Tags, exists: bool);
}

/// Random-access read surface over the staging store.
pub trait MiddleQuery {
    /// Resolve a single node coordinate through the cache hierarchy.
    ///
    /// Tags are populated only when the staging store itself answered; cache
    /// hits resolve coordinates alone.
    fn node_get(&mut self, id: OsmId) -> Result<Option<NodeRecord>, MiddleError>;

    /// Batched coordinate lookup.
    ///
    /// `out` must be the same length as `ids`. Hydrated entries are
    /// left-packed into a contiguous prefix, preserving their relative
    /// order, and the prefix length is returned. Callers must not rely on a
    /// positional mapping between `ids` and `out` when the count is short:
    /// unresolved references are dropped by design.
    fn nodes_get_list(
        &mut self,
        out: &mut [OsmNode],
        ids: &[OsmId],
    ) -> Result<usize, MiddleError>;

    /// Fetch a way and resolve its node references to coordinates.
    fn way_get(&mut self, id: OsmId) -> Result<Option<ResolvedWay>, MiddleError>;

    /// Batched way fetch. Rows come back in request order; ids without a
    /// stored way are skipped.
    fn ways_get_list(&mut self, ids: &[OsmId]) -> Result<Vec<ResolvedWay>, MiddleError>;

    /// Fetch a relation with its decoded member list.
    fn relation_get(&mut self, id: OsmId) -> Result<Option<Relation>, MiddleError>;

    /// Ids of relations that reference `way_id` in their way range.
    fn relations_using_way(&mut self, way_id: OsmId) -> Result<Vec<OsmId>, MiddleError>;
}

/// Full staging-layer capability set: ingest, change propagation, the
/// pending second pass, and lifecycle control.
pub trait Middle: MiddleQuery {
    fn start(&mut self, config: &MiddleConfig) -> Result<(), MiddleError>;
    /// Finalise the staging tables (index or drop them) and release every
    /// connection.
    fn stop(&mut self) -> Result<(), MiddleError>;
    /// Leave bulk-insert mode and commit any open per-table transaction.
    fn commit(&mut self) -> Result<(), MiddleError>;
    /// Leave bulk-insert mode without committing.
    fn end(&mut self) -> Result<(), MiddleError>;
    /// Refresh store statistics on the staging tables.
    fn analyze(&mut self) -> Result<(), MiddleError>;

    fn node_set(
        &mut self,
        id: OsmId,
        lat: f64,
        lon: f64,
        tags: &Tags,
    ) -> Result<(), MiddleError>;
    fn node_delete(&mut self, id: OsmId) -> Result<(), MiddleError>;
    /// Propagate a node change: every way and relation that references the
    /// node directly becomes pending.
    fn node_changed(&mut self, id: OsmId) -> Result<(), MiddleError>;

    fn way_set(&mut self, id: OsmId, nodes: &[OsmId], tags: &Tags) -> Result<(), MiddleError>;
    fn way_delete(&mut self, id: OsmId) -> Result<(), MiddleError>;
    /// Propagate a way change: every relation whose way range contains the
    /// way becomes pending.
    fn way_changed(&mut self, id: OsmId) -> Result<(), MiddleError>;

    fn relation_set(
        &mut self,
        id: OsmId,
        members: &[Member],
        tags: &Tags,
    ) -> Result<(), MiddleError>;
    /// Delete a relation and mark its member ways pending, since they may
    /// lose derived output along with their membership.
    fn relation_delete(&mut self, id: OsmId) -> Result<(), MiddleError>;
    /// Propagate a relation change to enclosing relations.
    fn relation_changed(&mut self, id: OsmId) -> Result<(), MiddleError>;

    /// Drain pending ways through `output`, each exactly once.
    fn iterate_ways(&mut self, output: &mut dyn Output) -> Result<(), MiddleError>;
    /// Drain pending relations through `output`, each exactly once.
    fn iterate_relations(&mut self, output: &mut dyn Output) -> Result<(), MiddleError>;

    // Upstream event surface. `add` is a plain set; `modify` is last-write-
    // wins (delete + set) plus the mark rules for the changed entity.

    fn node_add(
        &mut self,
        id: OsmId,
        lat: f64,
        lon: f64,
        tags: &Tags,
    ) -> Result<(), MiddleError> {
        self.node_set(id, lat, lon, tags)
    }

    fn node_modify(
        &mut self,
        id: OsmId,
        lat: f64,
        lon: f64,
        tags: &Tags,
    ) -> Result<(), MiddleError> {
        self.node_delete(id)?;
        self.node_set(id, lat, lon, tags)?;
        self.node_changed(id)
    }

    fn way_add(&mut self, id: OsmId, nodes: &[OsmId], tags: &Tags) -> Result<(), MiddleError> {
        self.way_set(id, nodes, tags)
    }

    fn way_modify(
        &mut self,
        id: OsmId,
        nodes: &[OsmId],
        tags: &Tags,
    ) -> Result<(), MiddleError> {
        self.way_delete(id)?;
        self.way_set(id, nodes, tags)?;
        self.way_changed(id)
    }

    fn relation_add(
        &mut self,
        id: OsmId,
        members: &[Member],
        tags: &Tags,
    ) -> Result<(), MiddleError> {
        self.relation_set(id, members, tags)
    }

    fn relation_modify(
        &mut self,
        id: OsmId,
        members: &[Member],
        tags: &Tags,
    ) -> Result<(), MiddleError> {
        self.relation_delete(id)?;
        self.relation_set(id, members, tags)?;
        self.relation_changed(id)
    }
}
