//! No-op backends for wiring tests and dry runs.

use crate::config::MiddleConfig;
use crate::error::MiddleError;
use crate::middle::{Middle, MiddleQuery, Output};
use crate::osm::{Member, NodeRecord, OsmId, OsmNode, Relation, ResolvedWay, Tags};

/// Output stage that discards every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl Output for NullOutput {
    fn pending_way(&mut self, _id: OsmId, _tags: &Tags, _nodes: &[OsmNode], _exists: bool) {}

    fn pending_relation(
        &mut self,
        _id: OsmId,
        _members: &[Member],
        _tags: &Tags,
        _exists: bool,
    ) {
    }
}

/// Middle backend that stores nothing and finds nothing.
///
/// Useful for exercising the surrounding pipeline without a staging store;
/// every write succeeds, every read misses.
#[derive(Debug, Default)]
pub struct NullMiddle;

impl MiddleQuery for NullMiddle {
    fn node_get(&mut self, _id: OsmId) -> Result<Option<NodeRecord>, MiddleError> {
        Ok(None)
    }

    fn nodes_get_list(
        &mut self,
        _out: &mut [OsmNode],
        _ids: &[OsmId],
    ) -> Result<usize, MiddleError> {
        Ok(0)
    }

    fn way_get(&mut self, _id: OsmId) -> Result<Option<ResolvedWay>, MiddleError> {
        Ok(None)
    }

    fn ways_get_list(&mut self, _ids: &[OsmId]) -> Result<Vec<ResolvedWay>, MiddleError> {
        Ok(Vec::new())
    }

    fn relation_get(&mut self, _id: OsmId) -> Result<Option<Relation>, MiddleError> {
        Ok(None)
    }

    fn relations_using_way(&mut self, _way_id: OsmId) -> Result<Vec<OsmId>, MiddleError> {
        Ok(Vec::new())
    }
}

impl Middle for NullMiddle {
    fn start(&mut self, _config: &MiddleConfig) -> Result<(), MiddleError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MiddleError> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), MiddleError> {
        Ok(())
    }

    fn end(&mut self) -> Result<(), MiddleError> {
        Ok(())
    }

    fn analyze(&mut self) -> Result<(), MiddleError> {
        Ok(())
    }

    fn node_set(
        &mut self,
        _id: OsmId,
        _lat: f64,
        _lon: f64,
        _tags: &Tags,
    ) -> Result<(), MiddleError> {
        Ok(())
    }

    fn node_delete(&mut self, _id: OsmId) -> Result<(), MiddleError> {
        Ok(())
    }

    fn node_changed(&mut self, _id: OsmId) -> Result<(), MiddleError> {
        Ok(())
    }

    fn way_set(
        &mut self,
        _id: OsmId,
        _nodes: &[OsmId],
        _tags: &Tags,
    ) -> Result<(), MiddleError> {
        Ok(())
    }

    fn way_delete(&mut self, _id: OsmId) -> Result<(), MiddleError> {
        Ok(())
    }

    fn way_changed(&mut self, _id: OsmId) -> Result<(), MiddleError> {
        Ok(())
    }

    fn relation_set(
        &mut self,
        _id: OsmId,
        _members: &[Member],
        _tags: &Tags,
    ) -> Result<(), MiddleError> {
        Ok(())
    }

    fn relation_delete(&mut self, _id: OsmId) -> Result<(), MiddleError> {
        Ok(())
    }

    fn relation_changed(&mut self, _id: OsmId) -> Result<(), MiddleError> {
        Ok(())
    }

    fn iterate_ways(&mut self, _output: &mut dyn Output) -> Result<(), MiddleError> {
        Ok(())
    }

    fn iterate_relations(&mut self, _output: &mut dyn Output) -> Result<(), MiddleError> {
        Ok(())
    }
}
