//! In-memory staging store backend.
//!
//! A functional twin of the live backend used by unit and integration
//! tests: it interprets the prepared-operation surface and the streaming
//! copy rows against plain maps, sharing one database across the per-table
//! connections. Copy rows pass through the same unescaping layers as the
//! real channel, so the streaming codec is exercised end to end.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use waymark_core::{MiddleError, OsmId};

use super::{ops, Rows, StoreConnection, StoreDriver};
use crate::codec;

#[derive(Debug, Clone)]
struct NodeRow {
    lat: String,
    lon: String,
    tags: Option<String>,
}

#[derive(Debug, Clone)]
struct WayRow {
    nodes: Vec<OsmId>,
    nodes_text: String,
    tags: Option<String>,
}

#[derive(Debug, Clone)]
struct RelRow {
    way_off: usize,
    rel_off: usize,
    parts: Vec<OsmId>,
    members: Option<String>,
    member_count: usize,
    tags: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryDb {
    nodes: BTreeMap<OsmId, NodeRow>,
    ways: BTreeMap<OsmId, WayRow>,
    rels: BTreeMap<OsmId, RelRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyTarget {
    Nodes,
    Ways,
    Rels,
}

/// Shared in-memory staging store; every connection sees the same data.
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreDriver {
    db: Arc<Mutex<MemoryDb>>,
}

impl MemoryStoreDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw persisted relation row `(way_off, rel_off, parts)`, for
    /// assertions on the member partitioning.
    #[must_use]
    pub fn raw_relation(&self, id: OsmId) -> Option<(usize, usize, Vec<OsmId>)> {
        let db = self.db.lock().ok()?;
        db.rels
            .get(&id)
            .map(|row| (row.way_off, row.rel_off, row.parts.clone()))
    }

    /// Ids currently present in the nodes table.
    #[must_use]
    pub fn node_ids(&self) -> Vec<OsmId> {
        self.db
            .lock()
            .map(|db| db.nodes.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl StoreDriver for MemoryStoreDriver {
    fn connect(&self, _conninfo: &str) -> Result<Box<dyn StoreConnection>, MiddleError> {
        Ok(Box::new(MemoryConnection {
            db: Arc::clone(&self.db),
            registered: HashSet::new(),
            copy_target: None,
        }))
    }
}

struct MemoryConnection {
    db: Arc<Mutex<MemoryDb>>,
    registered: HashSet<String>,
    copy_target: Option<CopyTarget>,
}

fn protocol(message: impl Into<String>) -> MiddleError {
    MiddleError::Protocol(message.into())
}

fn duplicate_key(table: &str) -> MiddleError {
    MiddleError::Store {
        op: format!("insert_{table}"),
        message: format!("duplicate key value violates unique constraint \"{table}_pkey\""),
    }
}

fn parse_id(text: &str) -> Result<OsmId, MiddleError> {
    text.parse::<OsmId>().map_err(|_| {
        MiddleError::MalformedData {
            context: "id parameter",
            text: text.to_owned(),
        }
    })
}

fn parse_offset(text: &str) -> Result<usize, MiddleError> {
    text.parse::<usize>().map_err(|_| {
        MiddleError::MalformedData {
            context: "member offset parameter",
            text: text.to_owned(),
        }
    })
}

fn required<'a>(params: &[Option<&'a str>], index: usize) -> Result<&'a str, MiddleError> {
    params
        .get(index)
        .copied()
        .flatten()
        .ok_or_else(|| protocol(format!("missing required parameter ${}", index + 1)))
}

fn optional<'a>(params: &[Option<&'a str>], index: usize) -> Option<&'a str> {
    params.get(index).copied().flatten()
}

fn insert_node(
    db: &mut MemoryDb,
    id: &str,
    lat: &str,
    lon: &str,
    tags: Option<&str>,
) -> Result<(), MiddleError> {
    let id = parse_id(id)?;
    if db.nodes.contains_key(&id) {
        return Err(duplicate_key("nodes"));
    }
    db.nodes.insert(
        id,
        NodeRow {
            lat: lat.to_owned(),
            lon: lon.to_owned(),
            tags: tags.map(str::to_owned),
        },
    );
    Ok(())
}

fn insert_way(
    db: &mut MemoryDb,
    id: &str,
    nodes: &str,
    tags: Option<&str>,
) -> Result<(), MiddleError> {
    let id = parse_id(id)?;
    if db.ways.contains_key(&id) {
        return Err(duplicate_key("ways"));
    }
    let node_ids = codec::decode_ids(nodes, None)?;
    db.ways.insert(
        id,
        WayRow {
            nodes: node_ids,
            nodes_text: nodes.to_owned(),
            tags: tags.map(str::to_owned),
        },
    );
    Ok(())
}

fn insert_rel(
    db: &mut MemoryDb,
    id: &str,
    way_off: &str,
    rel_off: &str,
    parts: &str,
    members: Option<&str>,
    tags: Option<&str>,
) -> Result<(), MiddleError> {
    let id = parse_id(id)?;
    if db.rels.contains_key(&id) {
        return Err(duplicate_key("rels"));
    }
    let member_count = match members {
        Some(text) => codec::decode_text_array(text)?.len() / 2,
        None => 0,
    };
    db.rels.insert(
        id,
        RelRow {
            way_off: parse_offset(way_off)?,
            rel_off: parse_offset(rel_off)?,
            parts: codec::decode_ids(parts, None)?,
            members: members.map(str::to_owned),
            member_count,
            tags: tags.map(str::to_owned),
        },
    );
    Ok(())
}

fn id_rows<I: IntoIterator<Item = OsmId>>(ids: I) -> Rows {
    ids.into_iter()
        .map(|id| vec![Some(id.to_string())])
        .collect()
}

impl MemoryConnection {
    fn lock(&self) -> Result<MutexGuard<'_, MemoryDb>, MiddleError> {
        self.db
            .lock()
            .map_err(|_| protocol("memory store mutex poisoned"))
    }
}

impl StoreConnection for MemoryConnection {
    fn batch(&mut self, sql: &str) -> Result<(), MiddleError> {
        if sql.starts_with("DROP TABLE") {
            let mut db = self.lock()?;
            if sql.contains("_nodes") {
                db.nodes.clear();
            } else if sql.contains("_ways") {
                db.ways.clear();
            } else if sql.contains("_rels") {
                db.rels.clear();
            }
        }
        // DDL, transaction control and maintenance are otherwise no-ops.
        Ok(())
    }

    fn query(&mut self, _sql: &str) -> Result<Rows, MiddleError> {
        // Startup sanity checks find nothing to object to here.
        Ok(Rows::new())
    }

    fn prepare(&mut self, name: &str, _sql: &str, _params: usize) -> Result<(), MiddleError> {
        self.registered.insert(name.to_owned());
        Ok(())
    }

    fn exec_prepared(
        &mut self,
        name: &str,
        params: &[Option<&str>],
    ) -> Result<Rows, MiddleError> {
        if !self.registered.contains(name) {
            return Err(protocol(format!(
                "prepared statement {name} was never registered"
            )));
        }
        let mut db = self.lock()?;

        match name {
            ops::INSERT_NODE => {
                insert_node(
                    &mut db,
                    required(params, 0)?,
                    required(params, 1)?,
                    required(params, 2)?,
                    optional(params, 3),
                )?;
                Ok(Rows::new())
            }
            ops::GET_NODE => {
                let id = parse_id(required(params, 0)?)?;
                Ok(db
                    .nodes
                    .get(&id)
                    .map(|row| {
                        vec![vec![
                            Some(row.lat.clone()),
                            Some(row.lon.clone()),
                            row.tags.clone(),
                        ]]
                    })
                    .unwrap_or_default())
            }
            ops::GET_NODE_LIST => {
                let ids: BTreeSet<OsmId> = codec::decode_ids(required(params, 0)?, None)?
                    .into_iter()
                    .collect();
                Ok(ids
                    .into_iter()
                    .filter_map(|id| {
                        db.nodes.get(&id).map(|row| {
                            vec![
                                Some(id.to_string()),
                                Some(row.lat.clone()),
                                Some(row.lon.clone()),
                            ]
                        })
                    })
                    .collect())
            }
            ops::DELETE_NODE => {
                let id = parse_id(required(params, 0)?)?;
                db.nodes.remove(&id);
                Ok(Rows::new())
            }
            ops::INSERT_WAY => {
                insert_way(
                    &mut db,
                    required(params, 0)?,
                    required(params, 1)?,
                    optional(params, 2),
                )?;
                Ok(Rows::new())
            }
            ops::GET_WAY => {
                let id = parse_id(required(params, 0)?)?;
                Ok(db
                    .ways
                    .get(&id)
                    .map(|row| {
                        vec![vec![
                            Some(row.nodes_text.clone()),
                            row.tags.clone(),
                            Some(row.nodes.len().to_string()),
                        ]]
                    })
                    .unwrap_or_default())
            }
            ops::GET_WAY_LIST => {
                let ids: BTreeSet<OsmId> = codec::decode_ids(required(params, 0)?, None)?
                    .into_iter()
                    .collect();
                Ok(ids
                    .into_iter()
                    .filter_map(|id| {
                        db.ways.get(&id).map(|row| {
                            vec![
                                Some(id.to_string()),
                                Some(row.nodes_text.clone()),
                                row.tags.clone(),
                                Some(row.nodes.len().to_string()),
                            ]
                        })
                    })
                    .collect())
            }
            ops::DELETE_WAY => {
                let id = parse_id(required(params, 0)?)?;
                db.ways.remove(&id);
                Ok(Rows::new())
            }
            ops::MARK_WAYS_BY_NODE => {
                let id = parse_id(required(params, 0)?)?;
                Ok(id_rows(
                    db.ways
                        .iter()
                        .filter(|(_, row)| row.nodes.contains(&id))
                        .map(|(way_id, _)| *way_id),
                ))
            }
            ops::MARK_WAYS_BY_REL => {
                let id = parse_id(required(params, 0)?)?;
                let way_refs: BTreeSet<OsmId> = db
                    .rels
                    .get(&id)
                    .map(|row| {
                        row.parts[row.way_off.min(row.parts.len())..row.rel_off.min(row.parts.len())]
                            .iter()
                            .copied()
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(id_rows(
                    way_refs
                        .into_iter()
                        .filter(|way_id| db.ways.contains_key(way_id)),
                ))
            }
            ops::INSERT_REL => {
                insert_rel(
                    &mut db,
                    required(params, 0)?,
                    required(params, 1)?,
                    required(params, 2)?,
                    required(params, 3)?,
                    optional(params, 4),
                    optional(params, 5),
                )?;
                Ok(Rows::new())
            }
            ops::GET_REL => {
                let id = parse_id(required(params, 0)?)?;
                Ok(db
                    .rels
                    .get(&id)
                    .map(|row| {
                        vec![vec![
                            row.members.clone(),
                            row.tags.clone(),
                            row.members
                                .as_ref()
                                .map(|_| row.member_count.to_string()),
                        ]]
                    })
                    .unwrap_or_default())
            }
            ops::DELETE_REL => {
                let id = parse_id(required(params, 0)?)?;
                db.rels.remove(&id);
                Ok(Rows::new())
            }
            ops::RELS_USING_WAY | ops::MARK_RELS_BY_WAY => {
                let id = parse_id(required(params, 0)?)?;
                Ok(id_rows(
                    db.rels
                        .iter()
                        .filter(|(_, row)| {
                            row.parts[row.way_off.min(row.parts.len())
                                ..row.rel_off.min(row.parts.len())]
                                .contains(&id)
                        })
                        .map(|(rel_id, _)| *rel_id),
                ))
            }
            ops::MARK_RELS_BY_NODE => {
                let id = parse_id(required(params, 0)?)?;
                Ok(id_rows(
                    db.rels
                        .iter()
                        .filter(|(_, row)| {
                            row.parts[..row.way_off.min(row.parts.len())].contains(&id)
                        })
                        .map(|(rel_id, _)| *rel_id),
                ))
            }
            ops::MARK_RELS => {
                let id = parse_id(required(params, 0)?)?;
                Ok(id_rows(
                    db.rels
                        .iter()
                        .filter(|(_, row)| {
                            row.parts[row.rel_off.min(row.parts.len())..].contains(&id)
                        })
                        .map(|(rel_id, _)| *rel_id),
                ))
            }
            other => Err(protocol(format!("unknown prepared operation {other}"))),
        }
    }

    fn copy_begin(&mut self, sql: &str) -> Result<(), MiddleError> {
        self.copy_target = Some(if sql.contains("_nodes") {
            CopyTarget::Nodes
        } else if sql.contains("_ways") {
            CopyTarget::Ways
        } else if sql.contains("_rels") {
            CopyTarget::Rels
        } else {
            return Err(protocol(format!("unrecognised copy target in {sql:?}")));
        });
        Ok(())
    }

    fn copy_row(&mut self, row: &str) -> Result<(), MiddleError> {
        let target = self
            .copy_target
            .ok_or_else(|| protocol("copy_row without an open streaming insert"))?;
        let fields = codec::split_copy_row(row);
        let field = |index: usize| -> Result<&str, MiddleError> {
            fields
                .get(index)
                .and_then(Option::as_deref)
                .ok_or_else(|| protocol(format!("copy row field {index} missing in {row:?}")))
        };

        let mut db = self.lock()?;
        match target {
            CopyTarget::Nodes => insert_node(
                &mut db,
                field(0)?,
                field(1)?,
                field(2)?,
                fields.get(3).and_then(Option::as_deref),
            ),
            CopyTarget::Ways => insert_way(
                &mut db,
                field(0)?,
                field(1)?,
                fields.get(2).and_then(Option::as_deref),
            ),
            CopyTarget::Rels => insert_rel(
                &mut db,
                field(0)?,
                field(1)?,
                field(2)?,
                field(3)?,
                fields.get(4).and_then(Option::as_deref),
                fields.get(5).and_then(Option::as_deref),
            ),
        }
    }

    fn copy_end(&mut self) -> Result<(), MiddleError> {
        if self.copy_target.take().is_none() {
            return Err(protocol("copy_end without an open streaming insert"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn connection(driver: &MemoryStoreDriver) -> Box<dyn StoreConnection> {
        let mut conn = driver.connect("").expect("connect");
        for name in [
            ops::INSERT_NODE,
            ops::GET_NODE,
            ops::GET_NODE_LIST,
            ops::DELETE_NODE,
            ops::INSERT_WAY,
            ops::GET_WAY,
            ops::MARK_WAYS_BY_NODE,
            ops::INSERT_REL,
            ops::GET_REL,
            ops::MARK_RELS_BY_NODE,
        ] {
            conn.prepare(name, "", 1).expect("prepare");
        }
        conn
    }

    #[rstest]
    fn prepared_insert_then_get_round_trips() {
        let driver = MemoryStoreDriver::new();
        let mut conn = connection(&driver);
        conn.exec_prepared(
            ops::INSERT_NODE,
            &[
                Some("1"),
                Some("52.5"),
                Some("13.4"),
                Some(r#"{"name","X"}"#),
            ],
        )
        .expect("insert");

        let rows = conn.exec_prepared(ops::GET_NODE, &[Some("1")]).expect("get");
        assert_eq!(
            rows,
            vec![vec![
                Some("52.5".to_owned()),
                Some("13.4".to_owned()),
                Some(r#"{"name","X"}"#.to_owned()),
            ]]
        );
    }

    #[rstest]
    fn duplicate_insert_reports_a_unique_violation() {
        let driver = MemoryStoreDriver::new();
        let mut conn = connection(&driver);
        let params = [Some("1"), Some("0"), Some("0"), None];
        conn.exec_prepared(ops::INSERT_NODE, &params).expect("insert");
        let err = conn
            .exec_prepared(ops::INSERT_NODE, &params)
            .expect_err("duplicate");
        assert!(matches!(err, MiddleError::Store { .. }));
    }

    #[rstest]
    fn copy_rows_land_in_the_right_table() {
        let driver = MemoryStoreDriver::new();
        let mut conn = connection(&driver);
        conn.copy_begin("COPY osm_nodes FROM STDIN").expect("begin");
        conn.copy_row("7\t1.0000000000\t2.0000000000\t\\N\n")
            .expect("row");
        conn.copy_end().expect("end");

        assert_eq!(driver.node_ids(), vec![7]);
        let rows = conn.exec_prepared(ops::GET_NODE, &[Some("7")]).expect("get");
        assert_eq!(rows[0][2], None, "NULL tags survive the copy channel");
    }

    #[rstest]
    fn mark_queries_scan_the_member_ranges() {
        let driver = MemoryStoreDriver::new();
        let mut conn = connection(&driver);
        conn.exec_prepared(
            ops::INSERT_REL,
            &[
                Some("300"),
                Some("2"),
                Some("3"),
                Some("{1,2,10,20}"),
                Some(r#"{"n1","a","n2","c","w10","b","r20","d"}"#),
                None,
            ],
        )
        .expect("insert rel");

        let rows = conn
            .exec_prepared(ops::MARK_RELS_BY_NODE, &[Some("2")])
            .expect("mark by node");
        assert_eq!(rows, vec![vec![Some("300".to_owned())]]);

        let rows = conn
            .exec_prepared(ops::MARK_RELS_BY_NODE, &[Some("10")])
            .expect("mark by node");
        assert!(rows.is_empty(), "way refs are outside the node range");
    }

    #[rstest]
    fn unregistered_statements_are_a_protocol_violation() {
        let driver = MemoryStoreDriver::new();
        let mut conn = driver.connect("").expect("connect");
        let err = conn
            .exec_prepared(ops::GET_NODE, &[Some("1")])
            .expect_err("never prepared");
        assert!(matches!(err, MiddleError::Protocol(_)));
    }
}
