//! The staging middle controller.
//!
//! [`StagingMiddle`] orchestrates the node caches, the pending-id trackers
//! and the three staging tables behind the [`Middle`]/[`MiddleQuery`]
//! capability traits. One thread drives the ingest surface in event order;
//! the per-table connections exist so each table can stay in streaming
//! mode independently of the others.

use std::collections::HashMap;
use std::thread;
use std::time::Instant;

use log::info;
use waymark_core::{
    CoordMode, IdTracker, Member, MemberType, Middle, MiddleConfig, MiddleError, MiddleQuery,
    NodeRecord, OsmId, OsmNode, Output, Relation, ResolvedWay, Tags, ALLOC_LOSSY, ID_NONE,
    double_to_fix, fix_to_double,
};

use crate::codec::{self, Escaping, COPY_NULL};
use crate::flat_file::PersistentNodeCache;
use crate::ram_cache::NodeRamCache;
use crate::store::template::TemplateVars;
use crate::store::{
    nodes_table_spec, ops, rels_table_spec, ways_table_spec, Row, StoreDriver, Table, TableMode,
};

const INTARRAY_CHECK: &str = "SELECT 1 FROM pg_opclass WHERE opcname = 'gist__intbig_ops'";

struct Tables {
    nodes: Table,
    ways: Table,
    rels: Table,
}

/// Production staging layer over a relational store.
pub struct StagingMiddle {
    driver: Box<dyn StoreDriver>,
    config: MiddleConfig,
    tables: Option<Tables>,
    ram: Option<NodeRamCache>,
    flat: Option<PersistentNodeCache>,
    ways_pending: IdTracker,
    rels_pending: IdTracker,
    append: bool,
    build_indexes: bool,
}

fn not_started() -> MiddleError {
    MiddleError::Protocol("the middle layer has not been started".to_owned())
}

fn coord_text(mode: CoordMode, scale: i32, value: f64) -> String {
    match mode {
        CoordMode::Double => format!("{value:.10}"),
        CoordMode::FixedPoint => double_to_fix(value, scale).to_string(),
    }
}

fn parse_coord(mode: CoordMode, scale: i32, text: &str) -> Result<f64, MiddleError> {
    match mode {
        CoordMode::Double => text.parse::<f64>().ok(),
        CoordMode::FixedPoint => text.parse::<i32>().ok().map(|v| fix_to_double(v, scale)),
    }
    .ok_or_else(|| MiddleError::MalformedData {
        context: "stored coordinate",
        text: text.to_owned(),
    })
}

fn col<'r>(row: &'r Row, index: usize, context: &'static str) -> Result<&'r str, MiddleError> {
    row.get(index)
        .and_then(|column| column.as_deref())
        .ok_or_else(|| MiddleError::MalformedData {
            context,
            text: format!("column {index} is absent"),
        })
}

fn col_opt(row: &Row, index: usize) -> Option<&str> {
    row.get(index).and_then(|column| column.as_deref())
}

fn parse_stored_id(text: &str) -> Result<OsmId, MiddleError> {
    text.parse::<OsmId>()
        .map_err(|_| MiddleError::MalformedData {
            context: "stored id",
            text: text.to_owned(),
        })
}

fn parse_stored_count(text: &str) -> Result<usize, MiddleError> {
    text.parse::<usize>()
        .map_err(|_| MiddleError::MalformedData {
            context: "stored count",
            text: text.to_owned(),
        })
}

/// Collect the ids of a single-column result into a tracker.
fn mark_rows(tracker: &mut IdTracker, rows: &[Row]) -> Result<(), MiddleError> {
    for row in rows {
        tracker.mark(parse_stored_id(col(row, 0, "marked id")?)?);
    }
    Ok(())
}

impl StagingMiddle {
    /// Build an unstarted middle over the given store backend.
    #[must_use]
    pub fn new(driver: Box<dyn StoreDriver>) -> Self {
        Self {
            driver,
            config: MiddleConfig::default(),
            tables: None,
            ram: None,
            flat: None,
            ways_pending: IdTracker::new(),
            rels_pending: IdTracker::new(),
            append: false,
            build_indexes: false,
        }
    }

    fn check_id_width(nodes: &mut Table) -> Result<(), MiddleError> {
        let sql = format!(
            "SELECT format_type(atttypid, atttypmod) FROM pg_attribute \
             WHERE attrelid = '{}'::regclass AND attname = 'id'",
            nodes.name()
        );
        let rows = nodes.query(&sql)?;
        match rows.first().and_then(|row| col_opt(row, 0)) {
            Some("integer") => Err(MiddleError::SchemaMismatch {
                found: 32,
                expected: 64,
            }),
            _ => Ok(()),
        }
    }

    fn reopen_flat_for_append(&mut self) -> Result<(), MiddleError> {
        let Some(path) = self.config.flat_node_file.clone() else {
            return Ok(());
        };
        // Drop the old handle first; the node file is still authoritative
        // and must be reopened in append mode, never recreated.
        self.flat = None;
        self.flat = Some(PersistentNodeCache::open(
            &path,
            true,
            self.config.coord_mode,
            self.config.scale,
        )?);
        Ok(())
    }
}

impl MiddleQuery for StagingMiddle {
    fn node_get(&mut self, id: OsmId) -> Result<Option<NodeRecord>, MiddleError> {
        if let Some((lat, lon)) = self.ram.as_ref().and_then(|ram| ram.get(id)) {
            return Ok(Some(NodeRecord {
                node: OsmNode::new(id, lat, lon),
                tags: Tags::new(),
            }));
        }
        if let Some(flat) = self.flat.as_mut() {
            return Ok(flat.get(id)?.map(|(lat, lon)| NodeRecord {
                node: OsmNode::new(id, lat, lon),
                tags: Tags::new(),
            }));
        }

        let (mode, scale) = (self.config.coord_mode, self.config.scale);
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        let rows = tables
            .nodes
            .exec_prepared(ops::GET_NODE, &[Some(&id.to_string())])?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(NodeRecord {
            node: OsmNode::new(
                id,
                parse_coord(mode, scale, col(row, 0, "node row")?)?,
                parse_coord(mode, scale, col(row, 1, "node row")?)?,
            ),
            tags: codec::decode_tags(col_opt(row, 2).unwrap_or(""))?,
        }))
    }

    fn nodes_get_list(
        &mut self,
        out: &mut [OsmNode],
        ids: &[OsmId],
    ) -> Result<usize, MiddleError> {
        if out.len() != ids.len() {
            return Err(MiddleError::Protocol(
                "nodes_get_list output slice does not match the id list".to_owned(),
            ));
        }

        let mut misses = Vec::new();
        for (slot, &id) in out.iter_mut().zip(ids) {
            match self.ram.as_ref().and_then(|ram| ram.get(id)) {
                Some((lat, lon)) => *slot = OsmNode::new(id, lat, lon),
                None => {
                    *slot = OsmNode::unset(id);
                    misses.push(id);
                }
            }
        }

        if !misses.is_empty() {
            if let Some(flat) = self.flat.as_mut() {
                flat.get_list(out, ids)?;
            } else {
                let (mode, scale) = (self.config.coord_mode, self.config.scale);
                let tables = self.tables.as_mut().ok_or_else(not_started)?;
                let rows = tables
                    .nodes
                    .exec_prepared(ops::GET_NODE_LIST, &[Some(&codec::encode_ids(&misses))])?;

                // Rows come back in arbitrary order; hash them by id and
                // scatter into the pending slots.
                let mut found = HashMap::with_capacity(rows.len());
                for row in &rows {
                    found.insert(
                        parse_stored_id(col(row, 0, "node list row")?)?,
                        (
                            parse_coord(mode, scale, col(row, 1, "node list row")?)?,
                            parse_coord(mode, scale, col(row, 2, "node list row")?)?,
                        ),
                    );
                }
                for slot in out.iter_mut() {
                    if slot.is_unset() {
                        if let Some(&(lat, lon)) = found.get(&slot.id) {
                            *slot = OsmNode::new(slot.id, lat, lon);
                        }
                    }
                }
            }
        }

        // Compact: downstream geometry building expects a dense array, at
        // the cost of hiding which ids were missing.
        let mut count = 0;
        for index in 0..out.len() {
            if !out[index].is_unset() {
                out[count] = out[index];
                count += 1;
            }
        }
        Ok(count)
    }

    fn way_get(&mut self, id: OsmId) -> Result<Option<ResolvedWay>, MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        let rows = tables
            .ways
            .exec_prepared(ops::GET_WAY, &[Some(&id.to_string())])?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let node_count = parse_stored_count(col(row, 2, "way row")?)?;
        let node_ids = codec::decode_ids(col(row, 0, "way row")?, Some(node_count))?;
        let tags = codec::decode_tags(col_opt(row, 1).unwrap_or(""))?;

        let mut nodes = vec![OsmNode::unset(0); node_ids.len()];
        let resolved = self.nodes_get_list(&mut nodes, &node_ids)?;
        nodes.truncate(resolved);
        Ok(Some(ResolvedWay { id, tags, nodes }))
    }

    fn ways_get_list(&mut self, ids: &[OsmId]) -> Result<Vec<ResolvedWay>, MiddleError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        let rows = tables
            .ways
            .exec_prepared(ops::GET_WAY_LIST, &[Some(&codec::encode_ids(ids))])?;

        let mut found: HashMap<OsmId, (Vec<OsmId>, Tags)> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let way_id = parse_stored_id(col(row, 0, "way list row")?)?;
            let node_count = parse_stored_count(col(row, 3, "way list row")?)?;
            found.insert(
                way_id,
                (
                    codec::decode_ids(col(row, 1, "way list row")?, Some(node_count))?,
                    codec::decode_tags(col_opt(row, 2).unwrap_or(""))?,
                ),
            );
        }

        // Hand rows back in request order; absent ways are skipped.
        let mut ways = Vec::with_capacity(found.len());
        for &id in ids {
            let Some((node_ids, tags)) = found.remove(&id) else {
                continue;
            };
            let mut nodes = vec![OsmNode::unset(0); node_ids.len()];
            let resolved = self.nodes_get_list(&mut nodes, &node_ids)?;
            nodes.truncate(resolved);
            ways.push(ResolvedWay { id, tags, nodes });
        }
        Ok(ways)
    }

    fn relation_get(&mut self, id: OsmId) -> Result<Option<Relation>, MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        let rows = tables
            .rels
            .exec_prepared(ops::GET_REL, &[Some(&id.to_string())])?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let member_count = match col_opt(row, 2) {
            Some(text) => parse_stored_count(text)?,
            None => 0,
        };
        Ok(Some(Relation {
            id,
            members: codec::decode_members(col_opt(row, 0).unwrap_or(""), member_count)?,
            tags: codec::decode_tags(col_opt(row, 1).unwrap_or(""))?,
        }))
    }

    fn relations_using_way(&mut self, way_id: OsmId) -> Result<Vec<OsmId>, MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        let rows = tables
            .rels
            .exec_prepared(ops::RELS_USING_WAY, &[Some(&way_id.to_string())])?;
        rows.iter()
            .map(|row| parse_stored_id(col(row, 0, "relation id row")?))
            .collect()
    }
}

impl Middle for StagingMiddle {
    fn start(&mut self, config: &MiddleConfig) -> Result<(), MiddleError> {
        self.config = config.clone();
        self.append = config.append;
        // Reset on every start so options from a previous run cannot leak
        // into this one.
        self.build_indexes = !config.append;
        self.ways_pending = IdTracker::new();
        self.rels_pending = IdTracker::new();

        self.ram = Some(NodeRamCache::new(
            config.alloc_chunkwise | ALLOC_LOSSY,
            config.cache_mb,
            config.coord_mode,
            config.scale,
        ));
        self.flat = match &config.flat_node_file {
            Some(path) => Some(PersistentNodeCache::open(
                path,
                config.append,
                config.coord_mode,
                config.scale,
            )?),
            None => None,
        };

        info!(
            "Mid: staging store, scale={} cache={}MiB",
            config.scale, config.cache_mb
        );

        let vars = TemplateVars::from_config(config);
        let mut nodes = Table::connect(
            self.driver.as_ref(),
            &config.conninfo,
            nodes_table_spec(config.coord_mode),
            &vars,
        )?;
        let ways = Table::connect(self.driver.as_ref(), &config.conninfo, ways_table_spec(), &vars)?;
        let rels = Table::connect(self.driver.as_ref(), &config.conninfo, rels_table_spec(), &vars)?;

        // The nodes connection is live and otherwise unused; warn about a
        // hostile environment before doing mountains of work.
        if !nodes.query(INTARRAY_CHECK)?.is_empty() {
            return Err(MiddleError::ExtensionIncompatible {
                opclass: "gist__intbig_ops".to_owned(),
            });
        }
        if config.append {
            Self::check_id_width(&mut nodes)?;
        }

        let mut tables = Tables { nodes, ways, rels };
        for table in [&mut tables.nodes, &mut tables.ways, &mut tables.rels] {
            info!("Setting up table: {}", table.name());
            if !config.append {
                table.create()?;
            }
            table.prepare_statements()?;
            if config.append {
                table.begin()?;
            } else {
                table.start_copy()?;
            }
        }
        self.tables = Some(tables);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MiddleError> {
        let tables = self.tables.take().ok_or_else(not_started)?;
        self.ram = None;
        self.flat = None;

        let droptemp = self.config.droptemp;
        let build_indexes = self.build_indexes;

        // One finalise worker per table; joining is mandatory because
        // unjoined workers may still be writing catalog changes.
        thread::scope(|scope| {
            let handles = [tables.nodes, tables.ways, tables.rels]
                .map(|table| scope.spawn(move || table.finalize(droptemp, build_indexes)));

            let mut outcome = Ok(());
            for handle in handles {
                match handle.join() {
                    Ok(result) => {
                        if outcome.is_ok() {
                            outcome = result;
                        }
                    }
                    Err(_) => {
                        if outcome.is_ok() {
                            outcome = Err(MiddleError::Protocol(
                                "a table finalise worker panicked".to_owned(),
                            ));
                        }
                    }
                }
            }
            outcome
        })
    }

    fn commit(&mut self) -> Result<(), MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        for table in [&mut tables.nodes, &mut tables.ways, &mut tables.rels] {
            table.end_copy()?;
            table.commit()?;
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        for table in [&mut tables.nodes, &mut tables.ways, &mut tables.rels] {
            table.end_copy()?;
        }
        Ok(())
    }

    fn analyze(&mut self) -> Result<(), MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        for table in [&mut tables.nodes, &mut tables.ways, &mut tables.rels] {
            table.analyze()?;
        }
        Ok(())
    }

    fn node_set(
        &mut self,
        id: OsmId,
        lat: f64,
        lon: f64,
        tags: &Tags,
    ) -> Result<(), MiddleError> {
        if let Some(ram) = self.ram.as_mut() {
            ram.set(id, lat, lon)?;
        }
        if let Some(flat) = self.flat.as_mut() {
            return flat.set(id, lat, lon);
        }

        let (mode, scale) = (self.config.coord_mode, self.config.scale);
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        if tables.nodes.mode() == TableMode::Streaming {
            let tags_text = codec::encode_tags(tags, Escaping::Streaming);
            let row = format!(
                "{id}\t{lat}\t{lon}\t{tags}\n",
                lat = coord_text(mode, scale, lat),
                lon = coord_text(mode, scale, lon),
                tags = tags_text.as_deref().unwrap_or(COPY_NULL),
            );
            return tables.nodes.copy_row(&row);
        }

        let id_text = id.to_string();
        let lat_text = coord_text(mode, scale, lat);
        let lon_text = coord_text(mode, scale, lon);
        let tags_text = codec::encode_tags(tags, Escaping::Prepared);
        tables.nodes.exec_prepared(
            ops::INSERT_NODE,
            &[
                Some(&id_text),
                Some(&lat_text),
                Some(&lon_text),
                tags_text.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn node_delete(&mut self, id: OsmId) -> Result<(), MiddleError> {
        if let Some(ram) = self.ram.as_mut() {
            ram.unset(id);
        }
        if let Some(flat) = self.flat.as_mut() {
            return flat.set(id, f64::NAN, f64::NAN);
        }

        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        tables
            .nodes
            .exec_prepared(ops::DELETE_NODE, &[Some(&id.to_string())])?;
        Ok(())
    }

    fn node_changed(&mut self, id: OsmId) -> Result<(), MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        tables.ways.end_copy()?;
        tables.rels.end_copy()?;

        let param = id.to_string();
        let rows = tables
            .ways
            .exec_prepared(ops::MARK_WAYS_BY_NODE, &[Some(&param)])?;
        mark_rows(&mut self.ways_pending, &rows)?;

        let rows = tables
            .rels
            .exec_prepared(ops::MARK_RELS_BY_NODE, &[Some(&param)])?;
        mark_rows(&mut self.rels_pending, &rows)
    }

    fn way_set(&mut self, id: OsmId, nodes: &[OsmId], tags: &Tags) -> Result<(), MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        if tables.ways.mode() == TableMode::Streaming {
            let tags_text = codec::encode_tags(tags, Escaping::Streaming);
            let row = format!(
                "{id}\t{nodes}\t{tags}\n",
                nodes = codec::encode_ids(nodes),
                tags = tags_text.as_deref().unwrap_or(COPY_NULL),
            );
            return tables.ways.copy_row(&row);
        }

        let id_text = id.to_string();
        let nodes_text = codec::encode_ids(nodes);
        let tags_text = codec::encode_tags(tags, Escaping::Prepared);
        tables.ways.exec_prepared(
            ops::INSERT_WAY,
            &[Some(&id_text), Some(&nodes_text), tags_text.as_deref()],
        )?;
        Ok(())
    }

    fn way_delete(&mut self, id: OsmId) -> Result<(), MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        tables
            .ways
            .exec_prepared(ops::DELETE_WAY, &[Some(&id.to_string())])?;
        Ok(())
    }

    fn way_changed(&mut self, id: OsmId) -> Result<(), MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        tables.rels.end_copy()?;
        let rows = tables
            .rels
            .exec_prepared(ops::MARK_RELS_BY_WAY, &[Some(&id.to_string())])?;
        mark_rows(&mut self.rels_pending, &rows)
    }

    fn relation_set(
        &mut self,
        id: OsmId,
        members: &[Member],
        tags: &Tags,
    ) -> Result<(), MiddleError> {
        // Partition members by kind in stable order; parts and the member
        // list are persisted in that order together with the two offsets.
        let mut ordered: Vec<Member> = Vec::with_capacity(members.len());
        for kind in [MemberType::Node, MemberType::Way, MemberType::Relation] {
            ordered.extend(members.iter().filter(|m| m.kind == kind).cloned());
        }
        let way_off = ordered
            .iter()
            .filter(|m| m.kind == MemberType::Node)
            .count();
        let rel_off = way_off
            + ordered
                .iter()
                .filter(|m| m.kind == MemberType::Way)
                .count();
        let parts: Vec<OsmId> = ordered.iter().map(|m| m.id).collect();

        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        if tables.rels.mode() == TableMode::Streaming {
            let members_text = codec::encode_members(&ordered, Escaping::Streaming);
            let tags_text = codec::encode_tags(tags, Escaping::Streaming);
            let row = format!(
                "{id}\t{way_off}\t{rel_off}\t{parts}\t{members}\t{tags}\n",
                parts = codec::encode_ids(&parts),
                members = members_text.as_deref().unwrap_or(COPY_NULL),
                tags = tags_text.as_deref().unwrap_or(COPY_NULL),
            );
            return tables.rels.copy_row(&row);
        }

        let id_text = id.to_string();
        let way_off_text = way_off.to_string();
        let rel_off_text = rel_off.to_string();
        let parts_text = codec::encode_ids(&parts);
        let members_text = codec::encode_members(&ordered, Escaping::Prepared);
        let tags_text = codec::encode_tags(tags, Escaping::Prepared);
        tables.rels.exec_prepared(
            ops::INSERT_REL,
            &[
                Some(&id_text),
                Some(&way_off_text),
                Some(&rel_off_text),
                Some(&parts_text),
                members_text.as_deref(),
                tags_text.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn relation_delete(&mut self, id: OsmId) -> Result<(), MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        tables.ways.end_copy()?;
        tables.rels.end_copy()?;

        let param = id.to_string();
        let rows = tables
            .ways
            .exec_prepared(ops::MARK_WAYS_BY_REL, &[Some(&param)])?;
        tables.rels.exec_prepared(ops::DELETE_REL, &[Some(&param)])?;

        // The member ways may lose derived output with their membership,
        // so they need re-rendering.
        mark_rows(&mut self.ways_pending, &rows)
    }

    fn relation_changed(&mut self, id: OsmId) -> Result<(), MiddleError> {
        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        tables.rels.end_copy()?;
        let rows = tables
            .rels
            .exec_prepared(ops::MARK_RELS, &[Some(&id.to_string())])?;
        mark_rows(&mut self.rels_pending, &rows)
    }

    fn iterate_ways(&mut self, output: &mut dyn Output) -> Result<(), MiddleError> {
        let exists = self.append;
        let started = Instant::now();
        info!("Going over pending ways...");

        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        tables.ways.end_copy()?;
        self.reopen_flat_for_append()?;

        info!("{} ways are pending", self.ways_pending.size());

        let mut count = 0u64;
        loop {
            let id = self.ways_pending.pop_mark();
            if id == ID_NONE {
                break;
            }
            count += 1;
            if count % 1000 == 0 {
                let secs = started.elapsed().as_secs_f64();
                info!(
                    "processing way ({}k) at {:.2}k/s",
                    count / 1000,
                    count as f64 / 1000.0 / secs.max(f64::EPSILON)
                );
            }
            if let Some(way) = self.way_get(id)? {
                output.pending_way(id, &way.tags, &way.nodes, exists);
            }
        }

        let secs = started.elapsed().as_secs_f64();
        info!(
            "Processed {count} pending ways in {secs:.0}s ({:.2}/s)",
            count as f64 / secs.max(f64::EPSILON)
        );
        Ok(())
    }

    fn iterate_relations(&mut self, output: &mut dyn Output) -> Result<(), MiddleError> {
        let exists = self.append;
        let started = Instant::now();
        info!("Going over pending relations...");

        let tables = self.tables.as_mut().ok_or_else(not_started)?;
        tables.rels.end_copy()?;
        self.reopen_flat_for_append()?;

        info!("{} relations are pending", self.rels_pending.size());

        let mut count = 0u64;
        loop {
            let id = self.rels_pending.pop_mark();
            if id == ID_NONE {
                break;
            }
            count += 1;
            if count % 10 == 0 {
                let secs = started.elapsed().as_secs_f64();
                info!(
                    "processing relation ({count}) at {:.2}/s",
                    count as f64 / secs.max(f64::EPSILON)
                );
            }
            if let Some(relation) = self.relation_get(id)? {
                output.pending_relation(id, &relation.members, &relation.tags, exists);
            }
        }

        let secs = started.elapsed().as_secs_f64();
        info!(
            "Processed {count} pending relations in {secs:.0}s ({:.2}/s)",
            count as f64 / secs.max(f64::EPSILON)
        );
        Ok(())
    }
}
