//! Staging store adapter.
//!
//! The store holds three tables (nodes, ways, relations), each owning one
//! dedicated connection so it can sit in streaming-insert mode independently
//! of the others: the wire protocol forbids interleaving a streaming insert
//! with anything else on the same connection. [`Table`] wraps a connection
//! with the per-table mode state machine and the expanded SQL set;
//! [`StoreConnection`]/[`StoreDriver`] are the typed command surface the
//! adapter needs from a concrete backend, with implementations for a live
//! server ([`postgres`]) and an in-memory twin used by tests ([`memory`]).

pub mod memory;
pub mod postgres;
pub mod template;

use log::info;
use waymark_core::{CoordMode, MiddleError};

use template::TemplateVars;

/// One result row; absent columns are store NULLs.
pub type Row = Vec<Option<String>>;
/// Result rows in server order.
pub type Rows = Vec<Row>;

/// Logical names of the prepared operations.
pub mod ops {
    pub const INSERT_NODE: &str = "insert_node";
    pub const GET_NODE: &str = "get_node";
    pub const GET_NODE_LIST: &str = "get_node_list";
    pub const DELETE_NODE: &str = "delete_node";

    pub const INSERT_WAY: &str = "insert_way";
    pub const GET_WAY: &str = "get_way";
    pub const GET_WAY_LIST: &str = "get_way_list";
    pub const DELETE_WAY: &str = "delete_way";
    pub const MARK_WAYS_BY_NODE: &str = "mark_ways_by_node";
    pub const MARK_WAYS_BY_REL: &str = "mark_ways_by_rel";

    pub const INSERT_REL: &str = "insert_rel";
    pub const GET_REL: &str = "get_rel";
    pub const DELETE_REL: &str = "delete_rel";
    pub const RELS_USING_WAY: &str = "rels_using_way";
    pub const MARK_RELS_BY_NODE: &str = "mark_rels_by_node";
    pub const MARK_RELS_BY_WAY: &str = "mark_rels_by_way";
    pub const MARK_RELS: &str = "mark_rels";
}

/// A single connection to the staging store.
///
/// Parameters and result columns travel in the store's text representation;
/// the controller owns parsing. Implementations map a non-OK result to
/// [`MiddleError::Store`] with the store's own message.
pub trait StoreConnection: Send {
    /// Run one or more statements that produce no rows (DDL, transaction
    /// control, maintenance).
    fn batch(&mut self, sql: &str) -> Result<(), MiddleError>;

    /// Run an ad-hoc query; used only for the startup sanity checks.
    fn query(&mut self, sql: &str) -> Result<Rows, MiddleError>;

    /// Register a prepared statement under `name` with `params` text
    /// parameters.
    fn prepare(&mut self, name: &str, sql: &str, params: usize) -> Result<(), MiddleError>;

    /// Execute a previously registered statement.
    fn exec_prepared(
        &mut self,
        name: &str,
        params: &[Option<&str>],
    ) -> Result<Rows, MiddleError>;

    /// Open the streaming-insert channel.
    fn copy_begin(&mut self, sql: &str) -> Result<(), MiddleError>;

    /// Append one row to the open streaming insert.
    fn copy_row(&mut self, row: &str) -> Result<(), MiddleError>;

    /// Finalise the streaming insert.
    fn copy_end(&mut self) -> Result<(), MiddleError>;
}

/// Connection factory for a staging store backend.
pub trait StoreDriver: Send + Sync {
    fn connect(&self, conninfo: &str) -> Result<Box<dyn StoreConnection>, MiddleError>;
}

/// Per-table insert mode. A table is in exactly one mode at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    Idle,
    Streaming,
    Transactional,
}

/// Expanded SQL set for one staging table.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub create: String,
    /// `(name, sql, parameter count)` triples registered at startup.
    pub prepares: Vec<(&'static str, String, usize)>,
    pub copy: String,
    pub analyze: String,
    pub array_index: Option<String>,
}

impl TableSpec {
    fn expand(mut self, vars: &TemplateVars) -> Self {
        self.name = template::expand(&self.name, vars);
        self.create = template::expand(&self.create, vars);
        for (_, sql, _) in &mut self.prepares {
            *sql = template::expand(sql, vars);
        }
        self.copy = template::expand(&self.copy, vars);
        self.analyze = template::expand(&self.analyze, vars);
        self.array_index = self.array_index.map(|sql| template::expand(&sql, vars));
        self
    }
}

/// SQL type of the coordinate columns for the configured encoding.
fn coord_type(mode: CoordMode) -> &'static str {
    match mode {
        CoordMode::Double => "float8",
        CoordMode::FixedPoint => "int4",
    }
}

/// Templated SQL set of the nodes table.
pub fn nodes_table_spec(mode: CoordMode) -> TableSpec {
    let coord = coord_type(mode);
    TableSpec {
        name: "%p_nodes".to_owned(),
        create: format!(
            "CREATE %m TABLE %p_nodes (id int8 PRIMARY KEY {{USING INDEX TABLESPACE %i}}, \
             lat {coord} NOT NULL, lon {coord} NOT NULL, tags text[]) {{TABLESPACE %t}}"
        ),
        prepares: vec![
            (
                ops::INSERT_NODE,
                format!(
                    "INSERT INTO %p_nodes VALUES ($1::int8, $2::{coord}, $3::{coord}, $4::text[])"
                ),
                4,
            ),
            (
                ops::GET_NODE,
                "SELECT lat::text, lon::text, tags::text FROM %p_nodes WHERE id = $1::int8 \
                 LIMIT 1"
                    .to_owned(),
                1,
            ),
            (
                ops::GET_NODE_LIST,
                "SELECT id::text, lat::text, lon::text FROM %p_nodes \
                 WHERE id = ANY($1::int8[])"
                    .to_owned(),
                1,
            ),
            (
                ops::DELETE_NODE,
                "DELETE FROM %p_nodes WHERE id = $1::int8".to_owned(),
                1,
            ),
        ],
        copy: "COPY %p_nodes FROM STDIN".to_owned(),
        analyze: "ANALYZE %p_nodes".to_owned(),
        array_index: None,
    }
}

/// Templated SQL set of the ways table.
pub fn ways_table_spec() -> TableSpec {
    TableSpec {
        name: "%p_ways".to_owned(),
        create: "CREATE %m TABLE %p_ways (id int8 PRIMARY KEY {USING INDEX TABLESPACE %i}, \
                 nodes int8[] NOT NULL, tags text[]) {TABLESPACE %t}"
            .to_owned(),
        prepares: vec![
            (
                ops::INSERT_WAY,
                "INSERT INTO %p_ways VALUES ($1::int8, $2::int8[], $3::text[])".to_owned(),
                3,
            ),
            (
                ops::GET_WAY,
                "SELECT nodes::text, tags::text, array_upper(nodes,1)::text FROM %p_ways \
                 WHERE id = $1::int8"
                    .to_owned(),
                1,
            ),
            (
                ops::GET_WAY_LIST,
                "SELECT id::text, nodes::text, tags::text, array_upper(nodes,1)::text \
                 FROM %p_ways WHERE id = ANY($1::int8[])"
                    .to_owned(),
                1,
            ),
            (
                ops::DELETE_WAY,
                "DELETE FROM %p_ways WHERE id = $1::int8".to_owned(),
                1,
            ),
            (
                ops::MARK_WAYS_BY_NODE,
                "SELECT id::text FROM %p_ways WHERE nodes && ARRAY[$1::int8]".to_owned(),
                1,
            ),
            (
                ops::MARK_WAYS_BY_REL,
                "SELECT id::text FROM %p_ways WHERE id IN \
                 (SELECT unnest(parts[way_off+1:rel_off]) FROM %p_rels WHERE id = $1::int8)"
                    .to_owned(),
                1,
            ),
        ],
        copy: "COPY %p_ways FROM STDIN".to_owned(),
        analyze: "ANALYZE %p_ways".to_owned(),
        array_index: Some(
            "CREATE INDEX %p_ways_nodes ON %p_ways USING gin (nodes) {TABLESPACE %i}".to_owned(),
        ),
    }
}

/// Templated SQL set of the relations table.
pub fn rels_table_spec() -> TableSpec {
    TableSpec {
        name: "%p_rels".to_owned(),
        create: "CREATE %m TABLE %p_rels (id int8 PRIMARY KEY {USING INDEX TABLESPACE %i}, \
                 way_off int2, rel_off int2, parts int8[], members text[], tags text[]) \
                 {TABLESPACE %t}"
            .to_owned(),
        prepares: vec![
            (
                ops::INSERT_REL,
                "INSERT INTO %p_rels VALUES ($1::int8, $2::int2, $3::int2, $4::int8[], \
                 $5::text[], $6::text[])"
                    .to_owned(),
                6,
            ),
            (
                ops::GET_REL,
                "SELECT members::text, tags::text, (array_upper(members,1)/2)::text \
                 FROM %p_rels WHERE id = $1::int8"
                    .to_owned(),
                1,
            ),
            (
                ops::DELETE_REL,
                "DELETE FROM %p_rels WHERE id = $1::int8".to_owned(),
                1,
            ),
            (
                ops::RELS_USING_WAY,
                "SELECT id::text FROM %p_rels WHERE parts && ARRAY[$1::int8] \
                 AND parts[way_off+1:rel_off] && ARRAY[$1::int8]"
                    .to_owned(),
                1,
            ),
            (
                ops::MARK_RELS_BY_NODE,
                "SELECT id::text FROM %p_rels WHERE parts && ARRAY[$1::int8] \
                 AND parts[1:way_off] && ARRAY[$1::int8]"
                    .to_owned(),
                1,
            ),
            (
                ops::MARK_RELS_BY_WAY,
                "SELECT id::text FROM %p_rels WHERE parts && ARRAY[$1::int8] \
                 AND parts[way_off+1:rel_off] && ARRAY[$1::int8]"
                    .to_owned(),
                1,
            ),
            (
                ops::MARK_RELS,
                "SELECT id::text FROM %p_rels WHERE parts && ARRAY[$1::int8] \
                 AND parts[rel_off+1:array_length(parts,1)] && ARRAY[$1::int8]"
                    .to_owned(),
                1,
            ),
        ],
        copy: "COPY %p_rels FROM STDIN".to_owned(),
        analyze: "ANALYZE %p_rels".to_owned(),
        array_index: Some(
            "CREATE INDEX %p_rels_parts ON %p_rels USING gin (parts) {TABLESPACE %i}".to_owned(),
        ),
    }
}

/// Insert `WITH (FASTUPDATE=OFF)` into an index build statement, before the
/// tablespace clause when one is present.
fn with_fastupdate_off(sql: &str) -> String {
    if let Some(pos) = sql.find(" TABLESPACE") {
        format!("{} WITH (FASTUPDATE=OFF){}", &sql[..pos], &sql[pos..])
    } else {
        format!("{} WITH (FASTUPDATE=OFF)", sql.trim_end_matches(';'))
    }
}

/// One staging table: its connection, mode and expanded SQL.
pub struct Table {
    spec: TableSpec,
    mode: TableMode,
    conn: Box<dyn StoreConnection>,
}

impl Table {
    /// Connect the table, expand its templates and disable synchronous
    /// commit on the connection. This trades durability of committed
    /// intermediate work on power loss for commit throughput; a crash
    /// mid-import requires a restart anyway.
    pub fn connect(
        driver: &dyn StoreDriver,
        conninfo: &str,
        spec: TableSpec,
        vars: &TemplateVars,
    ) -> Result<Self, MiddleError> {
        let spec = spec.expand(vars);
        let mut conn = driver.connect(conninfo)?;
        conn.batch("SET synchronous_commit TO off")?;
        Ok(Self {
            spec,
            mode: TableMode::Idle,
            conn,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[must_use]
    pub fn mode(&self) -> TableMode {
        self.mode
    }

    /// Ad-hoc query on this table's connection (startup checks only).
    pub fn query(&mut self, sql: &str) -> Result<Rows, MiddleError> {
        self.conn.query(sql)
    }

    /// Drop and re-create the table.
    pub fn create(&mut self) -> Result<(), MiddleError> {
        self.conn
            .batch(&format!("DROP TABLE IF EXISTS {}", self.spec.name))?;
        self.conn.batch(&self.spec.create)?;
        Ok(())
    }

    /// Register every prepared statement of this table.
    pub fn prepare_statements(&mut self) -> Result<(), MiddleError> {
        for (name, sql, params) in &self.spec.prepares {
            self.conn.prepare(name, sql, *params)?;
        }
        Ok(())
    }

    /// Open a transaction: `idle -> transactional`.
    pub fn begin(&mut self) -> Result<(), MiddleError> {
        if self.mode != TableMode::Idle {
            return Err(MiddleError::Protocol(format!(
                "begin on table {} while {:?}",
                self.spec.name, self.mode
            )));
        }
        self.conn.batch("BEGIN")?;
        self.mode = TableMode::Transactional;
        Ok(())
    }

    /// Commit an open transaction: `transactional -> idle`. A no-op in any
    /// other mode.
    pub fn commit(&mut self) -> Result<(), MiddleError> {
        if self.mode == TableMode::Transactional {
            self.conn.batch("COMMIT")?;
            self.mode = TableMode::Idle;
        }
        Ok(())
    }

    /// Begin a streaming insert: `idle -> streaming`.
    pub fn start_copy(&mut self) -> Result<(), MiddleError> {
        if self.mode != TableMode::Idle {
            return Err(MiddleError::Protocol(format!(
                "start_copy on table {} while {:?}",
                self.spec.name, self.mode
            )));
        }
        self.conn.copy_begin(&self.spec.copy)?;
        self.mode = TableMode::Streaming;
        Ok(())
    }

    /// Append one row to the open streaming insert.
    pub fn copy_row(&mut self, row: &str) -> Result<(), MiddleError> {
        if self.mode != TableMode::Streaming {
            return Err(MiddleError::Protocol(format!(
                "copy_row on table {} while {:?}",
                self.spec.name, self.mode
            )));
        }
        self.conn.copy_row(row)
    }

    /// Finalise any open streaming insert: `streaming -> idle`. Required
    /// before a prepared-statement call on the same table.
    pub fn end_copy(&mut self) -> Result<(), MiddleError> {
        if self.mode == TableMode::Streaming {
            self.conn.copy_end()?;
            self.mode = TableMode::Idle;
        }
        Ok(())
    }

    /// Execute a prepared operation. A streaming insert still open on this
    /// table is finalised first.
    pub fn exec_prepared(
        &mut self,
        name: &str,
        params: &[Option<&str>],
    ) -> Result<Rows, MiddleError> {
        self.end_copy()?;
        self.conn.exec_prepared(name, params)
    }

    /// Refresh store statistics for this table.
    pub fn analyze(&mut self) -> Result<(), MiddleError> {
        self.end_copy()?;
        self.conn.batch(&self.spec.analyze)
    }

    /// Finalise the table at shutdown: end streaming, then either drop it
    /// or build its array index.
    pub fn finalize(mut self, droptemp: bool, build_indexes: bool) -> Result<(), MiddleError> {
        info!("Stopping table: {}", self.spec.name);
        let started = std::time::Instant::now();
        self.end_copy()?;
        if droptemp {
            self.conn
                .batch(&format!("DROP TABLE {}", self.spec.name))?;
        } else if build_indexes {
            if let Some(index_sql) = &self.spec.array_index {
                info!(
                    "Building index on table: {} (fastupdate=off)",
                    self.spec.name
                );
                self.conn.batch(&with_fastupdate_off(index_sql))?;
            }
        }
        info!(
            "Stopped table: {} in {}s",
            self.spec.name,
            started.elapsed().as_secs()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStoreDriver;
    use super::*;
    use rstest::rstest;

    fn connected_table() -> Table {
        let driver = MemoryStoreDriver::new();
        let vars = TemplateVars {
            prefix: "osm".to_owned(),
            ..TemplateVars::default()
        };
        let mut table = Table::connect(&driver, "", nodes_table_spec(CoordMode::Double), &vars)
            .expect("connect");
        table.create().expect("create");
        table.prepare_statements().expect("prepare");
        table
    }

    #[rstest]
    fn tables_start_idle_and_transition_through_modes() {
        let mut table = connected_table();
        assert_eq!(table.mode(), TableMode::Idle);

        table.start_copy().expect("start copy");
        assert_eq!(table.mode(), TableMode::Streaming);
        table.end_copy().expect("end copy");
        assert_eq!(table.mode(), TableMode::Idle);

        table.begin().expect("begin");
        assert_eq!(table.mode(), TableMode::Transactional);
        table.commit().expect("commit");
        assert_eq!(table.mode(), TableMode::Idle);
    }

    #[rstest]
    fn copy_row_outside_streaming_mode_is_a_protocol_violation() {
        let mut table = connected_table();
        let err = table.copy_row("1\t0\t0\t\\N\n").expect_err("not streaming");
        assert!(matches!(err, MiddleError::Protocol(_)));
    }

    #[rstest]
    fn start_copy_inside_a_transaction_is_a_protocol_violation() {
        let mut table = connected_table();
        table.begin().expect("begin");
        let err = table.start_copy().expect_err("transactional");
        assert!(matches!(err, MiddleError::Protocol(_)));
    }

    #[rstest]
    fn prepared_calls_end_an_open_streaming_insert_first() {
        let mut table = connected_table();
        table.start_copy().expect("start copy");
        table
            .copy_row("1\t52.5000000000\t13.4000000000\t\\N\n")
            .expect("copy row");

        let rows = table
            .exec_prepared(ops::GET_NODE, &[Some("1")])
            .expect("prepared read");
        assert_eq!(table.mode(), TableMode::Idle);
        assert_eq!(rows.len(), 1);
    }

    #[rstest]
    fn fastupdate_is_spliced_before_the_tablespace_clause() {
        assert_eq!(
            with_fastupdate_off("CREATE INDEX i ON t USING gin (c) TABLESPACE fast"),
            "CREATE INDEX i ON t USING gin (c) WITH (FASTUPDATE=OFF) TABLESPACE fast"
        );
        assert_eq!(
            with_fastupdate_off("CREATE INDEX i ON t USING gin (c)"),
            "CREATE INDEX i ON t USING gin (c) WITH (FASTUPDATE=OFF)"
        );
    }
}
