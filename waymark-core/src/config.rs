//! Configuration surface of the staging layer.
//!
//! A [`MiddleConfig`] is a plain owned value: `Middle::start` copies what it
//! needs into each component, so no component ever holds a pointer into a
//! process-wide option block.

use std::path::PathBuf;

/// Allocate node-cache entries in a sparse overflow map.
pub const ALLOC_SPARSE: u32 = 1;
/// Allocate node-cache entries in dense id-indexed storage.
pub const ALLOC_DENSE: u32 = 2;
/// Allocate dense storage chunk-by-chunk on demand.
pub const ALLOC_DENSE_CHUNK: u32 = 4;
/// Permit silent eviction when the cache budget is exhausted.
pub const ALLOC_LOSSY: u32 = 8;

/// How node coordinates are encoded in the caches and the staging store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordMode {
    /// IEEE double precision degrees.
    Double,
    /// 32-bit integers scaled by [`MiddleConfig::scale`].
    FixedPoint,
}

/// Options accepted by `Middle::start`.
#[derive(Debug, Clone)]
pub struct MiddleConfig {
    /// Connection descriptor for the staging store.
    pub conninfo: String,
    /// Schema prefix applied to every staging table name.
    pub prefix: String,
    /// Preserve existing staging tables and apply incremental diffs.
    pub append: bool,
    /// Tablespace override for the staging tables.
    pub data_tablespace: Option<String>,
    /// Tablespace override for the staging indexes.
    pub index_tablespace: Option<String>,
    /// Create the staging tables without write-ahead logging.
    pub unlogged: bool,
    /// Soft cap on the node RAM cache, in MiB.
    pub cache_mb: usize,
    /// Fixed-point coordinate scale factor.
    pub scale: i32,
    /// Coordinate encoding used by the caches and the store.
    pub coord_mode: CoordMode,
    /// Path of the flat node file; when set it supplants the staging store
    /// as the authoritative node coordinate source.
    pub flat_node_file: Option<PathBuf>,
    /// Drop the staging tables in `stop()` instead of indexing them.
    pub droptemp: bool,
    /// RAM-cache allocator strategy bits (`ALLOC_*`).
    pub alloc_chunkwise: u32,
}

impl Default for MiddleConfig {
    fn default() -> Self {
        Self {
            conninfo: String::new(),
            prefix: "planet_osm".to_owned(),
            append: false,
            data_tablespace: None,
            index_tablespace: None,
            unlogged: false,
            cache_mb: 800,
            scale: 10_000_000,
            coord_mode: CoordMode::Double,
            flat_node_file: None,
            droptemp: false,
            alloc_chunkwise: ALLOC_SPARSE | ALLOC_DENSE_CHUNK,
        }
    }
}
