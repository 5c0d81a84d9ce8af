//! Bounded in-memory node coordinate cache.
//!
//! OSM node ids within an extract arrive as nearly contiguous runs, so the
//! cache stores dense runs in fixed-size chunk blocks allocated on demand
//! and falls back to a sparse overflow map for isolated large ids. When both
//! strategies are enabled a slice of the budget is reserved for the sparse
//! side so block allocation cannot starve it. Reads never touch I/O; a miss
//! simply falls through to the next cache level.
//!
//! The byte budget is soft: with `ALLOC_LOSSY` the cache silently evicts the
//! oldest chunk block (or drops the insert) once the budget is exhausted;
//! without it an over-budget insert fails the call.

use std::collections::BTreeMap;
use std::collections::{HashMap, VecDeque};

use waymark_core::{
    double_to_fix, fix_to_double, CoordMode, MiddleError, OsmId, ALLOC_DENSE, ALLOC_DENSE_CHUNK,
    ALLOC_LOSSY, ALLOC_SPARSE,
};

const BLOCK_SHIFT: u32 = 10;
const BLOCK_ENTRIES: usize = 1 << BLOCK_SHIFT;

/// Approximate heap cost of one sparse map entry.
const SPARSE_ENTRY_BYTES: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Empty,
    Coord { lat: f64, lon: f64 },
}

#[derive(Debug)]
enum Block {
    Double(Box<[[f64; 2]; BLOCK_ENTRIES]>),
    Fixed(Box<[[i32; 2]; BLOCK_ENTRIES]>),
}

impl Block {
    fn new(mode: CoordMode) -> Self {
        match mode {
            CoordMode::Double => Block::Double(Box::new([[f64::NAN; 2]; BLOCK_ENTRIES])),
            CoordMode::FixedPoint => Block::Fixed(Box::new([[i32::MIN; 2]; BLOCK_ENTRIES])),
        }
    }

    fn bytes(mode: CoordMode) -> usize {
        match mode {
            CoordMode::Double => BLOCK_ENTRIES * 16,
            CoordMode::FixedPoint => BLOCK_ENTRIES * 8,
        }
    }

    fn get(&self, offset: usize, scale: i32) -> Slot {
        match self {
            Block::Double(entries) => {
                let [lat, lon] = entries[offset];
                if lat.is_nan() || lon.is_nan() {
                    Slot::Empty
                } else {
                    Slot::Coord { lat, lon }
                }
            }
            Block::Fixed(entries) => {
                let [lat, lon] = entries[offset];
                if lat == i32::MIN || lon == i32::MIN {
                    Slot::Empty
                } else {
                    Slot::Coord {
                        lat: fix_to_double(lat, scale),
                        lon: fix_to_double(lon, scale),
                    }
                }
            }
        }
    }

    fn set(&mut self, offset: usize, lat: f64, lon: f64, scale: i32) {
        match self {
            Block::Double(entries) => entries[offset] = [lat, lon],
            Block::Fixed(entries) => {
                entries[offset] = [double_to_fix(lat, scale), double_to_fix(lon, scale)];
            }
        }
    }

    fn clear(&mut self, offset: usize) {
        match self {
            Block::Double(entries) => entries[offset] = [f64::NAN; 2],
            Block::Fixed(entries) => entries[offset] = [i32::MIN; 2],
        }
    }
}

/// In-memory id-to-coordinate cache with a soft byte budget.
#[derive(Debug)]
pub struct NodeRamCache {
    strategy: u32,
    mode: CoordMode,
    scale: i32,
    capacity_bytes: usize,
    capacity_mb: usize,
    block_bytes: usize,
    sparse_bytes: usize,
    blocks: HashMap<i64, Block>,
    block_age: VecDeque<i64>,
    sparse: BTreeMap<OsmId, (f64, f64)>,
}

impl NodeRamCache {
    /// Build a cache for the given allocator strategy bits and MiB budget.
    #[must_use]
    pub fn new(strategy: u32, capacity_mb: usize, mode: CoordMode, scale: i32) -> Self {
        Self {
            strategy,
            mode,
            scale,
            capacity_bytes: capacity_mb.saturating_mul(1024 * 1024),
            capacity_mb,
            block_bytes: 0,
            sparse_bytes: 0,
            blocks: HashMap::new(),
            block_age: VecDeque::new(),
            sparse: BTreeMap::new(),
        }
    }

    fn chunked(&self) -> bool {
        self.strategy & (ALLOC_DENSE | ALLOC_DENSE_CHUNK) != 0
    }

    fn sparse_enabled(&self) -> bool {
        self.strategy & ALLOC_SPARSE != 0
    }

    fn lossy(&self) -> bool {
        self.strategy & ALLOC_LOSSY != 0
    }

    /// Upper bound for chunk-block allocation. With the sparse overflow
    /// enabled an eighth of the budget is held back for it.
    fn block_budget(&self) -> usize {
        if self.chunked() && self.sparse_enabled() {
            self.capacity_bytes - self.capacity_bytes / 8
        } else {
            self.capacity_bytes
        }
    }

    fn split(id: OsmId) -> (i64, usize) {
        (
            id >> BLOCK_SHIFT,
            (id & (BLOCK_ENTRIES as i64 - 1)) as usize,
        )
    }

    /// Cache a coordinate. Fails only when the budget is exhausted and the
    /// strategy forbids eviction.
    pub fn set(&mut self, id: OsmId, lat: f64, lon: f64) -> Result<(), MiddleError> {
        if self.chunked() {
            let (chunk, offset) = Self::split(id);
            if let Some(block) = self.blocks.get_mut(&chunk) {
                block.set(offset, lat, lon, self.scale);
                return Ok(());
            }
            let needed = Block::bytes(self.mode);
            if self.block_bytes + needed <= self.block_budget() {
                self.block_bytes += needed;
                let block = self.blocks.entry(chunk).or_insert(Block::new(self.mode));
                block.set(offset, lat, lon, self.scale);
                self.block_age.push_back(chunk);
                return Ok(());
            }
            if self.sparse_enabled() {
                return self.set_sparse(id, lat, lon);
            }
            if self.lossy() {
                return self.evict_and_set(chunk, offset, lat, lon);
            }
            return Err(MiddleError::CacheFull {
                capacity_mb: self.capacity_mb,
            });
        }
        self.set_sparse(id, lat, lon)
    }

    fn set_sparse(&mut self, id: OsmId, lat: f64, lon: f64) -> Result<(), MiddleError> {
        if self.sparse.contains_key(&id) {
            self.sparse.insert(id, (lat, lon));
            return Ok(());
        }
        if self.block_bytes + self.sparse_bytes + SPARSE_ENTRY_BYTES > self.capacity_bytes {
            if self.lossy() {
                return Ok(());
            }
            return Err(MiddleError::CacheFull {
                capacity_mb: self.capacity_mb,
            });
        }
        self.sparse_bytes += SPARSE_ENTRY_BYTES;
        self.sparse.insert(id, (lat, lon));
        Ok(())
    }

    fn evict_and_set(
        &mut self,
        chunk: i64,
        offset: usize,
        lat: f64,
        lon: f64,
    ) -> Result<(), MiddleError> {
        while let Some(oldest) = self.block_age.pop_front() {
            if self.blocks.remove(&oldest).is_some() {
                self.block_bytes -= Block::bytes(self.mode);
                break;
            }
        }
        let needed = Block::bytes(self.mode);
        if self.block_bytes + needed > self.block_budget() {
            // Budget too small for even one block; drop the entry.
            return Ok(());
        }
        self.block_bytes += needed;
        let block = self.blocks.entry(chunk).or_insert(Block::new(self.mode));
        block.set(offset, lat, lon, self.scale);
        self.block_age.push_back(chunk);
        Ok(())
    }

    /// Pure hit/miss lookup; never blocks.
    #[must_use]
    pub fn get(&self, id: OsmId) -> Option<(f64, f64)> {
        if self.chunked() {
            let (chunk, offset) = Self::split(id);
            if let Some(block) = self.blocks.get(&chunk) {
                if let Slot::Coord { lat, lon } = block.get(offset, self.scale) {
                    return Some((lat, lon));
                }
            }
        }
        self.sparse.get(&id).copied()
    }

    /// Drop a cached coordinate so later reads fall through to the
    /// authoritative store.
    pub fn unset(&mut self, id: OsmId) {
        if self.chunked() {
            let (chunk, offset) = Self::split(id);
            if let Some(block) = self.blocks.get_mut(&chunk) {
                block.clear(offset);
            }
        }
        self.sparse.remove(&id);
    }

    /// Currently accounted heap usage in bytes.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.block_bytes + self.sparse_bytes
    }
}
