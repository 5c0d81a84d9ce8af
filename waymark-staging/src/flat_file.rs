//! Flat-file persistent node cache.
//!
//! Logically an array `file[id] -> (lat, lon)`: a fixed-width header
//! followed by one fixed-width coordinate slot per node id. The file grows
//! monotonically in whole pages; slots in the gap are filled with the empty
//! sentinel so an unwritten id reads back as a miss. A delete writes the
//! same sentinel (the NaN pair in double mode). When this cache is enabled
//! it supplants the staging store as the authoritative node coordinate
//! source, so every I/O failure is fatal.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use waymark_core::{double_to_fix, fix_to_double, CoordMode, MiddleError, OsmId, OsmNode};

const MAGIC: [u8; 8] = *b"WAYMKFN1";
const VERSION: u16 = 1;
const HEADER_LEN: u64 = 16;

/// Slots added per file extension.
const PAGE_SLOTS: u64 = 1024;

fn io_err(context: &'static str) -> impl FnOnce(std::io::Error) -> MiddleError {
    move |source| MiddleError::Io { context, source }
}

fn entry_len(mode: CoordMode) -> u64 {
    match mode {
        CoordMode::Double => 16,
        CoordMode::FixedPoint => 8,
    }
}

fn mode_byte(mode: CoordMode) -> u8 {
    match mode {
        CoordMode::Double => 0,
        CoordMode::FixedPoint => 1,
    }
}

/// Id-indexed on-disk coordinate store.
#[derive(Debug)]
pub struct PersistentNodeCache {
    file: File,
    mode: CoordMode,
    scale: i32,
    slots: u64,
}

impl PersistentNodeCache {
    /// Open the flat node file.
    ///
    /// In append mode the file must already exist and its header must match
    /// the configured encoding; otherwise the file is created (or truncated)
    /// with a fresh header.
    pub fn open(
        path: &Path,
        append: bool,
        mode: CoordMode,
        scale: i32,
    ) -> Result<Self, MiddleError> {
        if append {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(io_err("opening the flat node file"))?;

            let mut header = [0u8; HEADER_LEN as usize];
            file.read_exact(&mut header)
                .map_err(io_err("reading the flat node file header"))?;
            let stored_version = u16::from_le_bytes([header[8], header[9]]);
            let stored_scale = i32::from_le_bytes([header[12], header[13], header[14], header[15]]);
            if header[..8] != MAGIC
                || stored_version != VERSION
                || header[10] != mode_byte(mode)
                || stored_scale != scale
            {
                return Err(MiddleError::MalformedData {
                    context: "flat node file header",
                    text: path.display().to_string(),
                });
            }

            let len = file
                .metadata()
                .map_err(io_err("inspecting the flat node file"))?
                .len();
            let slots = len.saturating_sub(HEADER_LEN) / entry_len(mode);
            return Ok(Self {
                file,
                mode,
                scale,
                slots,
            });
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(io_err("creating the flat node file"))?;

        let mut header = [0u8; HEADER_LEN as usize];
        header[..8].copy_from_slice(&MAGIC);
        header[8..10].copy_from_slice(&VERSION.to_le_bytes());
        header[10] = mode_byte(mode);
        header[12..16].copy_from_slice(&scale.to_le_bytes());
        file.write_all(&header)
            .map_err(io_err("writing the flat node file header"))?;

        Ok(Self {
            file,
            mode,
            scale,
            slots: 0,
        })
    }

    fn empty_entry(&self) -> Vec<u8> {
        match self.mode {
            CoordMode::Double => {
                let mut entry = Vec::with_capacity(16);
                entry.extend_from_slice(&f64::NAN.to_le_bytes());
                entry.extend_from_slice(&f64::NAN.to_le_bytes());
                entry
            }
            CoordMode::FixedPoint => {
                let mut entry = Vec::with_capacity(8);
                entry.extend_from_slice(&i32::MIN.to_le_bytes());
                entry.extend_from_slice(&i32::MIN.to_le_bytes());
                entry
            }
        }
    }

    fn encode_entry(&self, lat: f64, lon: f64) -> Vec<u8> {
        if lat.is_nan() || lon.is_nan() {
            return self.empty_entry();
        }
        match self.mode {
            CoordMode::Double => {
                let mut entry = Vec::with_capacity(16);
                entry.extend_from_slice(&lat.to_le_bytes());
                entry.extend_from_slice(&lon.to_le_bytes());
                entry
            }
            CoordMode::FixedPoint => {
                let mut entry = Vec::with_capacity(8);
                entry.extend_from_slice(&double_to_fix(lat, self.scale).to_le_bytes());
                entry.extend_from_slice(&double_to_fix(lon, self.scale).to_le_bytes());
                entry
            }
        }
    }

    fn decode_entry(&self, entry: &[u8]) -> Option<(f64, f64)> {
        match self.mode {
            CoordMode::Double => {
                let lat = f64::from_le_bytes(entry[..8].try_into().ok()?);
                let lon = f64::from_le_bytes(entry[8..16].try_into().ok()?);
                (!lat.is_nan() && !lon.is_nan()).then_some((lat, lon))
            }
            CoordMode::FixedPoint => {
                let lat = i32::from_le_bytes(entry[..4].try_into().ok()?);
                let lon = i32::from_le_bytes(entry[4..8].try_into().ok()?);
                (lat != i32::MIN && lon != i32::MIN)
                    .then(|| (fix_to_double(lat, self.scale), fix_to_double(lon, self.scale)))
            }
        }
    }

    fn extend_to(&mut self, slot: u64) -> Result<(), MiddleError> {
        let new_slots = (slot + 1).div_ceil(PAGE_SLOTS) * PAGE_SLOTS;
        let empty = self.empty_entry();
        let mut page = Vec::with_capacity(empty.len() * PAGE_SLOTS as usize);
        for _ in 0..PAGE_SLOTS {
            page.extend_from_slice(&empty);
        }

        self.file
            .seek(SeekFrom::Start(
                HEADER_LEN + self.slots * entry_len(self.mode),
            ))
            .map_err(io_err("extending the flat node file"))?;
        let mut remaining = new_slots - self.slots;
        while remaining > 0 {
            self.file
                .write_all(&page)
                .map_err(io_err("extending the flat node file"))?;
            remaining -= PAGE_SLOTS;
        }
        self.slots = new_slots;
        Ok(())
    }

    /// Write one coordinate through to disk; a NaN pair marks a deleted
    /// node.
    pub fn set(&mut self, id: OsmId, lat: f64, lon: f64) -> Result<(), MiddleError> {
        let slot = u64::try_from(id).map_err(|_| {
            MiddleError::Protocol(format!("negative id {id} in the flat node cache"))
        })?;
        if slot >= self.slots {
            self.extend_to(slot)?;
        }

        let entry = self.encode_entry(lat, lon);
        self.file
            .seek(SeekFrom::Start(HEADER_LEN + slot * entry_len(self.mode)))
            .map_err(io_err("seeking the flat node file"))?;
        self.file
            .write_all(&entry)
            .map_err(io_err("writing a flat node entry"))?;
        Ok(())
    }

    /// Read one coordinate; `None` for ids never written or deleted.
    pub fn get(&mut self, id: OsmId) -> Result<Option<(f64, f64)>, MiddleError> {
        let Ok(slot) = u64::try_from(id) else {
            return Ok(None);
        };
        if slot >= self.slots {
            return Ok(None);
        }

        let mut entry = vec![0u8; entry_len(self.mode) as usize];
        self.file
            .seek(SeekFrom::Start(HEADER_LEN + slot * entry_len(self.mode)))
            .map_err(io_err("seeking the flat node file"))?;
        self.file
            .read_exact(&mut entry)
            .map_err(io_err("reading a flat node entry"))?;
        Ok(self.decode_entry(&entry))
    }

    /// Batched read: hydrate every still-unset slot of `out` whose id
    /// exists, returning the total number of hydrated entries. Missing ids
    /// stay unset; the caller compacts.
    pub fn get_list(
        &mut self,
        out: &mut [OsmNode],
        ids: &[OsmId],
    ) -> Result<usize, MiddleError> {
        let mut count = 0;
        for (slot, id) in out.iter_mut().zip(ids) {
            if !slot.is_unset() {
                count += 1;
                continue;
            }
            if let Some((lat, lon)) = self.get(*id)? {
                *slot = OsmNode::new(*id, lat, lon);
                count += 1;
            }
        }
        Ok(count)
    }
}
