//! Data file persistence
//!
//! File layout (little-endian):
//!
//! ```text
//! +--------+---------+-------------+-------+-----------------+
//! | "TURF" | version | payload len | crc32 | payload (msgpk) |
//! | 4 B    | u32     | u64         | u32   | len bytes       |
//! +--------+---------+-------------+-------+-----------------+
//! ```
//!
//! A new file is written next to the old one and renamed over it, so a crash
//! mid-write leaves the previous commit intact.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use turf_core::{Error, Result, Row, RowId};

use crate::memory::{StoreState, SyncMode, Table};

const MAGIC: &[u8; 4] = b"TURF";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 + 4;

#[derive(Serialize, Deserialize)]
struct PersistedRow {
    row_id: i64,
    data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    next_row_id: i64,
    tables: BTreeMap<String, BTreeMap<String, PersistedRow>>,
}

impl From<&StoreState> for PersistedState {
    fn from(state: &StoreState) -> Self {
        let tables = state
            .tables
            .iter()
            .map(|(name, table)| {
                let rows = table
                    .rows
                    .iter()
                    .map(|(key, row)| {
                        (
                            key.clone(),
                            PersistedRow {
                                row_id: row.row_id.as_i64(),
                                data: row.data.to_vec(),
                            },
                        )
                    })
                    .collect();
                (name.clone(), rows)
            })
            .collect();
        PersistedState {
            next_row_id: state.next_row_id,
            tables,
        }
    }
}

impl From<PersistedState> for StoreState {
    fn from(p: PersistedState) -> Self {
        let tables = p
            .tables
            .into_iter()
            .map(|(name, rows)| {
                let rows = rows
                    .into_iter()
                    .map(|(key, r)| {
                        (
                            key,
                            Row {
                                row_id: RowId(r.row_id),
                                data: r.data.into(),
                            },
                        )
                    })
                    .collect();
                (name, Arc::new(Table { rows }))
            })
            .collect();
        StoreState {
            version: 0,
            next_row_id: p.next_row_id,
            tables,
        }
    }
}

/// Load the state stored at `path`; a missing file is an empty store
pub(crate) fn load(path: &Path) -> Result<StoreState> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreState::default()),
        Err(e) => return Err(e.into()),
    };

    let mut magic = [0u8; 4];
    read_header_field(file.read_exact(&mut magic))?;
    if &magic != MAGIC {
        return Err(Error::Corruption(format!(
            "{} is not a Turf data file",
            path.display()
        )));
    }
    let version = read_header_field(file.read_u32::<LittleEndian>())?;
    if version != FORMAT_VERSION {
        return Err(Error::Corruption(format!(
            "Unsupported data file format version {}",
            version
        )));
    }
    let len = read_header_field(file.read_u64::<LittleEndian>())?;
    let expected_crc = read_header_field(file.read_u32::<LittleEndian>())?;

    let mut payload = Vec::new();
    file.read_to_end(&mut payload)?;
    if payload.len() as u64 != len {
        return Err(Error::Corruption(format!(
            "Data file truncated: expected {} payload bytes, found {}",
            len,
            payload.len()
        )));
    }
    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(Error::Corruption(format!(
            "Data file checksum mismatch: expected {:08x}, got {:08x}",
            expected_crc, actual_crc
        )));
    }

    let persisted: PersistedState = rmp_serde::from_slice(&payload)
        .map_err(|e| Error::Corruption(format!("Data file payload unreadable: {}", e)))?;
    Ok(persisted.into())
}

/// Atomically replace the file at `path` with `state`
pub(crate) fn save(path: &Path, state: &StoreState, sync: SyncMode) -> Result<()> {
    let payload = rmp_serde::to_vec(&PersistedState::from(state))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(MAGIC);
    buf.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    buf.write_u64::<LittleEndian>(payload.len() as u64)?;
    buf.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    buf.extend_from_slice(&payload);

    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        if sync == SyncMode::Always {
            file.sync_all()?;
        }
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_header_field<T>(r: io::Result<T>) -> Result<T> {
    r.map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Corruption("Data file header truncated".to_string()),
        _ => Error::IoError(e),
    })
}
