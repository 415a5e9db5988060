//! Metatile path resolution and binary format (C2, spec §4.2).
//!
//! The on-disk format is ABI — readers (mod_tile and compatibles) depend
//! on it verbatim (spec §6). Header/index/payload layout and the
//! write-to-temp-then-rename pattern are grounded on the teacher's
//! `pack.rs` (`LevelPack::parse`, `pack_dzsave_tiles`'s magic+header+index
//! writer), generalized from a per-level pack file to a per-metatile file
//! and little-endian throughout per spec §9.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::coord::{MetatileKey, METATILE};
use crate::error::{RenderdError, RenderdResult};

const META_MAGIC: &[u8; 4] = b"META";
const HEADER_LEN: usize = 4 + 4 * 4;
const INDEX_ENTRY_LEN: usize = 8;
const TILES_PER_META: usize = (METATILE * METATILE) as usize;
const INDEX_LEN: usize = INDEX_ENTRY_LEN * TILES_PER_META;

/// Compute the on-disk path for a metatile key, per spec §4.2's nibble
/// hash scheme.
pub fn metatile_path(tile_dir: &Path, key: &MetatileKey) -> PathBuf {
    let h = key.hash_bytes();
    tile_dir
        .join(&key.style)
        .join(key.z.to_string())
        .join(h[4].to_string())
        .join(h[3].to_string())
        .join(h[2].to_string())
        .join(h[1].to_string())
        .join(format!("{}.meta", h[0]))
}

fn tmp_path(final_path: &Path, worker_id: u64) -> PathBuf {
    let mut s = final_path.as_os_str().to_os_string();
    s.push(format!(".tmp.{worker_id}"));
    PathBuf::from(s)
}

/// Create the parent directory of `path`, tolerating a concurrent
/// creator having just made the same directory (spec §4.2/§9).
fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    if dir.exists() {
        return Ok(());
    }
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => {
            if dir.exists() {
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

/// One encoded tile, placed at its `(xx, yy)` position within the S×S
/// metatile block (0-based, relative to the metatile's top-left tile).
pub struct PlacedTile {
    pub xx: u32,
    pub yy: u32,
    pub bytes: Bytes,
}

/// Write a metatile file atomically: write to `{path}.tmp.{worker_id}`,
/// then rename over the final path (spec §4.2).
///
/// `tiles` need not cover every slot of the S×S block in bounds — callers
/// pass exactly the rendered tiles; missing slots (always the case when
/// `S < METATILE` at low zooms) are padded with `offset=0, size=0`.
pub fn write_metatile(
    tile_dir: &Path,
    key: &MetatileKey,
    tiles: &[PlacedTile],
    worker_id: u64,
) -> RenderdResult<PathBuf> {
    let final_path = metatile_path(tile_dir, key);
    ensure_parent_dir(&final_path)?;
    let tmp = tmp_path(&final_path, worker_id);

    let result = (|| -> io::Result<()> {
        let file = File::create(&tmp)?;
        let mut w = BufWriter::new(file);

        w.write_all(META_MAGIC)?;
        w.write_all(&(TILES_PER_META as i32).to_le_bytes())?;
        w.write_all(&(key.mx as i32).to_le_bytes())?;
        w.write_all(&(key.my as i32).to_le_bytes())?;
        w.write_all(&(key.z as i32).to_le_bytes())?;

        let mut offsets = vec![0u32; TILES_PER_META];
        let mut sizes = vec![0u32; TILES_PER_META];
        let mut offset = (HEADER_LEN + INDEX_LEN) as u32;
        for t in tiles {
            let slot = MetatileKey::tile_offset(t.xx as i64, t.yy as i64);
            offsets[slot] = offset;
            sizes[slot] = t.bytes.len() as u32;
            offset += t.bytes.len() as u32;
        }

        for i in 0..TILES_PER_META {
            w.write_all(&offsets[i].to_le_bytes())?;
            w.write_all(&sizes[i].to_le_bytes())?;
        }

        for t in tiles {
            w.write_all(&t.bytes)?;
        }

        w.flush()
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(RenderdError::Io(e));
    }

    fs::rename(&tmp, &final_path)?;
    Ok(final_path)
}

/// A parsed metatile file, for tests and verification (spec §8 invariant 5).
pub struct ParsedMetatile {
    pub count: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub entries: Vec<(u32, u32)>,
    pub payload: Vec<u8>,
}

pub fn read_metatile(path: &Path) -> RenderdResult<ParsedMetatile> {
    let mut buf = Vec::new();
    File::open(path)?.read_to_end(&mut buf)?;

    if buf.len() < HEADER_LEN + INDEX_LEN {
        return Err(RenderdError::Protocol("metatile file too short".into()));
    }
    if &buf[0..4] != META_MAGIC {
        return Err(RenderdError::Protocol("bad metatile magic".into()));
    }
    let count = i32::from_le_bytes(buf[4..8].try_into().unwrap());
    let x = i32::from_le_bytes(buf[8..12].try_into().unwrap());
    let y = i32::from_le_bytes(buf[12..16].try_into().unwrap());
    let z = i32::from_le_bytes(buf[16..20].try_into().unwrap());

    let mut entries = Vec::with_capacity(TILES_PER_META);
    let mut cursor = HEADER_LEN;
    for _ in 0..TILES_PER_META {
        let off = u32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap());
        let size = u32::from_le_bytes(buf[cursor + 4..cursor + 8].try_into().unwrap());
        entries.push((off, size));
        cursor += INDEX_ENTRY_LEN;
    }

    Ok(ParsedMetatile {
        count,
        x,
        y,
        z,
        entries,
        payload: buf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(style: &str, mx: i64, my: i64, z: u32) -> MetatileKey {
        MetatileKey {
            style: style.to_string(),
            mx,
            my,
            z,
        }
    }

    #[test]
    fn full_metatile_round_trips() {
        let dir = TempDir::new().unwrap();
        let k = key("default", 504, 336, 10);

        let mut tiles = Vec::new();
        for xx in 0..8u32 {
            for yy in 0..8u32 {
                tiles.push(PlacedTile {
                    xx,
                    yy,
                    bytes: Bytes::from(vec![(xx * 8 + yy) as u8; 10]),
                });
            }
        }

        let path = write_metatile(dir.path(), &k, &tiles, 1).unwrap();
        assert!(path.exists());

        let parsed = read_metatile(&path).unwrap();
        assert_eq!(&parsed.payload[0..4], META_MAGIC);
        assert_eq!(parsed.count, 64);
        assert_eq!(parsed.x, 504);
        assert_eq!(parsed.y, 336);
        assert_eq!(parsed.z, 10);
        for (off, size) in &parsed.entries {
            assert!(*off > 0);
            assert_eq!(*size, 10);
        }
    }

    #[test]
    fn low_zoom_pads_missing_slots() {
        let dir = TempDir::new().unwrap();
        let k = key("default", 0, 0, 1);

        let tiles = vec![
            PlacedTile { xx: 0, yy: 0, bytes: Bytes::from_static(b"a") },
            PlacedTile { xx: 1, yy: 0, bytes: Bytes::from_static(b"bb") },
            PlacedTile { xx: 0, yy: 1, bytes: Bytes::from_static(b"ccc") },
            PlacedTile { xx: 1, yy: 1, bytes: Bytes::from_static(b"dddd") },
        ];

        let path = write_metatile(dir.path(), &k, &tiles, 7).unwrap();
        let parsed = read_metatile(&path).unwrap();

        // active offsets: 0, 1, 8, 9 (x-major, y-minor)
        for i in [0usize, 1, 8, 9] {
            assert_ne!(parsed.entries[i], (0, 0));
        }
        for i in 0..64 {
            if ![0, 1, 8, 9].contains(&i) {
                assert_eq!(parsed.entries[i], (0, 0));
            }
        }
    }

    #[test]
    fn path_uses_nibble_hash_layout() {
        let dir = TempDir::new().unwrap();
        let k = key("alt", 0, 0, 3);
        let path = metatile_path(dir.path(), &k);
        assert!(path.starts_with(dir.path().join("alt").join("3")));
        assert!(path.to_string_lossy().ends_with(".meta"));
    }

    #[test]
    fn concurrent_directory_creation_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let k = key("default", 0, 0, 0);
        let final_path = metatile_path(dir.path(), &k);
        fs::create_dir_all(final_path.parent().unwrap()).unwrap();

        // Directory already exists; ensure_parent_dir must not error.
        let tiles = vec![PlacedTile { xx: 0, yy: 0, bytes: Bytes::from_static(b"x") }];
        let result = write_metatile(dir.path(), &k, &tiles, 0);
        assert!(result.is_ok());
    }
}
