//! Render worker pool (C5, spec §4.5).
//!
//! `num_threads` long-lived worker threads, each with its own pre-built
//! engine per style (the rendering engine is not guaranteed thread-safe —
//! spec §4.5/§9). Thread spawning follows the teacher's
//! `thread::Builder::new().name(...).spawn(...)` idiom
//! (`bulk_preload.rs`); the fetch/render/split/write/notify loop follows
//! `RenderThread.loop`/`render_request`/`render_meta` in
//! `original_source/renderd.py`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::coord::MetatileKey;
use crate::engine::{encode_png_tile, Envelope, RenderEngine, RENDER_BUFFER_PX};
use crate::error::{RenderdError, RenderdResult};
use crate::metatile::{self, PlacedTile};
use crate::projection::{LonLat, ProjectionTables, WorldPixel};
use crate::protocol::Command;
use crate::scheduler::Scheduler;
use crate::style::StyleRegistry;

const TILE_PX: u32 = 256;

/// Spawn `num_threads` daemon worker threads. Threads run until the
/// process exits; in-flight renders are abandoned without cleanup on
/// shutdown (spec §5 "Cancellation").
pub fn spawn_pool(
    num_threads: usize,
    scheduler: Arc<Scheduler>,
    styles: Arc<StyleRegistry>,
    tile_dir: PathBuf,
) -> Vec<JoinHandle<()>> {
    let projection = Arc::new(ProjectionTables::new());

    (0..num_threads)
        .map(|idx| {
            let scheduler = Arc::clone(&scheduler);
            let styles = Arc::clone(&styles);
            let tile_dir = tile_dir.clone();
            let projection = Arc::clone(&projection);

            thread::Builder::new()
                .name(format!("renderd-worker-{idx}"))
                .spawn(move || worker_loop(idx as u64, scheduler, styles, tile_dir, projection))
                .expect("failed to spawn render worker thread")
        })
        .collect()
}

fn worker_loop(
    worker_id: u64,
    scheduler: Arc<Scheduler>,
    styles: Arc<StyleRegistry>,
    tile_dir: PathBuf,
    projection: Arc<ProjectionTables>,
) {
    // One engine instance per known style, built once for this thread —
    // never shared across workers (spec §9 "Per-worker engine state").
    let mut engines: HashMap<String, Box<dyn RenderEngine>> = styles
        .names()
        .map(|name| {
            let def = styles.get(name).unwrap();
            (name.to_string(), (def.engine_factory)())
        })
        .collect();

    loop {
        let key = scheduler.fetch();

        let result = render_metatile(
            worker_id,
            &key,
            &mut engines,
            &styles,
            &tile_dir,
            &projection,
        );

        if let Err(e) = &result {
            eprintln!("[WORKER {worker_id}] render failed for {key:?}: {e}");
        }

        let requesters = scheduler.pop_requests(&key);
        let status = if result.is_ok() { Command::Done } else { Command::NotDone };
        for req in requesters {
            if req.command == Command::Render {
                req.respond(status);
            }
            // Dirty requesters never receive a response (spec §4.3).
        }
    }
}

fn render_metatile(
    worker_id: u64,
    key: &MetatileKey,
    engines: &mut HashMap<String, Box<dyn RenderEngine>>,
    styles: &StyleRegistry,
    tile_dir: &Path,
    projection: &ProjectionTables,
) -> RenderdResult<()> {
    let style_def = styles
        .get(&key.style)
        .ok_or_else(|| RenderdError::UnknownStyle(key.style.clone()))?;
    let engine = engines
        .get_mut(&key.style)
        .ok_or_else(|| RenderdError::UnknownStyle(key.style.clone()))?;

    let side_tiles = key.group_side();
    let bbox = metatile_bbox(key, side_tiles, projection, style_def.projector.as_ref());

    let render_px = TILE_PX * side_tiles;
    let image = engine.render(bbox, render_px, RENDER_BUFFER_PX)?;

    let mut tiles = Vec::with_capacity((side_tiles * side_tiles) as usize);
    for xx in 0..side_tiles {
        for yy in 0..side_tiles {
            let rgba = image.tile_rgba(xx, yy, TILE_PX);
            let bytes = encode_png_tile(&rgba, TILE_PX)?;
            tiles.push(PlacedTile { xx, yy, bytes });
        }
    }

    metatile::write_metatile(tile_dir, key, &tiles, worker_id)?;
    Ok(())
}

/// Metatile bounding box computation (spec §4.5 step 3).
fn metatile_bbox(
    key: &MetatileKey,
    side_tiles: u32,
    projection: &ProjectionTables,
    projector: &dyn crate::engine::Projector,
) -> Envelope {
    let p0 = WorldPixel {
        px: (key.mx * 256) as f64,
        py: ((key.my + side_tiles as i64) * 256) as f64,
    };
    let p1 = WorldPixel {
        px: ((key.mx + side_tiles as i64) * 256) as f64,
        py: (key.my * 256) as f64,
    };

    let l0: LonLat = projection.pixel_to_lonlat(p0, key.z);
    let l1: LonLat = projection.pixel_to_lonlat(p1, key.z);

    let c0 = projector.forward(l0);
    let c1 = projector.forward(l1);

    Envelope::new(c0.0, c0.1, c1.0, c1.1)
}
