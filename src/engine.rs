//! Render engine / projection boundary (spec §1 "external collaborators",
//! §4.1 forward projection, §4.5 step 4-6).
//!
//! The core never rasterizes a map itself — it calls into a `RenderEngine`
//! for pixels and a `Projector` for the style's forward map projection,
//! exactly as the Python reference calls into `mapnik`. These traits are
//! the seam; `TestEngine`/`IdentityProjector` are a reference
//! implementation used by tests and as a runnable default, grounded on
//! the teacher's decode boundary (`decoder.rs`'s `TileData`) and its
//! one-object-per-worker-thread rule (`RenderThread` in
//! `original_source/renderd.py`, `SlideEntry` in the teacher's
//! `slide_pool.rs`).

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{RenderdError, RenderdResult};
use crate::projection::LonLat;

/// Overdraw margin passed to the engine when rendering a metatile block,
/// matching `m.buffer_size = 128` in `original_source/renderd.py`
/// (spec §4.5 step 4).
pub const RENDER_BUFFER_PX: u32 = 128;

/// Axis-aligned bounding box in the style's map-unit coordinate system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl Envelope {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            minx: x0.min(x1),
            miny: y0.min(y1),
            maxx: x0.max(x1),
            maxy: y0.max(y1),
        }
    }
}

/// A square RGBA raster, `side x side` pixels.
pub struct RenderedImage {
    pub side: u32,
    pub rgba: Vec<u8>,
}

impl RenderedImage {
    /// Extract the 256x256 tile at grid position `(xx, yy)` within this
    /// rendered block (spec §4.5 step 6 "split into an S×S grid").
    pub fn tile_rgba(&self, xx: u32, yy: u32, tile_px: u32) -> Vec<u8> {
        let stride = self.side as usize * 4;
        let mut out = Vec::with_capacity(tile_px as usize * tile_px as usize * 4);
        let x0 = (xx * tile_px) as usize;
        let y0 = (yy * tile_px) as usize;
        for row in 0..tile_px as usize {
            let start = (y0 + row) * stride + x0 * 4;
            let end = start + tile_px as usize * 4;
            out.extend_from_slice(&self.rgba[start..end]);
        }
        out
    }
}

/// Forward map-projection for one style: lon/lat -> map units. Delegated
/// per style (spec §4.1 "Forward map-unit projection per style is
/// delegated to the engine").
pub trait Projector: Send + Sync {
    fn forward(&self, lonlat: LonLat) -> (f64, f64);
}

/// The rendering engine a style is bound to. Implementations are not
/// required to be thread-safe as a whole — the worker pool holds one
/// instance per thread (spec §4.5, §9 "Per-worker engine state").
pub trait RenderEngine {
    /// Render `bbox` into a `side x side` RGBA image.
    fn render(&mut self, bbox: Envelope, side: u32, buffer_px: u32) -> RenderdResult<RenderedImage>;
}

/// Encode a single tile's RGBA pixels as PNG bytes (the `"png256"` format
/// named throughout spec §4.2/§4.5/§9).
pub fn encode_png_tile(rgba: &[u8], tile_px: u32) -> RenderdResult<Bytes> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(Cursor::new(&mut out), tile_px, tile_px);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| RenderdError::Render(format!("png header: {e}")))?;
        writer
            .write_image_data(rgba)
            .map_err(|e| RenderdError::Render(format!("png data: {e}")))?;
    }
    Ok(Bytes::from(out))
}

/// A deterministic test/reference engine: fills the block with a solid
/// color derived from the bounding box, no external rasterizer required.
/// Used by unit/integration tests and as the default for a binary with
/// no real map-rendering engine wired in.
#[derive(Default)]
pub struct TestEngine;

impl RenderEngine for TestEngine {
    fn render(&mut self, bbox: Envelope, side: u32, _buffer_px: u32) -> RenderdResult<RenderedImage> {
        let seed = ((bbox.minx.abs() as u64).wrapping_add(bbox.miny.abs() as u64)) % 255;
        let color = [seed as u8, (seed.wrapping_mul(7) % 255) as u8, 128u8, 255u8];
        let mut rgba = Vec::with_capacity(side as usize * side as usize * 4);
        for _ in 0..(side as usize * side as usize) {
            rgba.extend_from_slice(&color);
        }
        Ok(RenderedImage { side, rgba })
    }
}

/// Identity-ish projector for tests: treats lon/lat as already being in
/// map units (a flat-earth stand-in for a real Mercator/UTM projection).
#[derive(Default)]
pub struct IdentityProjector;

impl Projector for IdentityProjector {
    fn forward(&self, lonlat: LonLat) -> (f64, f64) {
        (lonlat.lon, lonlat.lat)
    }
}

/// Builds a fresh `RenderEngine` for a worker thread. Styles hand workers
/// a factory rather than a shared engine instance because the rendering
/// engine is not guaranteed thread-safe (spec §4.5, §9).
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn RenderEngine> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_extracts_correct_quadrant() {
        let side = 4u32;
        let mut rgba = vec![0u8; (side * side * 4) as usize];
        // Mark top-left pixel of the (1,0) quadrant (tile_px=2) distinctly.
        let tile_px = 2u32;
        let x0 = tile_px as usize; // quadrant (1,0) starts at x=2
        let stride = side as usize * 4;
        let idx = 0 * stride + x0 * 4;
        rgba[idx..idx + 4].copy_from_slice(&[9, 9, 9, 9]);

        let img = RenderedImage { side, rgba };
        let tile = img.tile_rgba(1, 0, tile_px);
        assert_eq!(&tile[0..4], &[9, 9, 9, 9]);
    }

    #[test]
    fn png_encode_produces_valid_signature() {
        let rgba = vec![255u8; 256 * 256 * 4];
        let bytes = encode_png_tile(&rgba, 256).unwrap();
        assert_eq!(&bytes[0..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn test_engine_renders_deterministically() {
        let mut engine = TestEngine;
        let bbox = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let img1 = engine.render(bbox, 256, RENDER_BUFFER_PX).unwrap();
        let img2 = engine.render(bbox, 256, RENDER_BUFFER_PX).unwrap();
        assert_eq!(img1.rgba, img2.rgba);
    }
}
