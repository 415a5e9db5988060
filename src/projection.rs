//! Spherical Mercator pixel<->lon/lat projection (spec §4.1).
//!
//! Precomputed per-zoom tables, ported from `SphericalProjection` in
//! `original_source/renderd.py`.

use std::f64::consts::PI;

use crate::coord::MAX_ZOOM;

const BASE_TILE_PX: f64 = 256.0;

/// A longitude/latitude pair, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

/// A pixel coordinate in the world-pixel space of a given zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldPixel {
    pub px: f64,
    pub py: f64,
}

/// Per-zoom spherical Mercator tables for zooms `0..=MAX_ZOOM`.
pub struct ProjectionTables {
    /// `C_z = 256 * 2^z`, world pixel extent at this zoom.
    c: Vec<f64>,
    /// `B_z = C_z / 360`.
    b: Vec<f64>,
    /// `K_z = C_z / (2*pi)`.
    k: Vec<f64>,
    /// `e_z = C_z / 2`, the center offset.
    e: Vec<f64>,
}

impl ProjectionTables {
    pub fn new() -> Self {
        Self::for_levels(MAX_ZOOM)
    }

    pub fn for_levels(levels: u32) -> Self {
        let mut c = Vec::with_capacity(levels as usize + 1);
        let mut b = Vec::with_capacity(levels as usize + 1);
        let mut k = Vec::with_capacity(levels as usize + 1);
        let mut e = Vec::with_capacity(levels as usize + 1);

        let mut cz = BASE_TILE_PX;
        for _ in 0..=levels {
            c.push(cz);
            b.push(cz / 360.0);
            k.push(cz / (2.0 * PI));
            e.push(cz / 2.0);
            cz *= 2.0;
        }

        Self { c, b, k, e }
    }

    /// `pixel_to_lonlat`: spec §4.1.
    pub fn pixel_to_lonlat(&self, p: WorldPixel, z: u32) -> LonLat {
        let z = z as usize;
        let lon = (p.px - self.e[z]) / self.b[z];
        let g = (p.py - self.e[z]) / -self.k[z];
        let lat = (2.0 * g.exp().atan() - PI / 2.0) * 180.0 / PI;
        LonLat { lon, lat }
    }

    /// `lonlat_to_pixel`: spec §4.1.
    pub fn lonlat_to_pixel(&self, ll: LonLat, z: u32) -> WorldPixel {
        let z = z as usize;
        let px = (self.e[z] + ll.lon * self.b[z]).round();
        let s = (ll.lat * PI / 180.0).sin().clamp(-0.9999, 0.9999);
        let py = (self.e[z] + 0.5 * ((1.0 + s) / (1.0 - s)).ln() * -self.k[z]).round();
        WorldPixel { px, py }
    }
}

impl Default for ProjectionTables {
    fn default() -> Self {
        Self::new()
    }
}
