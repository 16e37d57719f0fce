//! Web Mercator tile geometry.
//!
//! Converts slippy-map tile coordinates to the geographic box they cover
//! and aligns them to metatile blocks.

use std::f64::consts::PI;
use std::fmt;

use crate::layer::BoundingBox;

/// A tile address at zoom `z`, column `x`, row `y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Floor `x` and `y` to the origin of their `metatile`-sized block.
    ///
    /// A metatile of 0 is treated as 1.
    pub fn align_to_metatile(self, metatile: u32) -> Self {
        let m = metatile.max(1);
        Self {
            z: self.z,
            x: self.x - self.x % m,
            y: self.y - self.y % m,
        }
    }

    /// Geographic extent of the tile as `[west, south, east, north]`.
    pub fn bounds(&self) -> BoundingBox {
        let n = 2f64.powi(self.z as i32);
        let west = self.x as f64 / n * 360.0 - 180.0;
        let east = (self.x as f64 + 1.0) / n * 360.0 - 180.0;
        let north = row_to_lat(self.y as f64, n);
        let south = row_to_lat(self.y as f64 + 1.0, n);
        BoundingBox::new(west, south, east, north)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Latitude of the northern edge of tile row `row` (inverse Web Mercator).
fn row_to_lat(row: f64, n: f64) -> f64 {
    let lat_rad = (PI * (1.0 - 2.0 * row / n)).sinh().atan();
    lat_rad * 180.0 / PI
}
