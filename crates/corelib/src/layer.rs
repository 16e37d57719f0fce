//! Layer routing options.
//!
//! Every layer carries the policy nodes declare for it at registration:
//! metatile size, zoom bounds and geographic coverage. The router consults
//! it before hashing a tile onto the layer's ring.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tile::TileCoord;

/// Geographic box `[west, south, east, north]` in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// True if the interiors of the two boxes overlap. Boxes that only share
    /// an edge do not intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.west < other.east
            && other.west < self.east
            && self.south < other.north
            && other.south < self.north
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([west, south, east, north]: [f64; 4]) -> Self {
        Self::new(west, south, east, north)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.west, b.south, b.east, b.north]
    }
}

/// `bbox` as declared: a single box or a list of boxes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BboxSpec {
    One(BoundingBox),
    Many(Vec<BoundingBox>),
}

impl BboxSpec {
    pub fn boxes(&self) -> &[BoundingBox] {
        match self {
            BboxSpec::One(b) => std::slice::from_ref(b),
            BboxSpec::Many(list) => list,
        }
    }
}

/// Options stored per layer. Whichever node registers last for a layer
/// name overwrites them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metatile: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_zoom: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_zoom: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BboxSpec>,
}

impl LayerOptions {
    /// Reject option values that cannot be routed on.
    pub fn validate(&self) -> Result<()> {
        if self.metatile == Some(0) {
            return Err(Error::InvalidLayer("metatile must be at least 1".to_string()));
        }
        if let (Some(min), Some(max)) = (self.min_zoom, self.max_zoom) {
            if min > max {
                return Err(Error::InvalidLayer(format!(
                    "minZoom {} is greater than maxZoom {}",
                    min, max
                )));
            }
        }
        Ok(())
    }

    /// Metatile edge length, defaulting to 1.
    pub fn metatile(&self) -> u32 {
        self.metatile.unwrap_or(1).max(1)
    }

    /// Zoom bounds (inclusive) and bbox filter. With a list of boxes the
    /// tile must intersect at least one.
    pub fn admits(&self, tile: &TileCoord) -> bool {
        if self.min_zoom.is_some_and(|min| tile.z < min) {
            return false;
        }
        if self.max_zoom.is_some_and(|max| tile.z > max) {
            return false;
        }
        match &self.bbox {
            Some(spec) => {
                let bounds = tile.bounds();
                spec.boxes().iter().any(|b| b.intersects(&bounds))
            }
            None => true,
        }
    }

    /// Ring key for `tile` in `layer`: `layer/z/x/y` after metatile
    /// alignment. The filename is not part of the key, so every output of a
    /// tile block routes to the same node.
    pub fn routing_key(&self, layer: &str, tile: TileCoord) -> String {
        let aligned = tile.align_to_metatile(self.metatile());
        format!("{}/{}", layer, aligned)
    }
}
