//! Map save/load.
//!
//! One record per non-empty cell carrying its `i, j, k` indices and the
//! four feature lists, written as pretty JSON so the file stays
//! human-readable. On load, features are re-indexed into cells by
//! position rather than trusting the stored indices.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::MapConfig;
use crate::error::Result;
use crate::features::{Corner, ImageFeature, Line2, MapFeature, Planar, SemanticFeature, SemiPlane};

use super::occupancy::OccupancyMap;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MapRecord {
    version: u32,
    config: MapConfig,
    cells: Vec<CellRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ground_plane: Option<SemiPlane>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    vegetation_lines: Vec<Line2>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CellRecord {
    i: usize,
    j: usize,
    k: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    semantic: Vec<SemanticFeature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    visual: Vec<ImageFeature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    corners: Vec<Corner>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    planars: Vec<Planar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    elevation: Option<f32>,
}

/// Write the map to a file.
pub fn save<P: AsRef<Path>>(map: &OccupancyMap, path: P) -> Result<()> {
    let cells: Vec<CellRecord> = map
        .iter()
        .filter(|(_, cell)| !cell.is_empty() || cell.elevation.is_some())
        .map(|((i, j, k), cell)| CellRecord {
            i,
            j,
            k,
            semantic: cell.semantic.clone(),
            visual: cell.visual.clone(),
            corners: cell.corners.clone(),
            planars: cell.planars.clone(),
            elevation: cell.elevation,
        })
        .collect();

    let record = MapRecord {
        version: FORMAT_VERSION,
        config: map.config().clone(),
        cells,
        ground_plane: map.ground_plane.clone(),
        vegetation_lines: map.vegetation_lines.clone(),
    };

    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &record)?;
    Ok(())
}

/// Read a map back. Features land in the cell their position addresses;
/// anything outside the stored extents is dropped with a warning.
pub fn load<P: AsRef<Path>>(path: P) -> Result<OccupancyMap> {
    let file = File::open(path)?;
    let record: MapRecord = serde_json::from_reader(BufReader::new(file))?;

    let mut map = OccupancyMap::new(&record.config)?;
    let mut dropped = 0usize;

    for cell in record.cells {
        for f in cell.semantic {
            if map.insert(MapFeature::Semantic(f)).is_err() {
                dropped += 1;
            }
        }
        for f in cell.visual {
            if map.insert(MapFeature::Visual(f)).is_err() {
                dropped += 1;
            }
        }
        for f in cell.corners {
            if map.insert(MapFeature::Corner(f)).is_err() {
                dropped += 1;
            }
        }
        for f in cell.planars {
            if map.insert(MapFeature::Planar(f)).is_err() {
                dropped += 1;
            }
        }
        if let Some(elevation) = cell.elevation {
            let c = map.config();
            let x = c.origin_x + (cell.i as f32 + 0.5) * c.resolution;
            let y = c.origin_y + (cell.j as f32 + 0.5) * c.resolution;
            let _ = map.update_elevation(x, y, elevation);
        }
    }

    if dropped > 0 {
        log::warn!("map load dropped {dropped} out-of-bounds features");
    }

    map.ground_plane = record.ground_plane;
    map.vegetation_lines = record.vegetation_lines;
    Ok(map)
}
