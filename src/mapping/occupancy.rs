//! Multi-layer 3D occupancy map.
//!
//! A voxel grid whose cells hold four parallel feature lists (semantic
//! landmarks, visual features, corners, planars) plus an elevation sample.
//! The map also carries the two non-grid layers: the latest ground plane
//! estimate and the vegetation row lines.
//!
//! The map owns all feature storage; callers address features through
//! `(cell index, list position)` rather than back-pointers.

use serde::{Deserialize, Serialize};

use crate::config::MapConfig;
use crate::core::types::Point3;
use crate::error::{Result, SlamError};
use crate::features::{
    Corner, ImageFeature, Line2, MapFeature, Planar, SemanticFeature, SemiPlane,
};

/// One voxel of the multi-layer map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cell {
    pub semantic: Vec<SemanticFeature>,
    pub visual: Vec<ImageFeature>,
    pub corners: Vec<Corner>,
    pub planars: Vec<Planar>,
    /// Latest ground elevation sample inside this column, meters.
    pub elevation: Option<f32>,
}

impl Cell {
    /// Whether the cell stores no features at all.
    pub fn is_empty(&self) -> bool {
        self.semantic.is_empty()
            && self.visual.is_empty()
            && self.corners.is_empty()
            && self.planars.is_empty()
    }

    /// Visualization occupancy score: 10 per semantic landmark.
    ///
    /// The scale is a display convention carried over from the occupancy
    /// grid exporter; it is not interpreted elsewhere.
    pub fn occupancy_score(&self) -> u32 {
        self.semantic.len() as u32 * 10
    }
}

/// Multi-layer 3D occupancy map.
#[derive(Debug, Clone)]
pub struct OccupancyMap {
    config: MapConfig,
    cells: Vec<Cell>,
    nx: usize,
    ny: usize,
    nz: usize,
    /// Latest ground plane estimate, in map frame.
    pub ground_plane: Option<SemiPlane>,
    /// Vegetation row lines, rewritten every frame.
    pub vegetation_lines: Vec<Line2>,
}

impl OccupancyMap {
    /// Create an empty map covering the configured extents.
    pub fn new(config: &MapConfig) -> Result<Self> {
        if config.resolution <= 0.0 {
            return Err(SlamError::Config("map resolution must be positive".into()));
        }
        let nx = (config.width / config.resolution).ceil() as usize;
        let ny = (config.length / config.resolution).ceil() as usize;
        let nz = (config.height / config.resolution).ceil() as usize;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(SlamError::Config("map extents must be positive".into()));
        }

        Ok(Self {
            config: config.clone(),
            cells: vec![Cell::default(); nx * ny * nz],
            nx,
            ny,
            nz,
            ground_plane: None,
            vegetation_lines: Vec::new(),
        })
    }

    /// Map geometry.
    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Grid dimensions in cells.
    pub fn dimensions(&self) -> (usize, usize, usize) {
        (self.nx, self.ny, self.nz)
    }

    /// Cell edge in meters.
    pub fn resolution(&self) -> f32 {
        self.config.resolution
    }

    /// Convert continuous coordinates to integer cell indices.
    ///
    /// A coordinate exactly on a cell boundary belongs to the higher-index
    /// cell (floor semantics).
    pub fn cell_of(&self, x: f32, y: f32, z: f32) -> Result<(usize, usize, usize)> {
        let i = ((x - self.config.origin_x) / self.config.resolution).floor();
        let j = ((y - self.config.origin_y) / self.config.resolution).floor();
        let k = ((z - self.config.origin_z) / self.config.resolution).floor();

        if i < 0.0 || j < 0.0 || k < 0.0 {
            return Err(SlamError::OutOfBounds(x, y, z));
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if i >= self.nx || j >= self.ny || k >= self.nz {
            return Err(SlamError::OutOfBounds(x, y, z));
        }
        Ok((i, j, k))
    }

    #[inline]
    fn flat(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.nx + k * self.nx * self.ny
    }

    /// Cell at continuous coordinates.
    pub fn at(&self, x: f32, y: f32, z: f32) -> Result<&Cell> {
        let (i, j, k) = self.cell_of(x, y, z)?;
        Ok(&self.cells[self.flat(i, j, k)])
    }

    /// Mutable cell at continuous coordinates.
    pub fn at_mut(&mut self, x: f32, y: f32, z: f32) -> Result<&mut Cell> {
        let (i, j, k) = self.cell_of(x, y, z)?;
        let idx = self.flat(i, j, k);
        Ok(&mut self.cells[idx])
    }

    /// Cell by integer indices, if inside the grid.
    pub fn cell(&self, i: usize, j: usize, k: usize) -> Option<&Cell> {
        (i < self.nx && j < self.ny && k < self.nz).then(|| &self.cells[self.flat(i, j, k)])
    }

    /// Insert a feature into its owning cell.
    pub fn insert(&mut self, feature: MapFeature) -> Result<()> {
        let p = *feature.position();
        let cell = self.at_mut(p.x, p.y, p.z)?;
        match feature {
            MapFeature::Semantic(f) => cell.semantic.push(f),
            MapFeature::Visual(f) => cell.visual.push(f),
            MapFeature::Corner(f) => cell.corners.push(f),
            MapFeature::Planar(f) => cell.planars.push(f),
        }
        Ok(())
    }

    /// Replace `old` with `new`, moving between cells when the position
    /// changed. `old` is matched by id when non-zero, otherwise by
    /// position equality. Returns false when `old` was not found.
    pub fn update(&mut self, old: &MapFeature, new: MapFeature) -> Result<bool> {
        let p = *old.position();
        let (i, j, k) = self.cell_of(p.x, p.y, p.z)?;
        let idx = self.flat(i, j, k);
        let cell = &mut self.cells[idx];

        let removed = match old {
            MapFeature::Semantic(f) => remove_matching(&mut cell.semantic, f.id, &p, |c| {
                (c.id, c.pos)
            }),
            MapFeature::Visual(f) => remove_matching(&mut cell.visual, f.id, &p, |c| (c.id, c.pos)),
            MapFeature::Corner(f) => {
                remove_matching(&mut cell.corners, f.id, &p, |c| (c.id, c.pos))
            }
            MapFeature::Planar(f) => {
                remove_matching(&mut cell.planars, f.id, &p, |c| (c.id, c.pos))
            }
        };

        if !removed {
            return Ok(false);
        }
        self.insert(new)?;
        Ok(true)
    }

    /// References to cells within a Chebyshev radius, skipping the center.
    pub fn neighbors(
        &self,
        x: f32,
        y: f32,
        z: f32,
        radius_cells: usize,
    ) -> Result<Vec<&Cell>> {
        let (ci, cj, ck) = self.cell_of(x, y, z)?;
        let r = radius_cells as isize;
        let mut out = Vec::new();

        for dk in -r..=r {
            for dj in -r..=r {
                for di in -r..=r {
                    if di == 0 && dj == 0 && dk == 0 {
                        continue;
                    }
                    let i = ci as isize + di;
                    let j = cj as isize + dj;
                    let k = ck as isize + dk;
                    if i < 0 || j < 0 || k < 0 {
                        continue;
                    }
                    if let Some(cell) = self.cell(i as usize, j as usize, k as usize) {
                        out.push(cell);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Ordered traversal of all cells: i fastest, then j, then k.
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize, usize), &Cell)> {
        let (nx, ny, _) = (self.nx, self.ny, self.nz);
        self.cells.iter().enumerate().map(move |(idx, cell)| {
            let k = idx / (nx * ny);
            let rem = idx % (nx * ny);
            let j = rem / nx;
            let i = rem % nx;
            ((i, j, k), cell)
        })
    }

    /// Number of non-empty cells.
    pub fn occupied_cells(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    /// Total features per layer: (semantic, visual, corners, planars).
    pub fn layer_counts(&self) -> (usize, usize, usize, usize) {
        let mut counts = (0, 0, 0, 0);
        for cell in &self.cells {
            counts.0 += cell.semantic.len();
            counts.1 += cell.visual.len();
            counts.2 += cell.corners.len();
            counts.3 += cell.planars.len();
        }
        counts
    }

    /// Store a ground elevation sample in the column containing (x, y).
    pub fn update_elevation(&mut self, x: f32, y: f32, z: f32) -> Result<()> {
        let cell = self.at_mut(x, y, z)?;
        cell.elevation = Some(z);
        Ok(())
    }

    /// Coarser map aggregating k³ cells per super-cell. Feature lists are
    /// concatenated; elevation keeps the highest sample.
    pub fn downsample(&self, k: usize) -> Result<OccupancyMap> {
        if k == 0 {
            return Err(SlamError::Config("downsample factor must be at least 1".into()));
        }
        let mut config = self.config.clone();
        config.resolution *= k as f32;
        let mut coarse = OccupancyMap::new(&config)?;

        for (_, cell) in self.iter().filter(|(_, c)| !c.is_empty() || c.elevation.is_some()) {
            for f in &cell.semantic {
                let _ = coarse.insert(MapFeature::Semantic(f.clone()));
            }
            for f in &cell.visual {
                let _ = coarse.insert(MapFeature::Visual(f.clone()));
            }
            for f in &cell.corners {
                let _ = coarse.insert(MapFeature::Corner(f.clone()));
            }
            for f in &cell.planars {
                let _ = coarse.insert(MapFeature::Planar(f.clone()));
            }
        }

        // Elevation: keep the highest sample per super-column.
        for ((i, j, _), cell) in self.iter() {
            if let Some(elev) = cell.elevation {
                let x = self.config.origin_x + (i as f32 + 0.5) * self.config.resolution;
                let y = self.config.origin_y + (j as f32 + 0.5) * self.config.resolution;
                if let Ok(target) = coarse.at_mut(x, y, elev) {
                    target.elevation = Some(target.elevation.map_or(elev, |e| e.max(elev)));
                }
            }
        }
        coarse.ground_plane = self.ground_plane.clone();
        coarse.vegetation_lines = self.vegetation_lines.clone();
        Ok(coarse)
    }

    // ------------------------------------------------------------------
    // Nearest-neighbor queries
    // ------------------------------------------------------------------

    /// Nearest semantic landmark by xy distance within `max_dist`.
    pub fn nearest_semantic(&self, query: &Point3, max_dist: f32) -> Option<&SemanticFeature> {
        self.nearest_in_layers(query, max_dist, |cell, q, best| {
            for f in &cell.semantic {
                let d = q.distance_xy(&f.pos);
                if d < best.1 {
                    *best = (Some(f), d);
                }
            }
        })
    }

    /// Nearest corner by 3D distance within `max_dist`.
    pub fn nearest_corner(&self, query: &Point3, max_dist: f32) -> Option<&Corner> {
        self.nearest_in_layers(query, max_dist, |cell, q, best| {
            for f in &cell.corners {
                let d = q.distance(&f.pos);
                if d < best.1 {
                    *best = (Some(f), d);
                }
            }
        })
    }

    /// Nearest planar by 3D distance within `max_dist`.
    pub fn nearest_planar(&self, query: &Point3, max_dist: f32) -> Option<&Planar> {
        self.nearest_in_layers(query, max_dist, |cell, q, best| {
            for f in &cell.planars {
                let d = q.distance(&f.pos);
                if d < best.1 {
                    *best = (Some(f), d);
                }
            }
        })
    }

    /// Nearest visual feature by 3D distance within `max_dist`.
    pub fn nearest_visual(&self, query: &Point3, max_dist: f32) -> Option<&ImageFeature> {
        self.nearest_in_layers(query, max_dist, |cell, q, best| {
            for f in &cell.visual {
                let d = q.distance(&f.pos);
                if d < best.1 {
                    *best = (Some(f), d);
                }
            }
        })
    }

    /// Shared NN walk: check the owning cell first, then expand Chebyshev
    /// rings up to ceil(max_dist / resolution), stopping at the first ring
    /// with a hit. Ties break by insertion order (strict `<` keeps the
    /// earlier feature).
    fn nearest_in_layers<'a, F, T>(
        &'a self,
        query: &Point3,
        max_dist: f32,
        mut scan: F,
    ) -> Option<&'a T>
    where
        F: FnMut(&'a Cell, &Point3, &mut (Option<&'a T>, f32)),
    {
        let (ci, cj, ck) = self.cell_of(query.x, query.y, query.z).ok()?;
        let max_ring = (max_dist / self.config.resolution).ceil() as isize;

        for ring in 0..=max_ring {
            let mut best: (Option<&T>, f32) = (None, max_dist);
            self.for_ring_cells(ci as isize, cj as isize, ck as isize, ring, |cell| {
                scan(cell, query, &mut best);
            });
            if best.0.is_some() {
                return best.0;
            }
        }
        None
    }

    /// Visit all cells at exactly Chebyshev distance `ring` from the center.
    fn for_ring_cells<'a, F>(&'a self, ci: isize, cj: isize, ck: isize, ring: isize, mut f: F)
    where
        F: FnMut(&'a Cell),
    {
        for dk in -ring..=ring {
            for dj in -ring..=ring {
                for di in -ring..=ring {
                    if di.abs().max(dj.abs()).max(dk.abs()) != ring {
                        continue;
                    }
                    let (i, j, k) = (ci + di, cj + dj, ck + dk);
                    if i < 0 || j < 0 || k < 0 {
                        continue;
                    }
                    if let Some(cell) = self.cell(i as usize, j as usize, k as usize) {
                        f(cell);
                    }
                }
            }
        }
    }
}

/// Remove the first element matching by id (when non-zero) or by position.
fn remove_matching<T, F>(list: &mut Vec<T>, id: u32, pos: &Point3, key: F) -> bool
where
    F: Fn(&T) -> (u32, Point3),
{
    let found = list.iter().position(|item| {
        let (item_id, item_pos) = key(item);
        if id != 0 {
            item_id == id
        } else {
            item_pos == *pos
        }
    });
    match found {
        Some(idx) => {
            list.remove(idx);
            true
        }
        None => false,
    }
}
