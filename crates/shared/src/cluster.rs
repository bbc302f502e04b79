//! Zoom-scaled grid clustering.
//!
//! A cell at zoom `z` is a square of `360 / 2^z` degrees. Points are bucketed by
//! `(floor(lng / size), floor(lat / size))` and each non-empty cell reduces to the
//! mean of its members. Sums accumulate in insertion order so repeated runs over
//! the same input produce bit-identical centroids.
use std::collections::HashMap;

use crate::error::BoundsError;
use crate::geo;
use crate::models::{Cluster, ClusterSummary, Point};

/// Deepest zoom a grid is built for; a cell here is a few centimetres across.
pub const MAX_ZOOM: u32 = 30;

/// Cell side length in degrees for a zoom level. Zooms past [`MAX_ZOOM`] use
/// the [`MAX_ZOOM`] cell.
pub fn cell_size(zoom: u32) -> f64 {
    360.0 / 2f64.powi(zoom.min(MAX_ZOOM) as i32)
}

pub fn validate_zoom(zoom: u32) -> Result<(), BoundsError> {
    if zoom > MAX_ZOOM {
        return Err(BoundsError::ZoomOutOfRange {
            zoom,
            max: MAX_ZOOM,
        });
    }
    Ok(())
}

/// Grid cell `(x, y)` holding a coordinate at `zoom`.
pub fn cell_index(lat: f64, lng: f64, zoom: u32) -> (i64, i64) {
    let size = cell_size(zoom);
    ((lng / size).floor() as i64, (lat / size).floor() as i64)
}

/// Clustering applies strictly below the threshold; at or above it points render individually.
pub fn is_cluster_mode(zoom: u32, threshold: u32) -> bool {
    zoom < threshold
}

#[derive(Debug, Default, Clone)]
struct Cell {
    lat_sum: f64,
    lng_sum: f64,
    members: Vec<usize>,
}

/// Accumulates coordinates into cells at a fixed zoom.
///
/// Cells are reported in the order their first member was inserted.
#[derive(Debug, Clone)]
pub struct CellGrid {
    zoom: u32,
    index: HashMap<(i64, i64), usize>,
    cells: Vec<Cell>,
    inserted: usize,
}

impl CellGrid {
    pub fn new(zoom: u32) -> Self {
        CellGrid {
            zoom,
            index: HashMap::new(),
            cells: Vec::new(),
            inserted: 0,
        }
    }

    /// Add a coordinate. Returns `false` (and ignores it) for invalid coordinates.
    pub fn insert(&mut self, lat: f64, lng: f64) -> bool {
        if !geo::is_valid_coordinate(lat, lng) {
            return false;
        }
        let key = cell_index(lat, lng, self.zoom);
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.cells.push(Cell::default());
                self.index.insert(key, self.cells.len() - 1);
                self.cells.len() - 1
            }
        };
        let cell = &mut self.cells[slot];
        cell.lat_sum += lat;
        cell.lng_sum += lng;
        cell.members.push(self.inserted);
        self.inserted += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// One summary per non-empty cell.
    pub fn summaries(&self) -> Vec<ClusterSummary> {
        self.cells
            .iter()
            .map(|cell| {
                let n = cell.members.len() as f64;
                ClusterSummary {
                    lat: cell.lat_sum / n,
                    lng: cell.lng_sum / n,
                    count: cell.members.len() as u64,
                }
            })
            .collect()
    }

    /// Member positions (in accepted-insertion order) for each cell.
    fn member_slots(&self) -> impl Iterator<Item = &[usize]> {
        self.cells.iter().map(|cell| cell.members.as_slice())
    }
}

/// Client-side clustering over already materialized points.
///
/// Points with invalid coordinates are left out.
pub fn cluster_points(points: &[Point], zoom: u32) -> Vec<Cluster> {
    let mut grid = CellGrid::new(zoom);
    let mut accepted: Vec<&Point> = Vec::with_capacity(points.len());
    for p in points {
        if grid.insert(p.lat, p.lng) {
            accepted.push(p);
        }
    }

    grid.summaries()
        .into_iter()
        .zip(grid.member_slots())
        .map(|(summary, slots)| Cluster {
            lat: summary.lat,
            lng: summary.lng,
            count: summary.count,
            members: slots.iter().map(|&i| accepted[i].clone()).collect(),
        })
        .collect()
}
