//! Translation of a viewport into the three store query shapes.
//!
//! * bounds query: every live point inside the padded viewport (map markers)
//! * cluster query: one centroid + count per grid cell inside the padded viewport
//! * nearby query: points ranked by planar distance from the viewport center,
//!   paginated (list panel)

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BoundsError, FetchError};
use crate::geo;
use crate::models::{Bounds, ClusterSummary, LatLng, NearbyPage, Point};

/// Halo fetched around the visible viewport so small pans stay inside it.
pub const BOUNDS_PADDING: f64 = 0.3;

/// Nearby list page size.
pub const PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryShape {
    Bounds,
    Cluster,
    Nearby,
}

impl std::fmt::Display for QueryShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryShape::Bounds => write!(f, "bounds"),
            QueryShape::Cluster => write!(f, "cluster"),
            QueryShape::Nearby => write!(f, "nearby"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsQuery {
    pub bounds: Bounds,
}

impl BoundsQuery {
    /// Markers for a viewport: the viewport grown by [`BOUNDS_PADDING`].
    pub fn for_viewport(viewport: &Bounds) -> Self {
        BoundsQuery {
            bounds: geo::pad_bounds(viewport, BOUNDS_PADDING),
        }
    }

    /// An exact rectangle with no padding, e.g. one clustering cell.
    pub fn exact(bounds: Bounds) -> Self {
        BoundsQuery { bounds }
    }

    pub fn validate(&self) -> Result<(), BoundsError> {
        self.bounds.validate()
    }

    pub fn contains(&self, point: &Point) -> bool {
        geo::within_bounds(point.position(), &self.bounds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterQuery {
    pub bounds: Bounds,
    pub zoom: u32,
}

impl ClusterQuery {
    pub fn for_viewport(viewport: &Bounds, zoom: u32) -> Self {
        ClusterQuery {
            bounds: geo::pad_bounds(viewport, BOUNDS_PADDING),
            zoom,
        }
    }

    pub fn validate(&self) -> Result<(), BoundsError> {
        crate::cluster::validate_zoom(self.zoom)?;
        self.bounds.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyQuery {
    pub center: LatLng,
    /// `None` means no category filter.
    pub categories: Option<BTreeSet<String>>,
    pub offset: usize,
    pub limit: usize,
}

impl NearbyQuery {
    /// List page for a viewport, centered on the padded rectangle's centroid.
    pub fn for_viewport(
        viewport: &Bounds,
        selected: &BTreeSet<String>,
        offset: usize,
    ) -> Self {
        let padded = geo::pad_bounds(viewport, BOUNDS_PADDING);
        NearbyQuery {
            center: geo::bounds_center(&padded),
            categories: if selected.is_empty() {
                None
            } else {
                Some(selected.clone())
            },
            offset,
            limit: PAGE_SIZE,
        }
    }

    pub fn matches(&self, point: &Point) -> bool {
        match &self.categories {
            Some(selected) => crate::filter::matches_categories(point, selected),
            None => true,
        }
    }

    /// Rows the store should return: one past the page to detect a following page.
    pub fn fetch_limit(&self) -> usize {
        self.limit + 1
    }
}

impl NearbyPage {
    /// Build a page from up to `limit + 1` rows, trimming the look-ahead row.
    pub fn from_rows(mut rows: Vec<Point>, limit: usize) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        NearbyPage {
            items: rows,
            has_more,
        }
    }
}

/// Rank `candidates` for a nearby query: filter, order by planar distance
/// (stable, so ties keep input order) and cut the `offset..offset + limit + 1` window.
pub fn rank_nearby<I>(candidates: I, query: &NearbyQuery) -> Vec<Point>
where
    I: IntoIterator<Item = Point>,
{
    let mut ranked: Vec<(f64, Point)> = candidates
        .into_iter()
        .filter(|p| p.has_valid_coordinates() && query.matches(p))
        .map(|p| (geo::planar_distance_sq(query.center, p.position()), p))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    ranked
        .into_iter()
        .skip(query.offset)
        .take(query.fetch_limit())
        .map(|(_, p)| p)
        .collect()
}

/// Store access for the three query shapes.
///
/// Implementations must exclude soft-deleted records.
#[async_trait]
pub trait PointSource {
    async fn fetch_bounds(&self, query: &BoundsQuery) -> Result<Vec<Point>, FetchError>;

    async fn fetch_clusters(&self, query: &ClusterQuery)
        -> Result<Vec<ClusterSummary>, FetchError>;

    async fn fetch_nearby(&self, query: &NearbyQuery) -> Result<NearbyPage, FetchError>;
}
