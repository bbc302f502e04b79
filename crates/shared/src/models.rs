use serde::{Deserialize, Serialize};

use crate::error::BoundsError;
use crate::geo;

/// A WGS84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        LatLng { lat, lng }
    }
}

/// A located restaurant record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Point {
    /// Identity key used to collapse duplicate records, e.g. `"역삼맛집-37.5013-127.0396"`.
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.name, self.lat, self.lng)
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn has_valid_coordinates(&self) -> bool {
        geo::is_valid_coordinate(self.lat, self.lng)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    /// Collapse duplicate category labels, keeping the first occurrence.
    pub fn normalize_categories(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.categories
            .retain(|c| !c.trim().is_empty() && seen.insert(c.clone()));
    }
}

/// A record as it arrives from ingestion, before coordinates are known to exist.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPoint {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl RawPoint {
    /// Promote to a [`Point`]. Records without usable coordinates yield `None`.
    pub fn into_point(self, region: Option<String>) -> Option<Point> {
        let (lat, lng) = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => (lat, lng),
            _ => return None,
        };
        // Zero is what the geocoder writes when it gives up.
        if lat == 0.0 || lng == 0.0 || !geo::is_valid_coordinate(lat, lng) {
            return None;
        }
        let mut point = Point {
            name: self.name,
            address: self.address,
            lat,
            lng,
            link: self.link.unwrap_or_default(),
            recommendation: self.recommendation.unwrap_or_default(),
            categories: self.categories.unwrap_or_default(),
            region,
        };
        point.normalize_categories();
        Some(point)
    }
}

/// An axis-aligned viewport rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Bounds {
            north,
            south,
            east,
            west,
        }
    }

    /// Reject rectangles the spatial queries cannot answer.
    ///
    /// Viewports crossing the antimeridian (`west > east`) are not supported.
    pub fn validate(&self) -> Result<(), BoundsError> {
        let edges = [self.north, self.south, self.east, self.west];
        if edges.iter().any(|v| !v.is_finite()) {
            return Err(BoundsError::NonFinite);
        }
        if self.south > self.north {
            return Err(BoundsError::Inverted {
                south: self.south,
                north: self.north,
            });
        }
        if self.west > self.east {
            return Err(BoundsError::WrapsAntimeridian {
                west: self.west,
                east: self.east,
            });
        }
        Ok(())
    }

    pub fn lat_span(&self) -> f64 {
        self.north - self.south
    }

    pub fn lng_span(&self) -> f64 {
        self.east - self.west
    }
}

/// A server-side cluster row: centroid plus member count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub lat: f64,
    pub lng: f64,
    pub count: u64,
}

/// A cluster computed over already materialized points.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub lat: f64,
    pub lng: f64,
    pub count: u64,
    pub members: Vec<Point>,
}

impl Cluster {
    pub fn summary(&self) -> ClusterSummary {
        ClusterSummary {
            lat: self.lat,
            lng: self.lng,
            count: self.count,
        }
    }
}

/// One page of nearest-neighbor results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyPage {
    pub items: Vec<Point>,
    pub has_more: bool,
}
