use async_trait::async_trait;
use matjip_shared::cluster::{validate_zoom, CellGrid};
use matjip_shared::error::{BoundsError, FetchError};
use matjip_shared::filter;
use matjip_shared::geo;
use matjip_shared::models::{Bounds, ClusterSummary, LatLng, NearbyPage, Point};
use matjip_shared::query::{BoundsQuery, ClusterQuery, NearbyQuery, PointSource};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Every record ever imported, keyed by insertion id.
const POINTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("points");
/// Coordinates of live records only; scanned by bounds and cluster queries.
const COORDS_TABLE: TableDefinition<u64, (f64, f64)> = TableDefinition::new("point_coords");
/// Identity key (`name-lat-lng`) to insertion id.
const KEYS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("point_keys");

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("row codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InvalidBounds(#[from] BoundsError),
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidBounds(e) => FetchError::InvalidQuery(e),
            other => FetchError::Store(other.to_string()),
        }
    }
}

/// On-disk row. Categories are kept as JSON array text.
#[derive(Debug, Serialize, Deserialize)]
struct PointRow {
    name: String,
    address: String,
    link: String,
    recommendation: String,
    categories: String,
    region: Option<String>,
    lat: f64,
    lng: f64,
    deleted_at: Option<String>,
}

impl PointRow {
    fn from_point(point: &Point) -> Result<Self, StoreError> {
        Ok(PointRow {
            name: point.name.clone(),
            address: point.address.clone(),
            link: point.link.clone(),
            recommendation: point.recommendation.clone(),
            categories: serde_json::to_string(&point.categories)?,
            region: point.region.clone(),
            lat: point.lat,
            lng: point.lng,
            deleted_at: None,
        })
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    fn into_point(self) -> Result<Point, StoreError> {
        Ok(Point {
            name: self.name,
            address: self.address,
            link: self.link,
            recommendation: self.recommendation,
            categories: serde_json::from_str(&self.categories)?,
            region: self.region,
            lat: self.lat,
            lng: self.lng,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PointCounts {
    pub total: u64,
    pub deleted: u64,
}

pub struct Storage {
    db: Database,
    path: PathBuf,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Arc<Self>, StoreError> {
        let db = Database::create(path)?;

        // Ensure tables exist
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(POINTS_TABLE)?;
            write_txn.open_table(COORDS_TABLE)?;
            write_txn.open_table(KEYS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Arc::new(Storage {
            db,
            path: path.to_path_buf(),
        }))
    }

    /// Insert points in one transaction. Records whose identity key is already
    /// stored (live or soft-deleted) are counted as duplicates and left alone.
    pub fn import(&self, points: &[Point]) -> Result<ImportSummary, StoreError> {
        let mut summary = ImportSummary::default();
        let write_txn = self.db.begin_write()?;
        {
            let mut rows = write_txn.open_table(POINTS_TABLE)?;
            let mut coords = write_txn.open_table(COORDS_TABLE)?;
            let mut keys = write_txn.open_table(KEYS_TABLE)?;

            let mut next_id = match rows.last()? {
                Some((id, _)) => id.value() + 1,
                None => 0,
            };

            for point in points {
                if !point.has_valid_coordinates() {
                    summary.skipped += 1;
                    continue;
                }
                let key = point.key();
                if keys.get(key.as_str())?.is_some() {
                    summary.duplicates += 1;
                    continue;
                }
                let row = serde_json::to_vec(&PointRow::from_point(point)?)?;
                rows.insert(next_id, row.as_slice())?;
                coords.insert(next_id, (point.lat, point.lng))?;
                keys.insert(key.as_str(), next_id)?;
                next_id += 1;
                summary.inserted += 1;
            }
        }
        write_txn.commit()?;

        tracing::debug!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "Imported points"
        );
        Ok(summary)
    }

    /// Flag a point as deleted so no query returns it again. Returns `false`
    /// for unknown keys and for points that were already deleted.
    pub fn soft_delete(&self, key: &str) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let keys = write_txn.open_table(KEYS_TABLE)?;
            let mut rows = write_txn.open_table(POINTS_TABLE)?;
            let mut coords = write_txn.open_table(COORDS_TABLE)?;

            let id = keys.get(key)?.map(|v| v.value());
            let bytes = match id {
                Some(id) => rows.get(id)?.map(|v| v.value().to_vec()),
                None => None,
            };

            match (id, bytes) {
                (Some(id), Some(bytes)) => {
                    let mut row = PointRow::decode(&bytes)?;
                    if row.is_live() {
                        row.deleted_at = Some(chrono::Utc::now().to_rfc3339());
                        rows.insert(id, serde_json::to_vec(&row)?.as_slice())?;
                        coords.remove(id)?;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };
        write_txn.commit()?;

        if deleted {
            tracing::info!(key, "Soft-deleted point");
        }
        Ok(deleted)
    }

    /// Live points inside `bounds`, in insertion order.
    pub fn points_in_bounds(&self, bounds: &Bounds) -> Result<Vec<Point>, StoreError> {
        bounds.validate()?;
        let read_txn = self.db.begin_read()?;
        let coords = read_txn.open_table(COORDS_TABLE)?;
        let rows = read_txn.open_table(POINTS_TABLE)?;

        let mut points = Vec::new();
        for entry in coords.iter()? {
            let (id, value) = entry?;
            let (lat, lng) = value.value();
            if !geo::within_bounds(LatLng::new(lat, lng), bounds) {
                continue;
            }
            if let Some(bytes) = rows.get(id.value())? {
                points.push(PointRow::decode(bytes.value())?.into_point()?);
            }
        }
        Ok(points)
    }

    /// Grid clusters over the live points inside `bounds`.
    pub fn clusters_in_bounds(
        &self,
        bounds: &Bounds,
        zoom: u32,
    ) -> Result<Vec<ClusterSummary>, StoreError> {
        validate_zoom(zoom)?;
        bounds.validate()?;
        let read_txn = self.db.begin_read()?;
        let coords = read_txn.open_table(COORDS_TABLE)?;

        let mut grid = CellGrid::new(zoom);
        for entry in coords.iter()? {
            let (_, value) = entry?;
            let (lat, lng) = value.value();
            if geo::within_bounds(LatLng::new(lat, lng), bounds) {
                grid.insert(lat, lng);
            }
        }
        Ok(grid.summaries())
    }

    /// One page of live points by planar distance from the query center.
    ///
    /// Ranking runs over the coordinate table; rows are decoded only once they
    /// can land in the page (or, with a category filter, need checking).
    pub fn nearby(&self, query: &NearbyQuery) -> Result<NearbyPage, StoreError> {
        let read_txn = self.db.begin_read()?;
        let coords = read_txn.open_table(COORDS_TABLE)?;
        let rows = read_txn.open_table(POINTS_TABLE)?;

        let mut ranked: Vec<(f64, u64)> = Vec::new();
        for entry in coords.iter()? {
            let (id, value) = entry?;
            let (lat, lng) = value.value();
            let d = geo::planar_distance_sq(query.center, LatLng::new(lat, lng));
            ranked.push((d, id.value()));
        }
        // Stable, so ties keep insertion order.
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Without a filter every candidate counts toward the offset.
        let skip_unread = if query.categories.is_none() {
            query.offset
        } else {
            0
        };
        let mut to_skip = query.offset - skip_unread;
        let mut page = Vec::with_capacity(query.fetch_limit());
        for (_, id) in ranked.into_iter().skip(skip_unread) {
            if page.len() == query.fetch_limit() {
                break;
            }
            let Some(bytes) = rows.get(id)? else {
                continue;
            };
            let point = PointRow::decode(bytes.value())?.into_point()?;
            if !query.matches(&point) {
                continue;
            }
            if to_skip > 0 {
                to_skip -= 1;
                continue;
            }
            page.push(point);
        }
        Ok(NearbyPage::from_rows(page, query.limit))
    }

    pub fn categories(&self) -> Result<Vec<String>, StoreError> {
        Ok(filter::extract_categories(&self.live_points()?))
    }

    /// Case-insensitive substring match on name or address. A blank query matches nothing.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Point>, StoreError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .live_points()?
            .into_iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.address.to_lowercase().contains(&needle)
            })
            .take(limit)
            .collect())
    }

    pub fn counts(&self) -> Result<PointCounts, StoreError> {
        let read_txn = self.db.begin_read()?;
        let total = read_txn.open_table(POINTS_TABLE)?.len()?;
        let live = read_txn.open_table(COORDS_TABLE)?.len()?;
        Ok(PointCounts {
            total,
            deleted: total.saturating_sub(live),
        })
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.counts()?.total == 0)
    }

    pub fn db_size_bytes(&self) -> Result<u64, StoreError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn live_points(&self) -> Result<Vec<Point>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let rows = read_txn.open_table(POINTS_TABLE)?;

        let mut points = Vec::new();
        for entry in rows.iter()? {
            let (_, value) = entry?;
            let row = PointRow::decode(value.value())?;
            if row.is_live() {
                points.push(row.into_point()?);
            }
        }
        Ok(points)
    }
}

#[async_trait]
impl PointSource for Storage {
    async fn fetch_bounds(&self, query: &BoundsQuery) -> Result<Vec<Point>, FetchError> {
        query.validate()?;
        Ok(self.points_in_bounds(&query.bounds)?)
    }

    async fn fetch_clusters(
        &self,
        query: &ClusterQuery,
    ) -> Result<Vec<ClusterSummary>, FetchError> {
        query.validate()?;
        Ok(self.clusters_in_bounds(&query.bounds, query.zoom)?)
    }

    async fn fetch_nearby(&self, query: &NearbyQuery) -> Result<NearbyPage, FetchError> {
        Ok(self.nearby(query)?)
    }
}
