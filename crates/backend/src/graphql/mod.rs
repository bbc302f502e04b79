use std::collections::BTreeSet;
use std::sync::Arc;

use async_graphql::{Context, InputObject, Object, SimpleObject};
use matjip_shared::{
    config::ViewConfig,
    geo,
    models::{self, Bounds, LatLng},
    query::{NearbyQuery, PAGE_SIZE},
};

use crate::storage::{StoreError, Storage};

const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 100;

// GraphQL output types

#[derive(SimpleObject, Clone)]
#[graphql(name = "Point")]
pub struct GqlPoint {
    /// Identity key, `name-lat-lng`.
    pub key: String,
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub link: String,
    pub recommendation: String,
    pub categories: Vec<String>,
    pub region: Option<String>,
}

impl From<models::Point> for GqlPoint {
    fn from(p: models::Point) -> Self {
        GqlPoint {
            key: p.key(),
            name: p.name,
            address: p.address,
            lat: p.lat,
            lng: p.lng,
            link: p.link,
            recommendation: p.recommendation,
            categories: p.categories,
            region: p.region,
        }
    }
}

fn to_gql_points(points: Vec<models::Point>) -> Vec<GqlPoint> {
    points.into_iter().map(GqlPoint::from).collect()
}

#[derive(SimpleObject)]
#[graphql(name = "ClusterSummary")]
pub struct GqlClusterSummary {
    pub lat: f64,
    pub lng: f64,
    pub count: u64,
}

impl From<models::ClusterSummary> for GqlClusterSummary {
    fn from(c: models::ClusterSummary) -> Self {
        GqlClusterSummary {
            lat: c.lat,
            lng: c.lng,
            count: c.count,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "NearbyPage")]
pub struct GqlNearbyPage {
    pub items: Vec<GqlPoint>,
    pub has_more: bool,
}

impl From<models::NearbyPage> for GqlNearbyPage {
    fn from(page: models::NearbyPage) -> Self {
        GqlNearbyPage {
            items: to_gql_points(page.items),
            has_more: page.has_more,
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "LatLng")]
pub struct GqlLatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(SimpleObject)]
#[graphql(name = "ViewConfig")]
pub struct GqlViewConfig {
    pub cluster_zoom_threshold: u32,
    pub default_zoom: u32,
    pub default_center: GqlLatLng,
}

impl From<ViewConfig> for GqlViewConfig {
    fn from(c: ViewConfig) -> Self {
        GqlViewConfig {
            cluster_zoom_threshold: c.cluster_zoom_threshold,
            default_zoom: c.default_zoom,
            default_center: GqlLatLng {
                lat: c.default_center.lat,
                lng: c.default_center.lng,
            },
        }
    }
}

#[derive(SimpleObject)]
#[graphql(name = "Stats")]
pub struct GqlStats {
    pub total_points: u64,
    pub deleted_points: u64,
    pub db_size_bytes: u64,
}

// Input types

#[derive(InputObject)]
pub struct BoundsInput {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl From<BoundsInput> for Bounds {
    fn from(b: BoundsInput) -> Self {
        Bounds::new(b.north, b.south, b.east, b.west)
    }
}

#[derive(InputObject)]
pub struct NearbyInput {
    pub lat: f64,
    pub lng: f64,
    /// Empty or absent means no category filter.
    pub categories: Option<Vec<String>>,
    pub offset: Option<u32>,
}

impl NearbyInput {
    fn into_query(self) -> async_graphql::Result<NearbyQuery> {
        if !geo::is_valid_coordinate(self.lat, self.lng) {
            return Err(async_graphql::Error::new(format!(
                "Invalid center: {}, {}",
                self.lat, self.lng
            )));
        }
        let categories: BTreeSet<String> =
            self.categories.unwrap_or_default().into_iter().collect();
        Ok(NearbyQuery {
            center: LatLng::new(self.lat, self.lng),
            categories: if categories.is_empty() {
                None
            } else {
                Some(categories)
            },
            offset: self.offset.unwrap_or(0) as usize,
            limit: PAGE_SIZE,
        })
    }
}

fn store_error(err: StoreError) -> async_graphql::Error {
    async_graphql::Error::new(err.to_string())
}

// Query root

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Live points inside the rectangle.
    async fn points_in_bounds(
        &self,
        ctx: &Context<'_>,
        bounds: BoundsInput,
    ) -> async_graphql::Result<Vec<GqlPoint>> {
        let storage = ctx.data::<Arc<Storage>>()?;
        let points = storage
            .points_in_bounds(&bounds.into())
            .map_err(store_error)?;
        Ok(to_gql_points(points))
    }

    /// One centroid and count per grid cell at `zoom`; zooms past `MAX_ZOOM` are rejected.
    async fn clusters(
        &self,
        ctx: &Context<'_>,
        bounds: BoundsInput,
        zoom: u32,
    ) -> async_graphql::Result<Vec<GqlClusterSummary>> {
        let storage = ctx.data::<Arc<Storage>>()?;
        let clusters = storage
            .clusters_in_bounds(&bounds.into(), zoom)
            .map_err(store_error)?;
        Ok(clusters.into_iter().map(GqlClusterSummary::from).collect())
    }

    /// One page of points ordered by distance from a center.
    async fn nearby(
        &self,
        ctx: &Context<'_>,
        input: NearbyInput,
    ) -> async_graphql::Result<GqlNearbyPage> {
        let storage = ctx.data::<Arc<Storage>>()?;
        let page = storage
            .nearby(&input.into_query()?)
            .map_err(store_error)?;
        Ok(page.into())
    }

    /// First nearby page around the configured default center.
    async fn initial_points(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<GqlPoint>> {
        let storage = ctx.data::<Arc<Storage>>()?;
        let view = ctx.data::<ViewConfig>()?;
        let query = NearbyQuery {
            center: view.default_center,
            categories: None,
            offset: 0,
            limit: PAGE_SIZE,
        };
        let page = storage.nearby(&query).map_err(store_error)?;
        Ok(to_gql_points(page.items))
    }

    async fn categories(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<String>> {
        let storage = ctx.data::<Arc<Storage>>()?;
        storage.categories().map_err(store_error)
    }

    async fn search(
        &self,
        ctx: &Context<'_>,
        query: String,
        limit: Option<u32>,
    ) -> async_graphql::Result<Vec<GqlPoint>> {
        let storage = ctx.data::<Arc<Storage>>()?;
        let limit = limit
            .map(|l| (l as usize).clamp(1, MAX_SEARCH_LIMIT))
            .unwrap_or(DEFAULT_SEARCH_LIMIT);
        let points = storage.search(&query, limit).map_err(store_error)?;
        Ok(to_gql_points(points))
    }

    async fn view_config(&self, ctx: &Context<'_>) -> async_graphql::Result<GqlViewConfig> {
        Ok((*ctx.data::<ViewConfig>()?).into())
    }

    async fn stats(&self, ctx: &Context<'_>) -> async_graphql::Result<GqlStats> {
        let storage = ctx.data::<Arc<Storage>>()?;
        let counts = storage.counts().map_err(store_error)?;
        let db_size_bytes = storage.db_size_bytes().map_err(store_error)?;
        Ok(GqlStats {
            total_points: counts.total,
            deleted_points: counts.deleted,
            db_size_bytes,
        })
    }
}

// Mutation root

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Hide a point from every query. Returns `false` for unknown or already deleted keys.
    async fn soft_delete_point(
        &self,
        ctx: &Context<'_>,
        key: String,
    ) -> async_graphql::Result<bool> {
        let storage = ctx.data::<Arc<Storage>>()?;
        storage.soft_delete(&key).map_err(store_error)
    }
}

pub type Schema = async_graphql::Schema<QueryRoot, MutationRoot, async_graphql::EmptySubscription>;

pub fn build_schema(storage: Arc<Storage>, view: ViewConfig) -> Schema {
    async_graphql::Schema::build(QueryRoot, MutationRoot, async_graphql::EmptySubscription)
        .data(storage)
        .data(view)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::gangnam;
    use serde_json::json;

    fn schema() -> (tempfile::TempDir, Schema) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("points.redb")).unwrap();
        storage.import(&gangnam()).unwrap();
        (dir, build_schema(storage, ViewConfig::default()))
    }

    async fn run(schema: &Schema, query: &str) -> serde_json::Value {
        let resp = schema.execute(query).await;
        assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
        resp.data.into_json().unwrap()
    }

    const GANGNAM_BOUNDS: &str = "{ north: 37.52, south: 37.49, east: 127.07, west: 127.03 }";

    #[tokio::test]
    async fn test_points_in_bounds() {
        let (_dir, schema) = schema();
        let data = run(
            &schema,
            &format!("{{ pointsInBounds(bounds: {GANGNAM_BOUNDS}) {{ name key }} }}"),
        )
        .await;
        assert_eq!(
            data["pointsInBounds"],
            json!([
                {"name": "역삼맛집", "key": "역삼맛집-37.5013-127.0396"},
                {"name": "선릉맛집", "key": "선릉맛집-37.5045-127.049"},
                {"name": "삼성맛집", "key": "삼성맛집-37.5088-127.063"},
            ])
        );
    }

    #[tokio::test]
    async fn test_inverted_bounds_is_field_error() {
        let (_dir, schema) = schema();
        let resp = schema
            .execute("{ pointsInBounds(bounds: { north: 37.49, south: 37.52, east: 127.07, west: 127.03 }) { name } }")
            .await;
        assert_eq!(resp.errors.len(), 1);
        assert!(resp.errors[0].message.contains("south edge"));
    }

    #[tokio::test]
    async fn test_clusters() {
        let (_dir, schema) = schema();
        let data = run(
            &schema,
            "{ clusters(bounds: { north: 39, south: 34, east: 130, west: 126 }, zoom: 7) { count } }",
        )
        .await;
        assert_eq!(data["clusters"], json!([{"count": 4}, {"count": 1}]));
    }

    #[tokio::test]
    async fn test_clusters_rejects_zoom_past_max() {
        let (_dir, schema) = schema();
        let resp = schema
            .execute("{ clusters(bounds: { north: 39, south: 34, east: 130, west: 126 }, zoom: 2000) { count } }")
            .await;
        assert_eq!(resp.errors.len(), 1);
        assert!(resp.errors[0].message.contains("zoom 2000"));
    }

    #[tokio::test]
    async fn test_nearby_with_categories() {
        let (_dir, schema) = schema();
        let data = run(
            &schema,
            r#"{ nearby(input: { lat: 37.505, lng: 127.05, categories: ["한식"] }) { items { name } hasMore } }"#,
        )
        .await;
        assert_eq!(
            data["nearby"],
            json!({
                "items": [{"name": "역삼맛집"}, {"name": "삼성맛집"}, {"name": "부산맛집"}],
                "hasMore": false
            })
        );
    }

    #[tokio::test]
    async fn test_nearby_rejects_invalid_center() {
        let (_dir, schema) = schema();
        let resp = schema
            .execute("{ nearby(input: { lat: 120, lng: 127 }) { hasMore } }")
            .await;
        assert_eq!(resp.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_initial_points_around_default_center() {
        let (_dir, schema) = schema();
        let data = run(&schema, "{ initialPoints { name } }").await;
        let items = data["initialPoints"].as_array().unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0]["name"], "역삼맛집");
    }

    #[tokio::test]
    async fn test_categories_and_search() {
        let (_dir, schema) = schema();
        let data = run(&schema, r#"{ categories search(query: "선릉") { name } }"#).await;
        assert_eq!(data["categories"], json!(["단체", "일식", "중식", "한식"]));
        assert_eq!(data["search"], json!([{"name": "선릉맛집"}]));
    }

    #[tokio::test]
    async fn test_view_config() {
        let (_dir, schema) = schema();
        let data = run(
            &schema,
            "{ viewConfig { clusterZoomThreshold defaultZoom defaultCenter { lat lng } } }",
        )
        .await;
        assert_eq!(
            data["viewConfig"],
            json!({
                "clusterZoomThreshold": 16,
                "defaultZoom": 16,
                "defaultCenter": {"lat": 37.4979, "lng": 127.0276}
            })
        );
    }

    #[tokio::test]
    async fn test_soft_delete_updates_stats() {
        let (_dir, schema) = schema();
        let data = run(
            &schema,
            r#"mutation { softDeletePoint(key: "삼성맛집-37.5088-127.063") }"#,
        )
        .await;
        assert_eq!(data["softDeletePoint"], json!(true));

        let data = run(&schema, "{ stats { totalPoints deletedPoints dbSizeBytes } }").await;
        assert_eq!(data["stats"]["totalPoints"], json!(5));
        assert_eq!(data["stats"]["deletedPoints"], json!(1));
        assert!(data["stats"]["dbSizeBytes"].as_u64().unwrap() > 0);

        let data = run(
            &schema,
            &format!("{{ pointsInBounds(bounds: {GANGNAM_BOUNDS}) {{ name }} }}"),
        )
        .await;
        assert_eq!(data["pointsInBounds"].as_array().unwrap().len(), 2);
    }
}
